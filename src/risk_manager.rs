//! Enforces pre-trade limits and the kill-switch state; tracks exposure as
//! orders succeed. Owns the process-wide `ExposureBook` singleton
//! exclusively — all mutation goes through this API.

use crate::config::Config;
use crate::domain::{ExposureBook, Market, Side};
use chrono::NaiveDate;
use tracing::{info, warn};

pub struct CanTradeResult {
    pub allowed: bool,
    pub reason: Option<String>,
}

pub struct HealthSummary {
    pub healthy: bool,
    pub paused: bool,
    pub stale_data: bool,
    pub approaching_daily_loss: bool,
}

pub struct RiskManager {
    book: ExposureBook,
    config: Config,
}

impl RiskManager {
    pub fn new(config: Config, today: NaiveDate) -> Self {
        RiskManager {
            book: ExposureBook::new(today),
            config,
        }
    }

    fn maybe_reset_daily(&mut self, today: NaiveDate) {
        if today != self.book.last_pnl_reset {
            self.book.realized_daily_pnl = 0.0;
            self.book.last_pnl_reset = today;
            if self.book.pause_reason.as_deref() == Some("Daily loss limit reached") {
                self.resume_trading();
            }
        }
    }

    pub fn can_trade(&mut self, market: &Market, size_usd: f64, now_ms: i64, today: NaiveDate) -> CanTradeResult {
        self.maybe_reset_daily(today);

        if self.book.is_paused {
            return CanTradeResult {
                allowed: false,
                reason: self.book.pause_reason.clone(),
            };
        }

        if let Some(last_update) = self.book.last_data_update {
            let age_ms = now_ms - last_update.and_utc().timestamp_millis();
            if age_ms >= 0 && age_ms as u64 >= self.config.max_data_age_ms {
                return CanTradeResult {
                    allowed: false,
                    reason: Some(format!("stale data: {}ms old", age_ms)),
                };
            }
        }

        let per_market = self.book.per_market.get(&market.condition_id).copied().unwrap_or(0.0);
        if per_market + size_usd > self.config.max_exposure_per_market_usd {
            return CanTradeResult {
                allowed: false,
                reason: Some(format!(
                    "would exceed per-market cap of {}",
                    self.config.max_exposure_per_market_usd
                )),
            };
        }

        let per_region = self.book.per_region.get(&market.region).copied().unwrap_or(0.0);
        if per_region + size_usd > self.config.max_exposure_per_region_usd {
            return CanTradeResult {
                allowed: false,
                reason: Some(format!(
                    "would exceed per-region cap of {}",
                    self.config.max_exposure_per_region_usd
                )),
            };
        }

        let per_date = self.book.per_date.get(&market.target_date).copied().unwrap_or(0.0);
        if per_date + size_usd > self.config.max_exposure_per_date_usd {
            return CanTradeResult {
                allowed: false,
                reason: Some(format!(
                    "would exceed per-date cap of {}",
                    self.config.max_exposure_per_date_usd
                )),
            };
        }

        if size_usd < self.config.min_order_size_usd || size_usd > self.config.max_order_size_usd {
            return CanTradeResult {
                allowed: false,
                reason: Some(format!(
                    "size {} outside band [{}, {}]",
                    size_usd, self.config.min_order_size_usd, self.config.max_order_size_usd
                )),
            };
        }

        CanTradeResult {
            allowed: true,
            reason: None,
        }
    }

    pub fn record_trade(&mut self, market: &Market, size_usd: f64, side: Side) {
        let delta = match side {
            Side::Buy => size_usd,
            Side::Sell => -size_usd,
        };
        bump(&mut self.book.per_market, market.condition_id.clone(), delta);
        bump(&mut self.book.per_region, market.region.clone(), delta);
        bump_date(&mut self.book.per_date, market.target_date, delta);
    }

    /// Records realized PnL and trips the kill switch if the daily loss
    /// cap is breached. Returns `true` exactly when this call is what
    /// newly paused trading (false if already paused, or still healthy).
    pub fn record_pnl(&mut self, realized_usd: f64, today: NaiveDate) -> bool {
        self.maybe_reset_daily(today);
        self.book.realized_daily_pnl += realized_usd;
        if self.book.realized_daily_pnl < -self.config.max_daily_loss_usd {
            return self.pause_trading("Daily loss limit reached".to_string());
        }
        false
    }

    pub fn update_data_timestamp(&mut self, at: chrono::NaiveDateTime) {
        self.book.last_data_update = Some(at);
    }

    /// Returns `true` exactly when this call transitioned trading from
    /// active to paused (false if it was already paused).
    pub fn pause_trading(&mut self, reason: String) -> bool {
        let was_paused = self.book.is_paused;
        warn!("Risk manager pausing trading: {}", reason);
        self.book.is_paused = true;
        self.book.pause_reason = Some(reason);
        !was_paused
    }

    pub fn resume_trading(&mut self) {
        info!("Risk manager resuming trading");
        self.book.is_paused = false;
        self.book.pause_reason = None;
    }

    pub fn is_healthy(&self, now_ms: i64) -> HealthSummary {
        let stale_data = match self.book.last_data_update {
            Some(last) => {
                let age = now_ms - last.and_utc().timestamp_millis();
                age >= 0 && age as u64 >= self.config.max_data_age_ms
            }
            None => false,
        };
        let approaching_daily_loss =
            self.book.realized_daily_pnl.abs() > 0.8 * self.config.max_daily_loss_usd;
        HealthSummary {
            healthy: !self.book.is_paused && !stale_data,
            paused: self.book.is_paused,
            stale_data,
            approaching_daily_loss,
        }
    }

    pub fn clear_market_exposure(&mut self, market: &Market) {
        if let Some(amount) = self.book.per_market.remove(&market.condition_id) {
            bump(&mut self.book.per_region, market.region.clone(), -amount);
            bump_date(&mut self.book.per_date, market.target_date, -amount);
        }
    }

    pub fn book(&self) -> &ExposureBook {
        &self.book
    }
}

fn bump(map: &mut std::collections::HashMap<String, f64>, key: String, delta: f64) {
    let entry = map.entry(key).or_insert(0.0);
    *entry = (*entry + delta).max(0.0);
}

fn bump_date(map: &mut std::collections::HashMap<NaiveDate, f64>, key: NaiveDate, delta: f64) {
    let entry = map.entry(key).or_insert(0.0);
    *entry = (*entry + delta).max(0.0);
}
