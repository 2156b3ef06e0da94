//! Consumes signals in FIFO order, re-checks risk, computes a
//! friction-adjusted order price, and either records a paper fill
//! (dry-run) or submits a real order via the `OrderVenue` port.

use crate::config::Config;
use crate::domain::{Market, Side};
use crate::market_discovery::MarketRegistry;
use crate::ports::{NotificationKind, NotificationSink, OrderTimeInForce, OrderVenue};
use crate::risk_manager::RiskManager;
use crate::weather_monitor::SignalQueue;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const STALE_SIGNAL_AGE: i64 = 5 * 60; // seconds

#[derive(Debug, Clone)]
pub struct TradeResult {
    pub paper: bool,
    pub status: String,
    pub order_id: Option<String>,
    pub fill_price: f64,
}

pub struct Executor {
    config: Arc<Config>,
    venue: Arc<dyn OrderVenue>,
    notifier: Arc<dyn NotificationSink>,
}

impl Executor {
    pub fn new(config: Arc<Config>, venue: Arc<dyn OrderVenue>, notifier: Arc<dyn NotificationSink>) -> Self {
        Executor {
            config,
            venue,
            notifier,
        }
    }

    /// `orderPrice`: for BUY, `min(fair - 0.01, marketPrice)`; for SELL,
    /// `max(fair + 0.01, marketPrice)`. Clamped to `[0.01, 0.99]`.
    pub fn order_price(side: Side, fair: f64, market_price: f64) -> f64 {
        let raw = match side {
            Side::Buy => (fair - 0.01).min(market_price),
            Side::Sell => (fair + 0.01).max(market_price),
        };
        raw.clamp(0.01, 0.99)
    }

    /// One iteration over the pending signal queue: drop stale signals,
    /// re-check risk against current exposure, price and dispatch the rest.
    pub async fn run_cycle(
        &self,
        queue: &Mutex<SignalQueue>,
        registry: &Mutex<MarketRegistry>,
        risk: &Mutex<RiskManager>,
        now: chrono::NaiveDateTime,
    ) -> anyhow::Result<usize> {
        {
            let health = risk.lock().await.is_healthy(now.and_utc().timestamp_millis());
            if !health.healthy {
                return Ok(0);
            }
        }

        let pending = queue.lock().await.pending_signals();
        let mut executed = 0;

        for signal in pending {
            let age = now.signed_duration_since(signal.generated_at);
            if age > ChronoDuration::seconds(STALE_SIGNAL_AGE) {
                queue.lock().await.remove_signal(&signal.condition_id, &signal.token_id);
                info!(
                    "executor: dropped stale signal for {}/{} ({}s old)",
                    signal.condition_id,
                    signal.token_id,
                    age.num_seconds()
                );
                continue;
            }

            let market: Option<Market> = {
                let reg = registry.lock().await;
                reg.get(&signal.condition_id).cloned()
            };
            let Some(market) = market else {
                queue.lock().await.remove_signal(&signal.condition_id, &signal.token_id);
                continue;
            };

            let check = {
                let mut rm = risk.lock().await;
                rm.can_trade(
                    &market,
                    signal.recommended_size_usd,
                    now.and_utc().timestamp_millis(),
                    now.date(),
                )
            };
            if !check.allowed {
                queue.lock().await.remove_signal(&signal.condition_id, &signal.token_id);
                self.notifier
                    .event(
                        NotificationKind::Error,
                        serde_json::json!({
                            "event": "trade_blocked",
                            "market": signal.condition_id,
                            "token": signal.token_id,
                            "reason": check.reason.unwrap_or_else(|| "risk check failed".to_string()),
                        }),
                    )
                    .await;
                continue;
            }

            let price = Self::order_price(signal.side, signal.fair_probability, signal.market_price);
            let token_amount = signal.recommended_size_usd / price;

            let result = if self.config.dry_run {
                self.execute_paper(&signal, price).await
            } else {
                self.execute_live(&signal, price, token_amount).await
            };

            queue.lock().await.remove_signal(&signal.condition_id, &signal.token_id);

            match result {
                Ok(trade) => {
                    risk.lock()
                        .await
                        .record_trade(&market, signal.recommended_size_usd, signal.side);
                    self.notifier
                        .event(
                            NotificationKind::Trade,
                            serde_json::json!({
                                "market": signal.condition_id,
                                "token": signal.token_id,
                                "side": signal.side.to_string(),
                                "price": trade.fill_price,
                                "paper": trade.paper,
                            }),
                        )
                        .await;
                    executed += 1;
                }
                Err(e) => {
                    warn!("executor: order failed for {}: {}", signal.condition_id, e);
                }
            }
        }

        Ok(executed)
    }

    async fn execute_paper(&self, signal: &crate::domain::TradeSignal, price: f64) -> anyhow::Result<TradeResult> {
        let pessimistic = match signal.side {
            Side::Buy => price + 0.01,
            Side::Sell => price - 0.01,
        };
        Ok(TradeResult {
            paper: true,
            status: "filled".to_string(),
            order_id: None,
            fill_price: pessimistic.clamp(0.01, 0.99),
        })
    }

    async fn execute_live(
        &self,
        signal: &crate::domain::TradeSignal,
        price: f64,
        size: f64,
    ) -> anyhow::Result<TradeResult> {
        let result = self
            .venue
            .place_limit(&signal.token_id, signal.side, price, size, OrderTimeInForce::GoodTillCancelled)
            .await?;
        if !result.ok {
            anyhow::bail!(result.err.unwrap_or_else(|| "order venue rejected order".to_string()));
        }
        Ok(TradeResult {
            paper: false,
            status: "filled".to_string(),
            order_id: result.order_id,
            fill_price: price,
        })
    }
}
