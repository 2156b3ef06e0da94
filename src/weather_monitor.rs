//! Cooperative loop: discovery -> prices -> forecast -> probability engine
//! -> risk check -> signal queue.

use crate::config::Config;
use crate::domain::{Market, Side, Station, TradeSignal};
use crate::forecast_service::ForecastService;
use crate::market_discovery::{Discovery, MarketRegistry};
use crate::ports::{MarketCatalog, ObservationProvider};
use crate::probability_engine::{build_bin_probabilities, kelly_fraction, should_trade};
use crate::risk_manager::RiskManager;
use chrono::Timelike;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const SPREAD: f64 = 0.02;
const SIGNAL_KELLY_MAX_FRACTION: f64 = 0.1;
const SIGNAL_KELLY_BASE_USD: f64 = 100.0;

/// FIFO queue, naturally bounded by enqueue dedup on `(conditionId, tokenId)`.
pub struct SignalQueue {
    items: VecDeque<TradeSignal>,
}

impl SignalQueue {
    pub fn new() -> Self {
        SignalQueue {
            items: VecDeque::new(),
        }
    }

    /// Enqueue unless an equivalent signal is already pending for the same
    /// `(conditionId, tokenId)` key.
    pub fn enqueue(&mut self, signal: TradeSignal) -> bool {
        if self.items.iter().any(|s| s.key() == signal.key()) {
            return false;
        }
        self.items.push_back(signal);
        true
    }

    pub fn pending_signals(&self) -> Vec<TradeSignal> {
        self.items.iter().cloned().collect()
    }

    pub fn remove_signal(&mut self, condition_id: &str, token_id: &str) {
        self.items
            .retain(|s| !(s.condition_id == condition_id && s.token_id == token_id));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub fn jittered_sleep_ms(base_ms: u64, jitter_fraction: f64) -> std::time::Duration {
    let mut rng = rand::rng();
    let jitter = rng.random_range(-jitter_fraction..=jitter_fraction);
    let adjusted = (base_ms as f64) * (1.0 + jitter);
    std::time::Duration::from_millis(adjusted.max(0.0) as u64)
}

pub struct WeatherMonitor {
    config: Arc<Config>,
    stations: Vec<Station>,
    catalog: Arc<dyn MarketCatalog>,
    forecast_service: Arc<ForecastService>,
    observation_provider: Arc<dyn ObservationProvider>,
    discovery: Discovery,
}

pub struct MonitorCycleResult {
    pub markets_checked: usize,
    pub signals_enqueued: usize,
}

impl WeatherMonitor {
    pub fn new(
        config: Arc<Config>,
        stations: Vec<Station>,
        catalog: Arc<dyn MarketCatalog>,
        forecast_service: Arc<ForecastService>,
        observation_provider: Arc<dyn ObservationProvider>,
        discovery: Discovery,
    ) -> Self {
        WeatherMonitor {
            config,
            stations,
            catalog,
            forecast_service,
            observation_provider,
            discovery,
        }
    }

    /// Exposes the discovery pass so the caller can run it on its own
    /// interval, separate from the per-cycle monitor sleep.
    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// One iteration of the Weather Monitor loop: refresh prices for
    /// upcoming markets, rebuild bin probabilities from the ensemble
    /// forecast, and enqueue BUY signals that clear the edge threshold.
    /// Running discovery when its interval elapses and sleeping between
    /// cycles are the caller's responsibility.
    pub async fn run_cycle(
        &self,
        registry: &Mutex<MarketRegistry>,
        queue: &Mutex<SignalQueue>,
        risk: &Mutex<RiskManager>,
        now: chrono::NaiveDateTime,
    ) -> anyhow::Result<MonitorCycleResult> {
        let upcoming: Vec<Market> = {
            let reg = registry.lock().await;
            reg.get_upcoming(self.config.max_lead_days, now)
                .into_iter()
                .cloned()
                .collect()
        };

        let token_ids: Vec<String> = upcoming.iter().flat_map(|m| m.bins.iter().map(|b| b.token_id.clone())).collect();
        let prices = match self.catalog.prices(&token_ids).await {
            Ok(p) => p,
            Err(e) => {
                warn!("monitor: price refresh failed: {}", e);
                HashMap::new()
            }
        };
        risk.lock().await.update_data_timestamp(now);

        let mut enqueued = 0;
        for market in &upcoming {
            let forecast = self
                .forecast_service
                .get_ensemble_forecast(
                    self.stations.iter().find(|s| s.code == market.station_code).unwrap(),
                    market.target_date,
                    now,
                )
                .await;
            let Some(forecast) = forecast else {
                continue;
            };

            let max_so_far = if forecast.lead_days <= 0 && market.metric == crate::domain::Metric::DailyMaxTemp {
                let station = self.stations.iter().find(|s| s.code == market.station_code).unwrap();
                let hourly = self
                    .observation_provider
                    .hourly_today(station.latitude, station.longitude, station.timezone)
                    .await
                    .unwrap_or_default();
                crate::forecast_service::get_daily_max_so_far(&hourly, now.time().hour() as usize).await
            } else {
                None
            };

            let mu = forecast.mu(market.metric);
            let sigma = forecast.sigma(market.metric, self.forecast_service.sigma_lookup(forecast.lead_days));
            let bin_probs = build_bin_probabilities(&market.bins, market.metric, mu, sigma, max_so_far, &prices);

            for bp in &bin_probs {
                let friction_adjusted_edge = bp.edge - SPREAD / 2.0;
                let Some(side) = should_trade(friction_adjusted_edge, self.config.edge_threshold, bp.is_possible) else {
                    continue;
                };
                if side != Side::Buy {
                    continue;
                }

                let kelly = kelly_fraction(bp.fair_probability, bp.market_price, SIGNAL_KELLY_MAX_FRACTION);
                let size = (kelly * SIGNAL_KELLY_BASE_USD).min(self.config.max_order_size_usd);
                if size <= 0.0 {
                    continue;
                }

                let allowed = {
                    let mut rm = risk.lock().await;
                    rm.can_trade(market, size, now.and_utc().timestamp_millis(), now.date()).allowed
                };
                if !allowed {
                    continue;
                }

                let mut q = queue.lock().await;
                let signal = TradeSignal {
                    condition_id: market.condition_id.clone(),
                    token_id: bp.outcome_id.clone(),
                    side,
                    fair_probability: bp.fair_probability,
                    market_price: bp.market_price,
                    edge: bp.edge,
                    recommended_size_usd: size,
                    reason: format!("edge {:.3} > threshold {:.3}", friction_adjusted_edge, self.config.edge_threshold),
                    forecast_source: forecast.source.clone(),
                    max_so_far,
                    generated_at: now,
                };
                if q.enqueue(signal) {
                    enqueued += 1;
                    info!(
                        "monitor: enqueued BUY signal for {} / {}",
                        market.condition_id, bp.outcome_id
                    );
                }
            }
        }

        Ok(MonitorCycleResult {
            markets_checked: upcoming.len(),
            signals_enqueued: enqueued,
        })
    }
}
