//! Polls live inventory and applies stop-loss/take-profit/trailing-stop
//! against a persisted high-water mark per position. Applies the same
//! checks to every open position regardless of market type: weather
//! markets carry the same downside risk as any other and get no special
//! exemption here.

use crate::config::Config;
use crate::domain::{PositionPeak, PositionPeakMap};
use crate::ports::{NotificationKind, NotificationSink, OrderTimeInForce, OrderVenue, Position, PositionBook, StateStore};
use crate::risk_manager::RiskManager;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

const PEAK_STATE_KEY: &str = "position_peaks";
const PEAK_DEBOUNCE: Duration = Duration::from_secs(5);
const INTER_SELL_PAUSE: Duration = Duration::from_secs(2);
const MIN_POSITION_SIZE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Trigger {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl Trigger {
    fn kind(self) -> NotificationKind {
        match self {
            Trigger::StopLoss => NotificationKind::StopLoss,
            Trigger::TakeProfit => NotificationKind::TakeProfit,
            Trigger::TrailingStop => NotificationKind::TrailingStop,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Trigger::StopLoss => "stop-loss",
            Trigger::TakeProfit => "take-profit",
            Trigger::TrailingStop => "trailing-stop",
        }
    }
}

pub struct PositionManager {
    config: Arc<Config>,
    positions: Arc<dyn PositionBook>,
    venue: Arc<dyn OrderVenue>,
    state_store: Arc<dyn StateStore>,
    notifier: Arc<dyn NotificationSink>,
    risk: Arc<Mutex<RiskManager>>,
    last_peak_save: Mutex<Option<Instant>>,
}

pub struct CycleResult {
    pub positions_checked: usize,
    pub triggered: usize,
}

enum ExitOutcome {
    Filled { realized_usd: f64 },
    SkippedThinBook,
}

impl PositionManager {
    pub fn new(
        config: Arc<Config>,
        positions: Arc<dyn PositionBook>,
        venue: Arc<dyn OrderVenue>,
        state_store: Arc<dyn StateStore>,
        notifier: Arc<dyn NotificationSink>,
        risk: Arc<Mutex<RiskManager>>,
    ) -> Self {
        PositionManager {
            config,
            positions,
            venue,
            state_store,
            notifier,
            risk,
            last_peak_save: Mutex::new(None),
        }
    }

    pub async fn load_peaks(&self) -> PositionPeakMap {
        match self.state_store.load(PEAK_STATE_KEY).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            _ => PositionPeakMap::new(),
        }
    }

    fn pnl_pct(position: &Position) -> f64 {
        (position.cur_price - position.avg_price) / position.avg_price * 100.0
    }

    fn trigger_for(&self, pnl_pct: f64, peak: &PositionPeak) -> Option<Trigger> {
        if self.config.stop_loss_enabled && pnl_pct <= -self.config.stop_loss_percent {
            return Some(Trigger::StopLoss);
        }
        if self.config.take_profit_enabled && pnl_pct >= self.config.take_profit_percent {
            return Some(Trigger::TakeProfit);
        }
        if self.config.trailing_stop_enabled
            && peak.peak_pnl_percent >= self.config.trailing_stop_percent
            && peak.peak_pnl_percent - pnl_pct >= self.config.trailing_stop_percent
        {
            return Some(Trigger::TrailingStop);
        }
        None
    }

    async fn maybe_save_peaks(&self, peaks: &PositionPeakMap, force: bool) {
        let mut last = self.last_peak_save.lock().await;
        let due = last.map_or(true, |t| t.elapsed() >= PEAK_DEBOUNCE);
        if !force && !due {
            return;
        }
        let value = serde_json::to_value(peaks).unwrap_or(serde_json::Value::Null);
        if let Err(e) = self.state_store.save(PEAK_STATE_KEY, value).await {
            warn!("position manager: failed to persist peaks: {}", e);
        }
        *last = Some(Instant::now());
    }

    /// One iteration: fetch inventory, update peaks, and fire SL/TP/trailing
    /// exits against the current best bid. Realized PnL from each exit is
    /// reported to the risk manager, which is the only path by which a
    /// losing trade can trip the daily-loss kill switch.
    pub async fn run_cycle(&self, peaks: &mut PositionPeakMap, now: NaiveDateTime) -> anyhow::Result<CycleResult> {
        let positions = self.positions.list().await?;
        let mut triggered = 0;
        let mut checked = 0;
        let mut peaks_dirty = false;

        for position in &positions {
            if position.size <= MIN_POSITION_SIZE {
                continue;
            }
            checked += 1;

            let pnl_pct = Self::pnl_pct(position);
            let peak = peaks.entry(position.condition_id.clone()).or_insert(PositionPeak {
                peak_price: position.cur_price,
                peak_pnl_percent: pnl_pct,
            });
            if position.cur_price > peak.peak_price {
                peak.peak_price = position.cur_price;
                peak.peak_pnl_percent = peak.peak_pnl_percent.max(pnl_pct);
                peaks_dirty = true;
            }
            let peak_snapshot = *peak;

            let Some(trigger) = self.trigger_for(pnl_pct, &peak_snapshot) else {
                continue;
            };

            match self.execute_exit(position, trigger).await {
                Ok(ExitOutcome::Filled { realized_usd }) => {
                    peaks.remove(&position.condition_id);
                    peaks_dirty = true;
                    triggered += 1;

                    let newly_paused = self.risk.lock().await.record_pnl(realized_usd, now.date());
                    if newly_paused {
                        self.notifier
                            .event(
                                NotificationKind::Error,
                                serde_json::json!({
                                    "event": "kill_switch_activated",
                                    "reason": "daily loss limit reached",
                                }),
                            )
                            .await;
                    }
                }
                Ok(ExitOutcome::SkippedThinBook) => {
                    info!(
                        "position manager: skipped {} for {} (thin book)",
                        trigger.label(),
                        position.condition_id
                    );
                }
                Err(e) => {
                    warn!("position manager: exit failed for {}: {}", position.condition_id, e);
                }
            }

            tokio::time::sleep(INTER_SELL_PAUSE).await;
        }

        self.maybe_save_peaks(peaks, peaks_dirty).await;

        Ok(CycleResult {
            positions_checked: checked,
            triggered,
        })
    }

    /// Returns the realized PnL on a filled exit, or `SkippedThinBook`
    /// when the book can't support the exit.
    async fn execute_exit(&self, position: &Position, trigger: Trigger) -> anyhow::Result<ExitOutcome> {
        let book = self.venue.order_book(&position.token_id).await?;
        let Some(best_bid) = book.bids.iter().max_by(|a, b| a.price.total_cmp(&b.price)) else {
            return Ok(ExitOutcome::SkippedThinBook);
        };
        if best_bid.price < position.cur_price * self.config.sl_tp_min_price_percent / 100.0 {
            return Ok(ExitOutcome::SkippedThinBook);
        }

        let sell_size = position.size.min(best_bid.size);
        let result = self
            .venue
            .place_limit(&position.token_id, crate::domain::Side::Sell, best_bid.price, sell_size, OrderTimeInForce::FillOrKill)
            .await?;
        if !result.ok {
            anyhow::bail!(result.err.unwrap_or_else(|| "venue rejected exit order".to_string()));
        }

        self.notifier
            .event(
                trigger.kind(),
                serde_json::json!({
                    "market": position.condition_id,
                    "token": position.token_id,
                    "trigger": trigger.label(),
                    "price": best_bid.price,
                    "size": sell_size,
                }),
            )
            .await;

        let realized_usd = (best_bid.price - position.avg_price) * sell_size;
        Ok(ExitOutcome::Filled { realized_usd })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(peak_price: f64, peak_pnl_percent: f64) -> PositionPeak {
        PositionPeak { peak_price, peak_pnl_percent }
    }

    fn position(cur_price: f64, avg_price: f64) -> Position {
        Position {
            condition_id: "0xabc".into(),
            token_id: "tok".into(),
            size: 10.0,
            avg_price,
            cur_price,
            redeemable: None,
        }
    }

    fn test_config(stop_loss: bool, take_profit: bool, trailing: bool) -> Config {
        Config {
            edge_threshold: 0.03,
            max_lead_days: 7,
            discovery_interval_ms: 3_600_000,
            forecast_refresh_ms: 1_800_000,
            observation_poll_ms: 300_000,
            min_parser_confidence: 0.8,
            dry_run: true,
            max_exposure_per_market_usd: 50.0,
            max_exposure_per_region_usd: 200.0,
            max_exposure_per_date_usd: 300.0,
            max_daily_loss_usd: 100.0,
            max_data_age_ms: 3_600_000,
            min_order_size_usd: 1.0,
            max_order_size_usd: 25.0,
            executor_poll_interval_ms: 5_000,
            position_check_interval_ms: 60_000,
            stop_loss_enabled: stop_loss,
            stop_loss_percent: 20.0,
            take_profit_enabled: take_profit,
            take_profit_percent: 50.0,
            trailing_stop_enabled: trailing,
            trailing_stop_percent: 15.0,
            sl_tp_min_price_percent: 50.0,
            rate_limit_cooldown_ms: 60_000,
            redemption_check_interval_ms: 3_600_000,
            kelly_max_fraction: 0.05,
            market_catalog_url: String::new(),
            order_venue_url: String::new(),
            forecast_provider_primary_url: String::new(),
            forecast_provider_secondary_url: String::new(),
            observation_provider_url: String::new(),
            http_request_timeout_secs: 15,
            state_store_path: String::new(),
        }
    }

    #[test]
    fn pnl_pct_matches_formula() {
        let p = position(0.60, 0.50);
        assert!((PositionManager::pnl_pct(&p) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_triggers_below_threshold() {
        let config = Arc::new(test_config(true, false, false));
        let pm = test_manager(config);
        let trig = pm.trigger_for(-25.0, &peak(0.4, -25.0));
        assert_eq!(trig, Some(Trigger::StopLoss));
    }

    #[test]
    fn take_profit_triggers_above_threshold() {
        let config = Arc::new(test_config(false, true, false));
        let pm = test_manager(config);
        let trig = pm.trigger_for(55.0, &peak(0.8, 55.0));
        assert_eq!(trig, Some(Trigger::TakeProfit));
    }

    #[test]
    fn trailing_stop_requires_peak_and_drawdown_both_past_threshold() {
        let config = Arc::new(test_config(false, false, true));
        let pm = test_manager(config);
        assert_eq!(pm.trigger_for(0.0, &peak(0.75, 16.0)), Some(Trigger::TrailingStop));
        assert_eq!(pm.trigger_for(5.0, &peak(0.75, 10.0)), None);
    }

    #[test]
    fn disabled_triggers_never_fire() {
        let config = Arc::new(test_config(false, false, false));
        let pm = test_manager(config);
        assert_eq!(pm.trigger_for(-90.0, &peak(0.1, -90.0)), None);
    }

    struct FilledPositionBook(Vec<Position>);
    #[async_trait::async_trait]
    impl PositionBook for FilledPositionBook {
        async fn list(&self) -> anyhow::Result<Vec<Position>> {
            Ok(self.0.clone())
        }
    }

    struct BestBidVenue {
        price: f64,
    }
    #[async_trait::async_trait]
    impl OrderVenue for BestBidVenue {
        async fn place_limit(
            &self,
            _token_id: &str,
            _side: crate::domain::Side,
            _price: f64,
            _size: f64,
            _tif: OrderTimeInForce,
        ) -> anyhow::Result<crate::ports::OrderResult> {
            Ok(crate::ports::OrderResult {
                ok: true,
                order_id: Some("ord_1".into()),
                err: None,
            })
        }
        async fn order_book(&self, _token_id: &str) -> anyhow::Result<crate::ports::OrderBookSnapshot> {
            Ok(crate::ports::OrderBookSnapshot {
                bids: vec![crate::ports::OrderBookLevel { price: self.price, size: 100.0 }],
                asks: vec![],
            })
        }
        async fn open_orders(&self) -> anyhow::Result<Vec<crate::ports::OpenOrder>> {
            Ok(vec![])
        }
    }

    struct RecordingNotifier {
        kinds: std::sync::Mutex<Vec<NotificationKind>>,
    }
    #[async_trait::async_trait]
    impl NotificationSink for RecordingNotifier {
        async fn event(&self, kind: NotificationKind, _payload: serde_json::Value) {
            self.kinds.lock().unwrap().push(kind);
        }
    }

    #[tokio::test]
    async fn stop_loss_exit_reports_realized_loss_to_risk_manager() {
        let config = Arc::new(test_config(true, false, false));
        let today = chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let risk = Arc::new(Mutex::new(RiskManager::new((*config).clone(), today)));
        let notifier = Arc::new(RecordingNotifier { kinds: std::sync::Mutex::new(vec![]) });
        let manager = PositionManager::new(
            config,
            Arc::new(FilledPositionBook(vec![position(0.30, 0.50)])),
            Arc::new(BestBidVenue { price: 0.30 }),
            Arc::new(NullStateStore),
            notifier.clone(),
            risk.clone(),
        );

        let mut peaks = PositionPeakMap::new();
        let now = today.and_hms_opt(12, 0, 0).unwrap();
        let result = manager.run_cycle(&mut peaks, now).await.unwrap();
        assert_eq!(result.triggered, 1);

        let book = risk.lock().await;
        assert!((book.book().realized_daily_pnl - (-2.0)).abs() < 1e-6);
        assert!(notifier.kinds.lock().unwrap().contains(&NotificationKind::StopLoss));
    }

    #[tokio::test]
    async fn exit_that_breaches_daily_loss_cap_emits_kill_switch_notification() {
        let mut config = test_config(true, false, false);
        config.max_daily_loss_usd = 1.0;
        let config = Arc::new(config);
        let today = chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let risk = Arc::new(Mutex::new(RiskManager::new((*config).clone(), today)));
        let notifier = Arc::new(RecordingNotifier { kinds: std::sync::Mutex::new(vec![]) });
        let manager = PositionManager::new(
            config,
            Arc::new(FilledPositionBook(vec![position(0.30, 0.50)])),
            Arc::new(BestBidVenue { price: 0.30 }),
            Arc::new(NullStateStore),
            notifier.clone(),
            risk.clone(),
        );

        let mut peaks = PositionPeakMap::new();
        let now = today.and_hms_opt(12, 0, 0).unwrap();
        manager.run_cycle(&mut peaks, now).await.unwrap();

        assert!(risk.lock().await.is_healthy(0).paused);
        assert!(notifier.kinds.lock().unwrap().contains(&NotificationKind::Error));
    }

    struct NullPositionBook;
    #[async_trait::async_trait]
    impl PositionBook for NullPositionBook {
        async fn list(&self) -> anyhow::Result<Vec<Position>> {
            Ok(vec![])
        }
    }

    struct NullOrderVenue;
    #[async_trait::async_trait]
    impl OrderVenue for NullOrderVenue {
        async fn place_limit(
            &self,
            _token_id: &str,
            _side: crate::domain::Side,
            _price: f64,
            _size: f64,
            _tif: OrderTimeInForce,
        ) -> anyhow::Result<crate::ports::OrderResult> {
            unimplemented!()
        }
        async fn order_book(&self, _token_id: &str) -> anyhow::Result<crate::ports::OrderBookSnapshot> {
            unimplemented!()
        }
        async fn open_orders(&self) -> anyhow::Result<Vec<crate::ports::OpenOrder>> {
            unimplemented!()
        }
    }

    struct NullStateStore;
    #[async_trait::async_trait]
    impl StateStore for NullStateStore {
        async fn save(&self, _key: &str, _value: serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
        async fn load(&self, _key: &str) -> anyhow::Result<Option<serde_json::Value>> {
            Ok(None)
        }
    }

    struct NullNotifier;
    #[async_trait::async_trait]
    impl NotificationSink for NullNotifier {
        async fn event(&self, _kind: NotificationKind, _payload: serde_json::Value) {}
    }

    fn test_manager(config: Arc<Config>) -> PositionManager {
        let today = chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let risk = Arc::new(Mutex::new(RiskManager::new((*config).clone(), today)));
        PositionManager::new(
            config,
            Arc::new(NullPositionBook),
            Arc::new(NullOrderVenue),
            Arc::new(NullStateStore),
            Arc::new(NullNotifier),
            risk,
        )
    }
}
