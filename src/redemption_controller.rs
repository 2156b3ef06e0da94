//! Hourly sweep for terminal-priced positions: once a market settles to a
//! near-0/near-1 price, the underlying conditional tokens become
//! redeemable for the full payout and should be cashed out rather than
//! left sitting in inventory.

use crate::ports::{PositionBook, RedemptionPort};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

const TERMINAL_HIGH: f64 = 0.99;
const TERMINAL_LOW: f64 = 0.01;
const INTER_GROUP_PAUSE: Duration = Duration::from_secs(2);

pub struct RedemptionController {
    positions: Arc<dyn PositionBook>,
    redeemer: Arc<dyn RedemptionPort>,
}

pub struct CycleResult {
    pub groups_attempted: usize,
    pub groups_succeeded: usize,
}

impl RedemptionController {
    pub fn new(positions: Arc<dyn PositionBook>, redeemer: Arc<dyn RedemptionPort>) -> Self {
        RedemptionController { positions, redeemer }
    }

    /// One iteration: find redeemable terminal-priced positions, group by
    /// condition, and redeem each group once. No retries — a transient
    /// failure is simply re-observed on the next hourly cycle.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleResult> {
        let positions = self.positions.list().await?;

        let mut by_condition: HashMap<String, ()> = HashMap::new();
        for position in &positions {
            let terminal = position.cur_price >= TERMINAL_HIGH || position.cur_price <= TERMINAL_LOW;
            if terminal && position.redeemable == Some(true) {
                by_condition.entry(position.condition_id.clone()).or_insert(());
            }
        }

        let mut attempted = 0;
        let mut succeeded = 0;
        let mut conditions: Vec<&String> = by_condition.keys().collect();
        conditions.sort();

        for (i, condition_id) in conditions.drain(..).enumerate() {
            if i > 0 {
                tokio::time::sleep(INTER_GROUP_PAUSE).await;
            }
            attempted += 1;
            match self.redeemer.redeem(condition_id).await {
                Ok(result) if result.ok => {
                    info!("redemption controller: redeemed {}", condition_id);
                    succeeded += 1;
                }
                Ok(result) => {
                    warn!(
                        "redemption controller: redeem rejected for {}: {}",
                        condition_id,
                        result.err.unwrap_or_default()
                    );
                }
                Err(e) => {
                    warn!("redemption controller: redeem failed for {}: {}", condition_id, e);
                }
            }
        }

        Ok(CycleResult {
            groups_attempted: attempted,
            groups_succeeded: succeeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{Position, RedemptionResult};
    use std::sync::Mutex;

    struct FakePositionBook(Vec<Position>);
    #[async_trait::async_trait]
    impl PositionBook for FakePositionBook {
        async fn list(&self) -> anyhow::Result<Vec<Position>> {
            Ok(self.0.clone())
        }
    }

    struct RecordingRedeemer {
        calls: Mutex<Vec<String>>,
    }
    #[async_trait::async_trait]
    impl RedemptionPort for RecordingRedeemer {
        async fn redeem(&self, condition_id: &str) -> anyhow::Result<RedemptionResult> {
            self.calls.lock().unwrap().push(condition_id.to_string());
            Ok(RedemptionResult { ok: true, err: None })
        }
    }

    fn position(condition_id: &str, cur_price: f64, redeemable: Option<bool>) -> Position {
        Position {
            condition_id: condition_id.to_string(),
            token_id: format!("{condition_id}-tok"),
            size: 10.0,
            avg_price: 0.5,
            cur_price,
            redeemable,
        }
    }

    #[tokio::test]
    async fn redeems_only_terminal_and_redeemable_positions() {
        let book = FakePositionBook(vec![
            position("0xa", 0.995, Some(true)),
            position("0xb", 0.50, Some(true)),
            position("0xc", 0.005, Some(true)),
            position("0xd", 0.995, Some(false)),
            position("0xe", 0.995, None),
        ]);
        let redeemer = Arc::new(RecordingRedeemer { calls: Mutex::new(vec![]) });
        let controller = RedemptionController::new(Arc::new(book), redeemer.clone());

        let result = controller.run_cycle().await.unwrap();
        assert_eq!(result.groups_attempted, 2);
        assert_eq!(result.groups_succeeded, 2);
        let mut calls = redeemer.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["0xa".to_string(), "0xc".to_string()]);
    }

    #[tokio::test]
    async fn groups_multiple_positions_under_the_same_condition_into_one_redeem_call() {
        let book = FakePositionBook(vec![position("0xa", 0.995, Some(true)), position("0xa", 0.995, Some(true))]);
        let redeemer = Arc::new(RecordingRedeemer { calls: Mutex::new(vec![]) });
        let controller = RedemptionController::new(Arc::new(book), redeemer.clone());

        let result = controller.run_cycle().await.unwrap();
        assert_eq!(result.groups_attempted, 1);
        assert_eq!(redeemer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_redeemable_positions_makes_no_calls() {
        let book = FakePositionBook(vec![position("0xa", 0.50, Some(true))]);
        let redeemer = Arc::new(RecordingRedeemer { calls: Mutex::new(vec![]) });
        let controller = RedemptionController::new(Arc::new(book), redeemer.clone());

        let result = controller.run_cycle().await.unwrap();
        assert_eq!(result.groups_attempted, 0);
        assert!(redeemer.calls.lock().unwrap().is_empty());
    }
}
