//! Core data model: stations, markets, bins, forecasts, and the in-memory
//! aggregates (`ExposureBook`, `PositionPeak`) owned by the Risk Manager and
//! Position Manager respectively.

use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable configured record, process-wide from startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub code: String,
    pub display_name: String,
    pub city: String,
    pub region: String,
    pub timezone: Tz,
    pub latitude: f64,
    pub longitude: f64,
    pub resolution_source_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    DailyMaxTemp,
    DailyMinTemp,
    Rainfall,
    Snowfall,
}

impl Metric {
    /// Precipitation metrics are parsed but never priced.
    pub fn is_priceable(&self) -> bool {
        matches!(self, Metric::DailyMaxTemp | Metric::DailyMinTemp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Fahrenheit,
    Celsius,
    Inches,
    Centimeters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Active,
    Resolved,
    Skipped,
    Expired,
}

impl MarketStatus {
    /// Status transitions only forward: Active -> {Resolved, Skipped, Expired}.
    pub fn can_transition_to(&self, next: MarketStatus) -> bool {
        match self {
            MarketStatus::Active => matches!(
                next,
                MarketStatus::Resolved | MarketStatus::Skipped | MarketStatus::Expired
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// A single outcome token of a Market.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub outcome_id: String,
    pub token_id: String,
    pub label: String,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub is_floor: bool,
    pub is_ceiling: bool,
}

impl Bin {
    pub fn is_valid(&self) -> bool {
        if self.is_floor && self.lower.is_some() {
            return false;
        }
        if self.is_ceiling && self.upper.is_some() {
            return false;
        }
        if !self.is_floor && !self.is_ceiling {
            match (self.lower, self.upper) {
                (Some(l), Some(u)) => l <= u,
                _ => false,
            }
        } else {
            true
        }
    }
}

/// A parsed prediction market.
#[derive(Debug, Clone)]
pub struct Market {
    pub condition_id: String,
    pub slug: String,
    pub title: String,
    pub station_code: String,
    pub region: String,
    pub target_date: NaiveDate,
    pub timezone: Tz,
    pub metric: Metric,
    pub unit: Unit,
    pub precision: i32,
    pub resolution_source_url: String,
    pub bins: Vec<Bin>,
    pub parser_confidence: f64,
    pub status: MarketStatus,
    pub resolves_at: NaiveDateTime,
    pub parsed_at: NaiveDateTime,
}

impl Market {
    /// Bins non-overlapping, collectively exhaustive: exactly one floor,
    /// exactly one ceiling, sorted floor -> ascending ranges -> ceiling.
    pub fn bins_well_formed(&self) -> bool {
        let floors = self.bins.iter().filter(|b| b.is_floor).count();
        let ceilings = self.bins.iter().filter(|b| b.is_ceiling).count();
        if floors != 1 || ceilings != 1 {
            return false;
        }
        if !self.bins.iter().all(Bin::is_valid) {
            return false;
        }
        self.bins_sorted_correctly()
    }

    fn bins_sorted_correctly(&self) -> bool {
        if self.bins.is_empty() {
            return false;
        }
        if !self.bins[0].is_floor {
            return false;
        }
        if !self.bins[self.bins.len() - 1].is_ceiling {
            return false;
        }
        let mut last_lower = f64::NEG_INFINITY;
        for bin in &self.bins[1..self.bins.len() - 1] {
            let lower = bin.lower.unwrap_or(f64::NEG_INFINITY);
            if lower < last_lower {
                return false;
            }
            last_lower = lower;
        }
        true
    }

    pub fn set_status(&mut self, next: MarketStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Best-available ensemble forecast for (station, date).
#[derive(Debug, Clone)]
pub struct Forecast {
    pub station_code: String,
    pub target_date: NaiveDate,
    pub forecast_high: Option<f64>,
    pub forecast_low: Option<f64>,
    pub sigma_high: Option<f64>,
    pub sigma_low: Option<f64>,
    pub source: String,
    pub retrieved_at: NaiveDateTime,
    pub lead_days: i64,
}

impl Forecast {
    /// mu for the given metric, if defined.
    pub fn mu(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::DailyMaxTemp => self.forecast_high,
            Metric::DailyMinTemp => self.forecast_low,
            _ => None,
        }
    }

    pub fn sigma(&self, metric: Metric, table_lookup: f64) -> f64 {
        match metric {
            Metric::DailyMaxTemp => self.sigma_high.unwrap_or(table_lookup),
            Metric::DailyMinTemp => self.sigma_low.unwrap_or(table_lookup),
            _ => table_lookup,
        }
    }
}

/// Station observation for day-of conditioning.
#[derive(Debug, Clone)]
pub struct Observation {
    pub station_code: String,
    pub timestamp: NaiveDateTime,
    pub current_temp: f64,
    pub daily_max_so_far: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BinProbability {
    pub outcome_id: String,
    pub label: String,
    pub fair_probability: f64,
    pub market_price: f64,
    pub edge: f64,
    pub is_possible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeSignal {
    pub condition_id: String,
    pub token_id: String,
    pub side: Side,
    pub fair_probability: f64,
    pub market_price: f64,
    pub edge: f64,
    pub recommended_size_usd: f64,
    pub reason: String,
    pub forecast_source: String,
    pub max_so_far: Option<f64>,
    pub generated_at: NaiveDateTime,
}

impl TradeSignal {
    pub fn key(&self) -> (String, String) {
        (self.condition_id.clone(), self.token_id.clone())
    }
}

/// In-memory keyed exposure aggregates, owned exclusively by the Risk
/// Manager. Single instance per process; reset daily by the monitor loop.
#[derive(Debug, Clone)]
pub struct ExposureBook {
    pub per_market: HashMap<String, f64>,
    pub per_region: HashMap<String, f64>,
    pub per_date: HashMap<NaiveDate, f64>,
    pub realized_daily_pnl: f64,
    pub last_pnl_reset: NaiveDate,
    pub last_data_update: Option<NaiveDateTime>,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
}

impl ExposureBook {
    pub fn new(today: NaiveDate) -> Self {
        ExposureBook {
            per_market: HashMap::new(),
            per_region: HashMap::new(),
            per_date: HashMap::new(),
            realized_daily_pnl: 0.0,
            last_pnl_reset: today,
            last_data_update: None,
            is_paused: false,
            pause_reason: None,
        }
    }
}

/// Peak-tracking state for a single open position, keyed by market
/// condition id, persisted via StateStore with a 5-second debounce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionPeak {
    pub peak_price: f64,
    pub peak_pnl_percent: f64,
}

pub type PositionPeakMap = HashMap<String, PositionPeak>;

#[cfg(test)]
mod tests {
    use super::*;

    fn floor_bin() -> Bin {
        Bin {
            outcome_id: "o1".into(),
            token_id: "t1".into(),
            label: "<=49F".into(),
            lower: None,
            upper: Some(49.0),
            is_floor: true,
            is_ceiling: false,
        }
    }

    fn ceiling_bin() -> Bin {
        Bin {
            outcome_id: "o2".into(),
            token_id: "t2".into(),
            label: ">=54F".into(),
            lower: Some(54.0),
            upper: None,
            is_floor: false,
            is_ceiling: true,
        }
    }

    #[test]
    fn floor_and_ceiling_bins_valid() {
        assert!(floor_bin().is_valid());
        assert!(ceiling_bin().is_valid());
    }

    #[test]
    fn range_bin_requires_lower_le_upper() {
        let bin = Bin {
            outcome_id: "o3".into(),
            token_id: "t3".into(),
            label: "50-51F".into(),
            lower: Some(51.0),
            upper: Some(50.0),
            is_floor: false,
            is_ceiling: false,
        };
        assert!(!bin.is_valid());
    }

    #[test]
    fn status_transitions_only_forward() {
        assert!(MarketStatus::Active.can_transition_to(MarketStatus::Resolved));
        assert!(!MarketStatus::Resolved.can_transition_to(MarketStatus::Active));
        assert!(!MarketStatus::Expired.can_transition_to(MarketStatus::Active));
    }
}
