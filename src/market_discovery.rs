//! Polls the venue catalog, extracts station/date/metric/bins, upserts
//! into the market registry, and marks expired markets. Recognizes four
//! bin-label shapes (`<= N`, `>= N`, `N-M`, `N`) and assigns an explicit
//! confidence score per parsed event.

use crate::domain::{Bin, Market, MarketStatus, Metric, Station, Unit};
use crate::ports::{MarketCatalog, RawEvent};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct MarketRegistry {
    markets: HashMap<String, Market>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        MarketRegistry {
            markets: HashMap::new(),
        }
    }

    pub fn get(&self, condition_id: &str) -> Option<&Market> {
        self.markets.get(condition_id)
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    /// Upsert preserving status on update.
    pub fn upsert(&mut self, mut market: Market) {
        if let Some(existing) = self.markets.get(&market.condition_id) {
            market.status = existing.status;
        }
        self.markets.insert(market.condition_id.clone(), market);
    }

    pub fn mark_expired(&mut self, now: NaiveDateTime) {
        for market in self.markets.values_mut() {
            if market.status == MarketStatus::Active && market.resolves_at < now {
                market.set_status(MarketStatus::Expired);
            }
        }
    }

    pub fn get_upcoming(&self, max_lead_days: i64, now: NaiveDateTime) -> Vec<&Market> {
        let horizon = now + chrono::Duration::days(max_lead_days);
        self.markets
            .values()
            .filter(|m| m.status == MarketStatus::Active && m.resolves_at >= now && m.resolves_at <= horizon)
            .collect()
    }

    pub fn all_token_ids(&self) -> Vec<String> {
        self.markets
            .values()
            .flat_map(|m| m.bins.iter().map(|b| b.token_id.clone()))
            .collect()
    }
}

impl Default for MarketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ParsedMarket {
    pub station_code: String,
    pub target_date: NaiveDate,
    pub metric: Metric,
    pub unit: Unit,
    pub bins: Vec<(String, String, String)>, // (outcome placeholder label, shape-derived label, raw)
    pub confidence: f64,
}

struct ParsedBinShape {
    label: String,
    lower: Option<f64>,
    upper: Option<f64>,
    is_floor: bool,
    is_ceiling: bool,
}

/// Recognizes the four bin label shapes: "<= N", ">= N", "N-M", "N".
fn parse_bin_label(text: &str) -> Option<ParsedBinShape> {
    let le_re = Regex::new(r"(?i)^\s*(?:<=|≤)\s*(-?\d+(?:\.\d+)?)").unwrap();
    let ge_re = Regex::new(r"(?i)^\s*(?:>=|≥)\s*(-?\d+(?:\.\d+)?)").unwrap();
    let range_re = Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*(?:-|–|to)\s*(-?\d+(?:\.\d+)?)").unwrap();
    let single_re = Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*$").unwrap();

    if let Some(c) = le_re.captures(text) {
        let n: f64 = c[1].parse().ok()?;
        return Some(ParsedBinShape {
            label: text.trim().to_string(),
            lower: None,
            upper: Some(n),
            is_floor: true,
            is_ceiling: false,
        });
    }
    if let Some(c) = ge_re.captures(text) {
        let n: f64 = c[1].parse().ok()?;
        return Some(ParsedBinShape {
            label: text.trim().to_string(),
            lower: Some(n),
            upper: None,
            is_floor: false,
            is_ceiling: true,
        });
    }
    if let Some(c) = range_re.captures(text) {
        let lo: f64 = c[1].parse().ok()?;
        let hi: f64 = c[2].parse().ok()?;
        return Some(ParsedBinShape {
            label: text.trim().to_string(),
            lower: Some(lo.min(hi)),
            upper: Some(lo.max(hi)),
            is_floor: false,
            is_ceiling: false,
        });
    }
    if let Some(c) = single_re.captures(text.trim()) {
        let n: f64 = c[1].parse().ok()?;
        return Some(ParsedBinShape {
            label: text.trim().to_string(),
            lower: Some(n),
            upper: Some(n),
            is_floor: false,
            is_ceiling: false,
        });
    }
    None
}

fn sort_bins(mut bins: Vec<Bin>) -> Vec<Bin> {
    bins.sort_by(|a, b| {
        let key = |bin: &Bin| -> (i32, f64) {
            if bin.is_floor {
                (0, f64::NEG_INFINITY)
            } else if bin.is_ceiling {
                (2, f64::INFINITY)
            } else {
                (1, bin.lower.unwrap_or(0.0))
            }
        };
        key(a).partial_cmp(&key(b)).unwrap_or(std::cmp::Ordering::Equal)
    });
    bins
}

/// Infers `(metric, unit)` from event text. Temperature keywords dominate;
/// precipitation is recognized but never priced by the engine.
fn infer_metric_unit(title: &str) -> Option<(Metric, Unit)> {
    let lower = title.to_lowercase();
    if lower.contains("snowfall") || lower.contains("snow") {
        Some((Metric::Snowfall, Unit::Inches))
    } else if lower.contains("rainfall") || lower.contains("rain") || lower.contains("precipitation") {
        Some((Metric::Rainfall, Unit::Inches))
    } else if lower.contains("lowest") || lower.contains("minimum") || lower.contains("low temp") {
        Some((Metric::DailyMinTemp, Unit::Fahrenheit))
    } else if lower.contains("highest") || lower.contains("maximum") || lower.contains("high temp") || lower.contains("temp") {
        Some((Metric::DailyMaxTemp, Unit::Fahrenheit))
    } else {
        None
    }
}

fn extract_date(text: &str) -> Option<NaiveDate> {
    let iso_re = Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap();
    if let Some(c) = iso_re.captures(text) {
        let y: i32 = c[1].parse().ok()?;
        let m: u32 = c[2].parse().ok()?;
        let d: u32 = c[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }
    None
}

/// Extra name forms a title might use for a station's city, beyond the
/// canonical name in `Station::city` (e.g. "NYC" for New York City).
fn city_aliases(code: &str) -> &'static [&'static str] {
    match code {
        "KNYC" => &["new york", "nyc"],
        "KLAX" => &["l.a."],
        "KDCA" => &["washington dc", "washington, d.c.", "d.c."],
        _ => &[],
    }
}

fn contains_word(haystack_lower: &str, needle: &str) -> bool {
    let pattern = format!(r"\b{}\b", regex::escape(needle));
    Regex::new(&pattern).map(|re| re.is_match(haystack_lower)).unwrap_or(false)
}

pub struct StationDirectory {
    stations: Vec<Station>,
}

impl StationDirectory {
    pub fn new(stations: Vec<Station>) -> Self {
        StationDirectory { stations }
    }

    fn find_by_city(&self, title_lower: &str) -> Option<&Station> {
        self.stations.iter().find(|s| {
            contains_word(title_lower, &s.city.to_lowercase())
                || city_aliases(&s.code).iter().any(|alias| contains_word(title_lower, alias))
        })
    }
}

/// Parses an event title/description into `(stationCode, targetDate,
/// metric, unit, bins)` plus a confidence score. Unknown city caps
/// confidence at 0.6.
pub fn parse_event(event: &RawEvent, stations: &StationDirectory) -> Option<(Market, f64)> {
    let title_lower = event.title.to_lowercase();

    let mut confidence: f64 = 0.9;

    // A station match is required to populate region/timezone metadata, so
    // an unrecognized city yields no market regardless of confidence —
    // stricter than "kept only if still over threshold" for the
    // pathological case where no station can be identified at all.
    let station = stations.find_by_city(&title_lower)?;

    let target_date = extract_date(&event.title)
        .or_else(|| extract_date(&event.description))
        .or_else(|| event.end_date_iso.as_deref().and_then(extract_date))?;
    let (metric, unit) = infer_metric_unit(&event.title)?;

    let mut bins = Vec::new();
    for token in &event.tokens {
        if let Some(shape) = parse_bin_label(&token.outcome) {
            bins.push(Bin {
                outcome_id: token.token_id.clone(),
                token_id: token.token_id.clone(),
                label: shape.label,
                lower: shape.lower,
                upper: shape.upper,
                is_floor: shape.is_floor,
                is_ceiling: shape.is_ceiling,
            });
        } else {
            confidence -= 0.1;
        }
    }

    if bins.is_empty() {
        return None;
    }

    let has_floor = bins.iter().any(|b| b.is_floor);
    let has_ceiling = bins.iter().any(|b| b.is_ceiling);
    if !has_floor || !has_ceiling {
        confidence -= 0.2;
    }

    let bins = sort_bins(bins);

    let resolves_at = target_date.and_hms_opt(23, 59, 59).unwrap();
    let market = Market {
        condition_id: event.condition_id.clone(),
        slug: event.slug.clone(),
        title: event.title.clone(),
        station_code: station.code.clone(),
        region: station.region.clone(),
        target_date,
        timezone: station.timezone,
        metric,
        unit,
        precision: 1,
        resolution_source_url: station.resolution_source_url.clone(),
        bins,
        parser_confidence: confidence.clamp(0.0, 1.0),
        status: MarketStatus::Active,
        resolves_at,
        parsed_at: chrono::Utc::now().naive_utc(),
    };

    Some((market, confidence))
}

pub struct Discovery {
    catalog: Arc<dyn MarketCatalog>,
    stations: StationDirectory,
    min_confidence: f64,
}

impl Discovery {
    pub fn new(catalog: Arc<dyn MarketCatalog>, stations: StationDirectory, min_confidence: f64) -> Self {
        Discovery {
            catalog,
            stations,
            min_confidence,
        }
    }

    /// Fetch the venue's weather-tagged catalog, parse each event,
    /// upsert valid markets, mark expired markets. Idempotent: running
    /// twice against identical source data leaves the registry identical.
    pub async fn discover(&self, registry: &mut MarketRegistry, now: NaiveDateTime) -> anyhow::Result<usize> {
        let events = match self.catalog.list_weather_events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("discovery: failed to list weather events: {}", e);
                return Ok(0);
            }
        };

        let mut admitted = 0;
        for event in &events {
            match parse_event(event, &self.stations) {
                Some((market, confidence)) if confidence >= self.min_confidence && market.bins_well_formed() => {
                    registry.upsert(market);
                    admitted += 1;
                }
                Some((market, confidence)) if confidence >= self.min_confidence => {
                    warn!(
                        "discovery: dropping '{}' with malformed bins (floor/ceiling/sort invariant violated)",
                        market.title
                    );
                }
                Some((_, confidence)) => {
                    info!(
                        "discovery: dropping '{}' below confidence threshold ({:.2})",
                        event.title, confidence
                    );
                }
                None => {}
            }
        }

        registry.mark_expired(now);
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::RawToken;

    fn station() -> Station {
        Station {
            code: "KNYC".into(),
            display_name: "New York City".into(),
            city: "nyc".into(),
            region: "northeast".into(),
            timezone: chrono_tz::America::New_York,
            latitude: 40.78,
            longitude: -73.97,
            resolution_source_url: "https://weather.example/knyc".into(),
        }
    }

    fn event() -> RawEvent {
        RawEvent {
            condition_id: "0xabc".into(),
            slug: "highest-temp-nyc-2026-01-14".into(),
            title: "Highest temperature in NYC on 2026-01-14?".into(),
            description: String::new(),
            tokens: vec![
                RawToken {
                    token_id: "t_floor".into(),
                    outcome: "<=49".into(),
                },
                RawToken {
                    token_id: "t_mid".into(),
                    outcome: "50-51".into(),
                },
                RawToken {
                    token_id: "t_ceil".into(),
                    outcome: ">=54".into(),
                },
            ],
            end_date_iso: None,
        }
    }

    #[test]
    fn parses_all_four_bin_shapes() {
        let le = parse_bin_label("<=49").unwrap();
        assert!(le.is_floor);
        assert_eq!(le.upper, Some(49.0));

        let ge = parse_bin_label(">=54").unwrap();
        assert!(ge.is_ceiling);
        assert_eq!(ge.lower, Some(54.0));

        let range = parse_bin_label("50-51").unwrap();
        assert_eq!(range.lower, Some(50.0));
        assert_eq!(range.upper, Some(51.0));

        let single = parse_bin_label("52").unwrap();
        assert_eq!(single.lower, Some(52.0));
        assert_eq!(single.upper, Some(52.0));
    }

    #[test]
    fn parse_event_admits_known_station_above_threshold() {
        let stations = StationDirectory::new(vec![station()]);
        let (market, confidence) = parse_event(&event(), &stations).unwrap();
        assert_eq!(market.station_code, "KNYC");
        assert_eq!(market.target_date, NaiveDate::from_ymd_opt(2026, 1, 14).unwrap());
        assert!(confidence >= 0.8);
        assert_eq!(market.bins.len(), 3);
        assert!(market.bins[0].is_floor);
        assert!(market.bins[2].is_ceiling);
    }

    #[test]
    fn parse_event_rejects_unknown_city() {
        let stations = StationDirectory::new(vec![]);
        assert!(parse_event(&event(), &stations).is_none());
    }

    #[test]
    fn registry_upsert_preserves_status_on_update() {
        let mut registry = MarketRegistry::new();
        let stations = StationDirectory::new(vec![station()]);
        let (mut market, _) = parse_event(&event(), &stations).unwrap();
        registry.upsert(market.clone());
        registry
            .markets
            .get_mut(&market.condition_id)
            .unwrap()
            .set_status(MarketStatus::Resolved);

        market.title = "Updated title".to_string();
        registry.upsert(market);

        assert_eq!(
            registry.get("0xabc").unwrap().status,
            MarketStatus::Resolved
        );
        assert_eq!(registry.get("0xabc").unwrap().title, "Updated title");
    }

    #[test]
    fn mark_expired_transitions_active_past_resolve_time() {
        let mut registry = MarketRegistry::new();
        let stations = StationDirectory::new(vec![station()]);
        let (market, _) = parse_event(&event(), &stations).unwrap();
        registry.upsert(market);
        let past_resolution = NaiveDate::from_ymd_opt(2026, 2, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        registry.mark_expired(past_resolution);
        assert_eq!(registry.get("0xabc").unwrap().status, MarketStatus::Expired);
    }

    fn knyc_canonical_city() -> Station {
        Station {
            code: "KNYC".into(),
            display_name: "New York City".into(),
            city: "new york".into(),
            region: "northeast".into(),
            timezone: chrono_tz::America::New_York,
            latitude: 40.78,
            longitude: -73.97,
            resolution_source_url: "https://weather.example/knyc".into(),
        }
    }

    #[test]
    fn find_by_city_matches_nyc_alias_against_canonical_new_york_station() {
        let stations = StationDirectory::new(vec![knyc_canonical_city()]);
        let (market, _) = parse_event(&event(), &stations).unwrap();
        assert_eq!(market.station_code, "KNYC");
    }

    #[test]
    fn find_by_city_does_not_match_unrelated_substring() {
        let stations = StationDirectory::new(vec![knyc_canonical_city()]);
        let mut e = event();
        e.title = "Highest temperature in Albany on 2026-01-14?".into();
        assert!(parse_event(&e, &stations).is_none());
    }

    #[test]
    fn parse_event_falls_back_to_end_date_iso_when_title_has_no_embedded_date() {
        let stations = StationDirectory::new(vec![station()]);
        let mut e = event();
        e.title = "Highest temperature in NYC on January 14?".into();
        e.end_date_iso = Some("2026-01-14T00:00:00Z".into());
        let (market, _) = parse_event(&e, &stations).unwrap();
        assert_eq!(market.target_date, NaiveDate::from_ymd_opt(2026, 1, 14).unwrap());
    }

    #[test]
    fn parse_event_with_no_date_anywhere_is_rejected() {
        let stations = StationDirectory::new(vec![station()]);
        let mut e = event();
        e.title = "Highest temperature in NYC on January 14?".into();
        assert!(parse_event(&e, &stations).is_none());
    }

    #[tokio::test]
    async fn discover_drops_events_with_malformed_bins() {
        struct OneBinCatalog;
        #[async_trait::async_trait]
        impl MarketCatalog for OneBinCatalog {
            async fn list_weather_events(&self) -> anyhow::Result<Vec<RawEvent>> {
                Ok(vec![RawEvent {
                    condition_id: "0xonebin".into(),
                    slug: "one-bin".into(),
                    title: "Highest temperature in NYC on 2026-01-14?".into(),
                    description: String::new(),
                    tokens: vec![RawToken {
                        token_id: "t_floor".into(),
                        outcome: "<=49".into(),
                    }],
                    end_date_iso: None,
                }])
            }
            async fn prices(&self, _token_ids: &[String]) -> anyhow::Result<HashMap<String, f64>> {
                Ok(HashMap::new())
            }
        }

        let discovery = Discovery::new(Arc::new(OneBinCatalog), StationDirectory::new(vec![station()]), 0.5);
        let mut registry = MarketRegistry::new();
        let now = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let admitted = discovery.discover(&mut registry, now).await.unwrap();
        assert_eq!(admitted, 0);
        assert!(registry.is_empty());
    }
}
