//! Fetch, ensemble, and cache forecasts and observations from two
//! providers; expose sigma per lead-day. Ensemble + cache logic is
//! internal; the two providers are injected as `ForecastProvider` ports so
//! the core never depends on a concrete weather API.

use crate::domain::{Forecast, Station};
use crate::ports::ForecastProvider;
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const FORECAST_TTL: Duration = Duration::from_secs(30 * 60);

fn base_sigma(lead_days: i64) -> f64 {
    match lead_days {
        0 => 1.5,
        1 => 2.5,
        2 => 3.5,
        3 => 4.0,
        4 => 4.5,
        5 => 5.0,
        6 => 5.5,
        7 => 6.0,
        _ => 7.0,
    }
}

pub fn lead_days(target_date: NaiveDate, now: NaiveDateTime) -> i64 {
    let target_end = target_date.and_hms_opt(23, 59, 59).unwrap();
    let delta = target_end.signed_duration_since(now);
    let days = (delta.num_seconds() as f64 / 86_400.0).ceil() as i64;
    days.max(0)
}

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
}

pub struct ForecastService {
    primary: Arc<dyn ForecastProvider>,
    secondary: Arc<dyn ForecastProvider>,
    forecast_cache: Mutex<HashMap<(String, NaiveDate), CacheEntry<Option<Forecast>>>>,
}

impl ForecastService {
    pub fn new(primary: Arc<dyn ForecastProvider>, secondary: Arc<dyn ForecastProvider>) -> Self {
        ForecastService {
            primary,
            secondary,
            forecast_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn sigma_lookup(&self, lead_days: i64) -> f64 {
        base_sigma(lead_days)
    }

    /// Fetch from two independent providers in parallel. Fail-soft: if
    /// either returns nothing, use the other. If both fail, return None.
    /// Network errors and malformed payloads are treated as "no data" and
    /// logged, never propagated to the caller.
    pub async fn get_ensemble_forecast(
        &self,
        station: &Station,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Option<Forecast> {
        let cache_key = (station.code.clone(), date);
        {
            let cache = self.forecast_cache.lock().await;
            if let Some(entry) = cache.get(&cache_key) {
                if entry.fetched_at.elapsed() < FORECAST_TTL {
                    return entry.value.clone();
                }
            }
        }

        let (a, b) = tokio::join!(
            self.primary.fetch(station.latitude, station.longitude, date),
            self.secondary.fetch(station.latitude, station.longitude, date),
        );

        let a = a.unwrap_or_else(|e| {
            tracing::warn!("primary forecast provider failed for {}: {}", station.code, e);
            None
        });
        let b = b.unwrap_or_else(|e| {
            tracing::warn!(
                "secondary forecast provider failed for {}: {}",
                station.code,
                e
            );
            None
        });

        let lead = lead_days(date, now);
        let forecast = match (a, b) {
            (Some(a), Some(b)) => {
                let high = mean_of([a.high, b.high]);
                let low = mean_of([a.low, b.low]);
                let spread_high = spread_of([a.high, b.high]);
                let spread_low = spread_of([a.low, b.low]);
                Some(Forecast {
                    station_code: station.code.clone(),
                    target_date: date,
                    forecast_high: high,
                    forecast_low: low,
                    sigma_high: spread_high.map(|s| base_sigma(lead) + 0.35 * s),
                    sigma_low: spread_low.map(|s| base_sigma(lead) + 0.35 * s),
                    source: "Ensemble(A+B)".to_string(),
                    retrieved_at: now,
                    lead_days: lead,
                })
            }
            (Some(single), None) | (None, Some(single)) => Some(Forecast {
                station_code: station.code.clone(),
                target_date: date,
                forecast_high: single.high,
                forecast_low: single.low,
                sigma_high: None,
                sigma_low: None,
                source: single.source,
                retrieved_at: now,
                lead_days: lead,
            }),
            (None, None) => None,
        };

        let mut cache = self.forecast_cache.lock().await;
        cache.insert(
            cache_key,
            CacheEntry {
                value: forecast.clone(),
                fetched_at: Instant::now(),
            },
        );
        forecast
    }
}

fn mean_of(values: [Option<f64>; 2]) -> Option<f64> {
    let defined: Vec<f64> = values.into_iter().flatten().collect();
    if defined.is_empty() {
        None
    } else {
        Some(defined.iter().sum::<f64>() / defined.len() as f64)
    }
}

fn spread_of(values: [Option<f64>; 2]) -> Option<f64> {
    match values {
        [Some(a), Some(b)] => Some((a - b).abs()),
        _ => None,
    }
}

pub async fn get_daily_max_so_far(hourly: &[f64], current_local_hour: usize) -> Option<f64> {
    if current_local_hour == 0 || hourly.is_empty() {
        return None;
    }
    let upper = current_local_hour.min(hourly.len());
    hourly[..upper].iter().cloned().fold(None, |acc, v| {
        Some(acc.map_or(v, |m: f64| m.max(v)))
    })
}

pub fn now_utc_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigma_table_matches_spec() {
        assert_eq!(base_sigma(0), 1.5);
        assert_eq!(base_sigma(3), 4.0);
        assert_eq!(base_sigma(7), 6.0);
        assert_eq!(base_sigma(8), 7.0);
        assert_eq!(base_sigma(100), 7.0);
    }

    #[test]
    fn lead_days_clamped_at_zero() {
        let target = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        let now = target.and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(lead_days(target, now), 1);

        let now_after = target
            .succ_opt()
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(lead_days(target, now_after), 0);
    }

    #[tokio::test]
    async fn max_so_far_undefined_before_any_hours_elapsed() {
        assert_eq!(get_daily_max_so_far(&[60.0, 62.0], 0).await, None);
    }

    #[tokio::test]
    async fn max_so_far_is_max_over_elapsed_hours() {
        assert_eq!(get_daily_max_so_far(&[55.0, 62.0, 58.0, 70.0], 3).await, Some(62.0));
    }
}
