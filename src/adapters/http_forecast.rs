//! Two independent `ForecastProvider` implementations so the forecast
//! service can ensemble across vendors rather than trust one model
//! run. Same exponential-backoff retry wrapper as the order venue
//! adapter, applied here to forecast HTTP calls.

use crate::ports::{ForecastProvider, RawForecast};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

async fn get_with_retry<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: &str,
    max_retries: u32,
) -> Result<T> {
    let mut last_err = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_millis(500 * 2u64.pow(attempt - 1));
            debug!("retrying {} after {:?} (attempt {})", url, delay, attempt + 1);
            tokio::time::sleep(delay).await;
        }
        match client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return resp.json::<T>().await.context("failed to parse forecast response");
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body = resp.text().await.unwrap_or_default();
                    warn!("forecast provider {} returned {}: {}", url, status, body);
                    last_err = Some(anyhow::anyhow!("{} returned {}: {}", url, status, body));
                    continue;
                }
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("{} returned {}: {}", url, status, body);
            }
            Err(e) => {
                warn!("forecast provider request failed: {}", e);
                last_err = Some(e.into());
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("forecast provider request failed after retries")))
}

/// Primary provider: NOAA `api.weather.gov` gridpoint forecast.
pub struct NoaaForecastProvider {
    client: Client,
    base_url: String,
}

impl NoaaForecastProvider {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("weather-trading-agent/0.1")
            .build()
            .context("failed to build NOAA HTTP client")?;
        Ok(NoaaForecastProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    fn with_client(client: Client, base_url: String) -> Self {
        NoaaForecastProvider { client, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct PointsResponse {
    properties: PointsProperties,
}

#[derive(Debug, Deserialize)]
struct PointsProperties {
    forecast: String,
}

#[derive(Debug, Deserialize)]
struct GridForecastResponse {
    properties: GridForecastProperties,
}

#[derive(Debug, Deserialize)]
struct GridForecastProperties {
    periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Deserialize)]
struct ForecastPeriod {
    #[serde(rename = "startTime")]
    start_time: String,
    #[serde(rename = "isDaytime")]
    is_daytime: bool,
    temperature: f64,
}

#[async_trait]
impl ForecastProvider for NoaaForecastProvider {
    async fn fetch(&self, lat: f64, lon: f64, date: NaiveDate) -> Result<Option<RawForecast>> {
        let points_url = format!("{}/points/{:.4},{:.4}", self.base_url, lat, lon);
        let points: PointsResponse = get_with_retry(&self.client, &points_url, 2).await?;
        let grid: GridForecastResponse = get_with_retry(&self.client, &points.properties.forecast, 2).await?;

        let mut high: Option<f64> = None;
        let mut low: Option<f64> = None;
        for period in &grid.properties.periods {
            let Some(period_date) = period.start_time.get(0..10).and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()) else {
                continue;
            };
            if period_date != date {
                continue;
            }
            if period.is_daytime {
                high = Some(high.map_or(period.temperature, |h: f64| h.max(period.temperature)));
            } else {
                low = Some(low.map_or(period.temperature, |l: f64| l.min(period.temperature)));
            }
        }

        if high.is_none() && low.is_none() {
            return Ok(None);
        }

        Ok(Some(RawForecast {
            high,
            low,
            source: "NOAA".to_string(),
        }))
    }
}

/// Secondary provider: Open-Meteo daily forecast API.
pub struct OpenMeteoForecastProvider {
    client: Client,
    base_url: String,
}

impl OpenMeteoForecastProvider {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build Open-Meteo HTTP client")?;
        Ok(OpenMeteoForecastProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    fn with_client(client: Client, base_url: String) -> Self {
        OpenMeteoForecastProvider { client, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    daily: OpenMeteoDaily,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoDaily {
    time: Vec<String>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
}

#[async_trait]
impl ForecastProvider for OpenMeteoForecastProvider {
    async fn fetch(&self, lat: f64, lon: f64, date: NaiveDate) -> Result<Option<RawForecast>> {
        let url = format!(
            "{}/v1/forecast?latitude={:.4}&longitude={:.4}&daily=temperature_2m_max,temperature_2m_min&temperature_unit=fahrenheit&timezone=auto",
            self.base_url, lat, lon
        );
        let resp: OpenMeteoResponse = get_with_retry(&self.client, &url, 2).await?;
        let date_str = date.format("%Y-%m-%d").to_string();
        let Some(idx) = resp.daily.time.iter().position(|d| *d == date_str) else {
            return Ok(None);
        };
        let high = resp.daily.temperature_2m_max.get(idx).copied().flatten();
        let low = resp.daily.temperature_2m_min.get(idx).copied().flatten();
        if high.is_none() && low.is_none() {
            return Ok(None);
        }
        Ok(Some(RawForecast {
            high,
            low,
            source: "Open-Meteo".to_string(),
        }))
    }
}
