//! `ObservationProvider` backed by NOAA's hourly station observation feed,
//! used for day-of conditioning (the running max/min so far today).

use crate::ports::ObservationProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

async fn get_with_retry<T: serde::de::DeserializeOwned>(client: &Client, url: &str, max_retries: u32) -> Result<T> {
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
                    return resp.json::<T>().await.context("failed to parse observation response");
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} returned {}", url, status));
                    continue;
                }
                anyhow::bail!("{} returned {}", url, status);
            }
            Err(e) => {
                warn!("observation provider request failed: {}", e);
                last_err = Some(e.into());
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("observation provider request failed after retries")))
}

pub struct NoaaObservationProvider {
    client: Client,
    base_url: String,
}

impl NoaaObservationProvider {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("weather-trading-agent/0.1")
            .build()
            .context("failed to build NOAA observation HTTP client")?;
        Ok(NoaaObservationProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    fn with_client(client: Client, base_url: String) -> Self {
        NoaaObservationProvider { client, base_url }
    }

    async fn nearest_station_id(&self, lat: f64, lon: f64) -> Result<String> {
        let points_url = format!("{}/points/{:.4},{:.4}/stations", self.base_url, lat, lon);
        let resp: StationsResponse = get_with_retry(&self.client, &points_url, 2).await?;
        resp.observation_stations
            .into_iter()
            .next()
            .context("no observation stations returned for point")
    }
}

#[derive(Debug, Deserialize)]
struct StationsResponse {
    #[serde(rename = "observationStations")]
    observation_stations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    features: Vec<ObservationFeature>,
}

#[derive(Debug, Deserialize)]
struct ObservationFeature {
    properties: ObservationProperties,
}

#[derive(Debug, Deserialize)]
struct ObservationProperties {
    timestamp: String,
    temperature: TemperatureValue,
}

#[derive(Debug, Deserialize)]
struct TemperatureValue {
    value: Option<f64>,
}

#[async_trait]
impl ObservationProvider for NoaaObservationProvider {
    async fn hourly_today(&self, lat: f64, lon: f64, tz: Tz) -> Result<Vec<f64>> {
        let station_url = self.nearest_station_id(lat, lon).await?;
        let obs_url = format!("{}/observations?limit=48", station_url);
        let resp: ObservationsResponse = get_with_retry(&self.client, &obs_url, 2).await?;

        let today: NaiveDate = Utc::now().with_timezone(&tz).date_naive();
        let mut celsius_readings = Vec::new();
        for feature in &resp.features {
            let Some(celsius) = feature.properties.temperature.value else {
                continue;
            };
            let Ok(ts) = chrono::DateTime::parse_from_rfc3339(&feature.properties.timestamp) else {
                continue;
            };
            if ts.with_timezone(&tz).date_naive() != today {
                continue;
            }
            celsius_readings.push(celsius);
        }
        Ok(celsius_readings.into_iter().map(|c| c * 9.0 / 5.0 + 32.0).collect())
    }
}
