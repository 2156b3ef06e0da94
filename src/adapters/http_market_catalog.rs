//! `MarketCatalog` over the Gamma events API (discovery) and the CLOB
//! midpoint endpoint (pricing). Gamma's `clobTokenIds`/`outcomes` fields
//! arrive as stringified JSON arrays, not native arrays, so they're
//! parsed as strings and re-decoded rather than typed directly.

use crate::ports::{MarketCatalog, RawEvent, RawToken};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const WEATHER_TAG_ID: u32 = 84;

async fn get_with_retry<T: serde::de::DeserializeOwned>(client: &Client, url: &str, query: &[(&str, &str)], max_retries: u32) -> Result<T> {
    let mut last_err = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_millis(500 * 2u64.pow(attempt - 1));
            debug!("retrying {} after {:?} (attempt {})", url, delay, attempt + 1);
            tokio::time::sleep(delay).await;
        }
        match client.get(url).query(query).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return resp.json::<T>().await.context("failed to parse Gamma/CLOB response");
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body = resp.text().await.unwrap_or_default();
                    warn!("{} returned {}: {}", url, status, body);
                    last_err = Some(anyhow::anyhow!("{} returned {}: {}", url, status, body));
                    continue;
                }
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("{} returned {}: {}", url, status, body);
            }
            Err(e) => {
                warn!("market catalog request failed: {}", e);
                last_err = Some(e.into());
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("market catalog request failed after retries")))
}

fn deserialize_optional_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        Float(f64),
        String(String),
        Null,
    }

    match StringOrFloat::deserialize(deserializer)? {
        StringOrFloat::Float(f) => Ok(Some(f)),
        StringOrFloat::String(s) => {
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<f64>().map(Some).map_err(de::Error::custom)
            }
        }
        StringOrFloat::Null => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct GammaEventsResponse(Vec<GammaEvent>);

#[derive(Debug, Deserialize)]
struct GammaEvent {
    #[serde(default)]
    markets: Vec<RawGammaMarket>,
}

#[derive(Debug, Deserialize)]
struct RawGammaMarket {
    question: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(rename = "conditionId", default)]
    condition_id: Option<String>,
    #[serde(rename = "clobTokenIds", default)]
    clob_token_ids: Option<String>,
    #[serde(default)]
    outcomes: Option<String>,
    #[serde(rename = "endDate", default)]
    end_date: Option<String>,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    active: bool,
}

fn build_tokens_from_strings(clob_token_ids: Option<&str>, outcomes: Option<&str>) -> Vec<RawToken> {
    let ids: Vec<String> = clob_token_ids.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default();
    let outs: Vec<String> = outcomes.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default();
    if ids.len() != outs.len() {
        return Vec::new();
    }
    ids.into_iter()
        .zip(outs)
        .map(|(token_id, outcome)| RawToken { token_id, outcome })
        .collect()
}

impl From<RawGammaMarket> for Option<RawEvent> {
    fn from(raw: RawGammaMarket) -> Self {
        if raw.closed || !raw.active {
            return None;
        }
        let condition_id = raw.condition_id?;
        let tokens = build_tokens_from_strings(raw.clob_token_ids.as_deref(), raw.outcomes.as_deref());
        if tokens.is_empty() {
            return None;
        }
        Some(RawEvent {
            condition_id,
            slug: raw.slug.unwrap_or_default(),
            title: raw.question.clone(),
            description: raw.question,
            tokens,
            end_date_iso: raw.end_date,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MidpointResponse {
    mid: String,
}

pub struct GammaMarketCatalog {
    client: Client,
    gamma_url: String,
    clob_url: String,
}

impl GammaMarketCatalog {
    pub fn new(gamma_url: &str, clob_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build market catalog HTTP client")?;
        Ok(GammaMarketCatalog {
            client,
            gamma_url: gamma_url.trim_end_matches('/').to_string(),
            clob_url: clob_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    fn with_client(client: Client, gamma_url: String, clob_url: String) -> Self {
        GammaMarketCatalog { client, gamma_url, clob_url }
    }
}

#[async_trait]
impl MarketCatalog for GammaMarketCatalog {
    async fn list_weather_events(&self) -> Result<Vec<RawEvent>> {
        let url = format!("{}/events", self.gamma_url);
        let tag_id = WEATHER_TAG_ID.to_string();
        let events: GammaEventsResponse = get_with_retry(
            &self.client,
            &url,
            &[("tag_id", tag_id.as_str()), ("closed", "false"), ("limit", "200")],
            2,
        )
        .await?;

        Ok(events
            .0
            .into_iter()
            .flat_map(|e| e.markets)
            .filter_map(Option::<RawEvent>::from)
            .collect())
    }

    async fn prices(&self, token_ids: &[String]) -> Result<HashMap<String, f64>> {
        let mut out = HashMap::with_capacity(token_ids.len());
        for token_id in token_ids {
            let url = format!("{}/midpoint", self.clob_url);
            let resp: Result<MidpointResponse> = get_with_retry(&self.client, &url, &[("token_id", token_id.as_str())], 2).await;
            match resp {
                Ok(r) => match r.mid.parse::<f64>() {
                    Ok(p) => {
                        out.insert(token_id.clone(), p);
                    }
                    Err(e) => warn!("unparseable midpoint for {}: {}", token_id, e),
                },
                Err(e) => warn!("midpoint fetch failed for {}: {}", token_id, e),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn list_weather_events_parses_stringified_token_arrays() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("tag_id", "84"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "markets": [{
                        "question": "Highest temperature in NYC on January 14?",
                        "slug": "nyc-jan-14",
                        "conditionId": "0xcond1",
                        "clobTokenIds": "[\"tok_a\",\"tok_b\"]",
                        "outcomes": "[\"49 or below\",\"50-51\"]",
                        "endDate": "2026-01-15T00:00:00Z",
                        "closed": false,
                        "active": true
                    }]
                }
            ])))
            .mount(&server)
            .await;

        let catalog = GammaMarketCatalog::with_client(Client::new(), server.uri(), "http://unused".into());
        let events = catalog.list_weather_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].condition_id, "0xcond1");
        assert_eq!(events[0].tokens.len(), 2);
        assert_eq!(events[0].tokens[0].token_id, "tok_a");
    }

    #[tokio::test]
    async fn list_weather_events_skips_closed_and_tokenless_markets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "markets": [
                        {
                            "question": "Closed market",
                            "conditionId": "0xclosed",
                            "clobTokenIds": "[\"t1\",\"t2\"]",
                            "outcomes": "[\"Yes\",\"No\"]",
                            "closed": true,
                            "active": false
                        },
                        {
                            "question": "No tokens",
                            "conditionId": "0xnotok",
                            "closed": false,
                            "active": true
                        }
                    ]
                }
            ])))
            .mount(&server)
            .await;

        let catalog = GammaMarketCatalog::with_client(Client::new(), server.uri(), "http://unused".into());
        let events = catalog.list_weather_events().await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn prices_parses_string_midpoints_per_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/midpoint"))
            .and(query_param("token_id", "tok_a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"mid": "0.42"})))
            .mount(&server)
            .await;

        let catalog = GammaMarketCatalog::with_client(Client::new(), "http://unused".into(), server.uri());
        let prices = catalog.prices(&["tok_a".to_string()]).await.unwrap();
        assert!((prices["tok_a"] - 0.42).abs() < 1e-9);
    }
}
