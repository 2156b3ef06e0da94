//! CLOB order venue, position book, and redemption port in one client —
//! all three hit the same authenticated Polymarket CLOB/CTF surface, so
//! they share one HTTP client and retry wrapper. The request shape for
//! order placement follows Polymarket's documented `/order` endpoint.

use crate::domain::Side;
use crate::errors::ErrorKind;
use crate::ports::{
    OpenOrder, OrderBookLevel, OrderBookSnapshot, OrderResult, OrderTimeInForce, OrderVenue, Position, PositionBook,
    RedemptionPort, RedemptionResult,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

async fn get_with_retry<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: &str,
    max_retries: u32,
    rate_limit_cooldown_ms: u64,
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
                    return resp.json::<T>().await.context("failed to parse CLOB response");
                }
                let body = resp.text().await.unwrap_or_default();
                let kind = ErrorKind::from_http_status(status.as_u16(), body.clone(), rate_limit_cooldown_ms);
                if kind.is_retryable() || matches!(kind, ErrorKind::NetworkBlocked { .. }) {
                    warn!("CLOB {} returned {}: {}", url, status, body);
                    last_err = Some(anyhow::anyhow!(kind));
                    continue;
                }
                return Err(anyhow::anyhow!(kind));
            }
            Err(e) => {
                warn!("CLOB request failed: {}", e);
                last_err = Some(e.into());
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("CLOB request failed after retries")))
}

pub struct ClobOrderVenue {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limit_cooldown_ms: u64,
}

impl ClobOrderVenue {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64, rate_limit_cooldown_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build CLOB order venue HTTP client")?;
        Ok(ClobOrderVenue {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limit_cooldown_ms,
        })
    }

    #[cfg(test)]
    fn with_client(client: Client, base_url: String) -> Self {
        ClobOrderVenue {
            client,
            base_url,
            api_key: None,
            rate_limit_cooldown_ms: 60_000,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    success: bool,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
}

#[async_trait]
impl OrderVenue for ClobOrderVenue {
    async fn place_limit(&self, token_id: &str, side: Side, price: f64, size: f64, tif: OrderTimeInForce) -> Result<OrderResult> {
        let url = format!("{}/order", self.base_url);
        let body = serde_json::json!({
            "tokenID": token_id,
            "side": side.to_string(),
            "price": format!("{:.4}", price),
            "size": format!("{:.4}", size),
            "orderType": match tif {
                OrderTimeInForce::GoodTillCancelled => "GTC",
                OrderTimeInForce::FillOrKill => "FOK",
            },
        });

        let resp = self
            .authed(self.client.post(&url).json(&body))
            .send()
            .await
            .context("failed to submit order to CLOB")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let kind = ErrorKind::from_http_status(status.as_u16(), text, self.rate_limit_cooldown_ms);
            return Ok(OrderResult {
                ok: false,
                order_id: None,
                err: Some(kind.to_string()),
            });
        }
        let parsed: PlaceOrderResponse = resp.json().await.context("failed to parse order response")?;
        Ok(OrderResult {
            ok: parsed.success,
            order_id: parsed.order_id,
            err: parsed.error_msg,
        })
    }

    async fn order_book(&self, token_id: &str) -> Result<OrderBookSnapshot> {
        #[derive(Deserialize)]
        struct Level {
            price: String,
            size: String,
        }
        #[derive(Deserialize)]
        struct Book {
            bids: Vec<Level>,
            asks: Vec<Level>,
        }

        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        let book: Book = get_with_retry(&self.client, &url, 2, self.rate_limit_cooldown_ms).await?;

        fn to_levels(levels: Vec<Level>) -> Vec<OrderBookLevel> {
            levels
                .into_iter()
                .filter_map(|l| {
                    let price = l.price.parse::<f64>().ok()?;
                    let size = l.size.parse::<f64>().ok()?;
                    Some(OrderBookLevel { price, size })
                })
                .collect()
        }

        Ok(OrderBookSnapshot {
            bids: to_levels(book.bids),
            asks: to_levels(book.asks),
        })
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>> {
        #[derive(Deserialize)]
        struct RawOpenOrder {
            #[serde(rename = "orderID")]
            order_id: String,
            #[serde(rename = "tokenID")]
            token_id: String,
            price: String,
            #[serde(rename = "originalSize")]
            size: String,
        }

        let url = format!("{}/orders", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .context("failed to fetch open orders")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("CLOB open orders returned {}", status);
        }
        let raw: Vec<RawOpenOrder> = resp.json().await.context("failed to parse open orders")?;
        Ok(raw
            .into_iter()
            .filter_map(|r| {
                Some(OpenOrder {
                    order_id: r.order_id,
                    token_id: r.token_id,
                    price: r.price.parse().ok()?,
                    size: r.size.parse().ok()?,
                })
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    #[serde(rename = "conditionId")]
    condition_id: String,
    #[serde(rename = "tokenId")]
    token_id: String,
    size: String,
    #[serde(rename = "avgPrice")]
    avg_price: String,
    #[serde(rename = "curPrice")]
    cur_price: String,
    #[serde(default)]
    redeemable: Option<bool>,
}

#[async_trait]
impl PositionBook for ClobOrderVenue {
    async fn list(&self) -> Result<Vec<Position>> {
        let url = format!("{}/positions", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .context("failed to fetch positions")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("CLOB positions returned {}", status);
        }
        let raw: Vec<RawPosition> = resp.json().await.context("failed to parse positions")?;
        Ok(raw
            .into_iter()
            .filter_map(|r| {
                Some(Position {
                    condition_id: r.condition_id,
                    token_id: r.token_id,
                    size: r.size.parse().ok()?,
                    avg_price: r.avg_price.parse().ok()?,
                    cur_price: r.cur_price.parse().ok()?,
                    redeemable: r.redeemable,
                })
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct RedeemResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl RedemptionPort for ClobOrderVenue {
    async fn redeem(&self, condition_id: &str) -> Result<RedemptionResult> {
        let url = format!("{}/redeem", self.base_url);
        let resp = self
            .authed(self.client.post(&url).json(&serde_json::json!({ "conditionId": condition_id })))
            .send()
            .await
            .context("failed to submit redemption")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Ok(RedemptionResult {
                ok: false,
                err: Some(format!("CLOB redeem returned {}: {}", status, text)),
            });
        }
        let parsed: RedeemResponse = resp.json().await.context("failed to parse redeem response")?;
        Ok(RedemptionResult {
            ok: parsed.success,
            err: parsed.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn place_limit_reports_failure_without_retry_on_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let venue = ClobOrderVenue::with_client(Client::new(), server.uri());
        let result = venue
            .place_limit("tok_1", Side::Buy, 0.45, 10.0, OrderTimeInForce::GoodTillCancelled)
            .await
            .unwrap();
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn place_limit_parses_success_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "orderID": "ord_123"
            })))
            .mount(&server)
            .await;

        let venue = ClobOrderVenue::with_client(Client::new(), server.uri());
        let result = venue
            .place_limit("tok_1", Side::Buy, 0.45, 10.0, OrderTimeInForce::GoodTillCancelled)
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.order_id, Some("ord_123".to_string()));
    }

    #[tokio::test]
    async fn order_book_parses_string_prices_and_sizes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/book"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bids": [{"price": "0.55", "size": "100"}],
                "asks": [{"price": "0.60", "size": "50"}]
            })))
            .mount(&server)
            .await;

        let venue = ClobOrderVenue::with_client(Client::new(), server.uri());
        let book = venue.order_book("tok_1").await.unwrap();
        assert_eq!(book.bids.len(), 1);
        assert!((book.bids[0].price - 0.55).abs() < 1e-9);
        assert!((book.asks[0].size - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn list_positions_parses_string_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "conditionId": "0xabc",
                "tokenId": "tok_1",
                "size": "25.0",
                "avgPrice": "0.40",
                "curPrice": "0.55",
                "redeemable": false
            }])))
            .mount(&server)
            .await;

        let venue = ClobOrderVenue::with_client(Client::new(), server.uri());
        let positions = venue.list().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert!((positions[0].cur_price - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn redeem_reports_server_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/redeem"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error": "not yet resolved"
            })))
            .mount(&server)
            .await;

        let venue = ClobOrderVenue::with_client(Client::new(), server.uri());
        let result = venue.redeem("0xabc").await.unwrap();
        assert!(!result.ok);
        assert_eq!(result.err.unwrap(), "not yet resolved");
    }
}
