//! External collaborators, specified only as abstract ports. Concrete
//! implementations live under `adapters` and can be swapped without
//! touching the core decision/execution loop.

use crate::domain::Station;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RawForecast {
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub source: String,
}

#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn fetch(&self, lat: f64, lon: f64, date: NaiveDate) -> Result<Option<RawForecast>>;
}

#[async_trait]
pub trait ObservationProvider: Send + Sync {
    async fn hourly_today(&self, lat: f64, lon: f64, tz: chrono_tz::Tz) -> Result<Vec<f64>>;
}

#[derive(Debug, Clone)]
pub struct RawEvent {
    pub condition_id: String,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub tokens: Vec<RawToken>,
    pub end_date_iso: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawToken {
    pub token_id: String,
    pub outcome: String,
}

#[async_trait]
pub trait MarketCatalog: Send + Sync {
    async fn list_weather_events(&self) -> Result<Vec<RawEvent>>;
    async fn prices(&self, token_ids: &[String]) -> Result<HashMap<String, f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderTimeInForce {
    GoodTillCancelled,
    FillOrKill,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub ok: bool,
    pub order_id: Option<String>,
    pub err: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderBookLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone)]
pub struct OrderBookSnapshot {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub token_id: String,
    pub price: f64,
    pub size: f64,
}

#[async_trait]
pub trait OrderVenue: Send + Sync {
    async fn place_limit(
        &self,
        token_id: &str,
        side: crate::domain::Side,
        price: f64,
        size: f64,
        tif: OrderTimeInForce,
    ) -> Result<OrderResult>;

    async fn order_book(&self, token_id: &str) -> Result<OrderBookSnapshot>;

    async fn open_orders(&self) -> Result<Vec<OpenOrder>>;
}

#[derive(Debug, Clone)]
pub struct Position {
    pub condition_id: String,
    pub token_id: String,
    pub size: f64,
    pub avg_price: f64,
    pub cur_price: f64,
    pub redeemable: Option<bool>,
}

#[async_trait]
pub trait PositionBook: Send + Sync {
    async fn list(&self) -> Result<Vec<Position>>;
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, key: &str, value: serde_json::Value) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Trade,
    StopLoss,
    TakeProfit,
    TrailingStop,
    Error,
    Startup,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn event(&self, kind: NotificationKind, payload: serde_json::Value);
}

#[derive(Debug, Clone)]
pub struct RedemptionResult {
    pub ok: bool,
    pub err: Option<String>,
}

#[async_trait]
pub trait RedemptionPort: Send + Sync {
    async fn redeem(&self, condition_id: &str) -> Result<RedemptionResult>;
}

/// Static, process-wide station registry. Not itself a network port, but
/// grouped here since every port call needs a station's lat/lon/timezone.
pub fn find_station<'a>(stations: &'a [Station], code: &str) -> Option<&'a Station> {
    stations.iter().find(|s| s.code == code)
}
