//! Concrete implementations of the abstract ports (`ports.rs`). The core
//! decision loop never imports these types directly, only through `Arc<dyn
//! Trait>`, so a new venue or data source is a new file here.
//!
//! `ClobOrderVenue` implements `OrderVenue`, `PositionBook`, and
//! `RedemptionPort` together since all three hit the same authenticated
//! CLOB/CTF surface.

mod http_forecast;
mod http_market_catalog;
mod http_observation;
mod http_order_venue;
mod sqlite_state_store;

pub use http_forecast::{NoaaForecastProvider, OpenMeteoForecastProvider};
pub use http_market_catalog::GammaMarketCatalog;
pub use http_observation::NoaaObservationProvider;
pub use http_order_venue::ClobOrderVenue;
pub use sqlite_state_store::SqliteStateStore;
