use anyhow::{Context, Result};
use std::env;

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", key, e))
}

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct Config {
    // Core trading knobs
    pub edge_threshold: f64,
    pub max_lead_days: i64,
    pub discovery_interval_ms: u64,
    pub forecast_refresh_ms: u64,
    pub observation_poll_ms: u64,
    pub min_parser_confidence: f64,
    pub dry_run: bool,
    pub max_exposure_per_market_usd: f64,
    pub max_exposure_per_region_usd: f64,
    pub max_exposure_per_date_usd: f64,
    pub max_daily_loss_usd: f64,
    pub max_data_age_ms: u64,
    pub min_order_size_usd: f64,
    pub max_order_size_usd: f64,
    pub executor_poll_interval_ms: u64,
    pub position_check_interval_ms: u64,
    pub stop_loss_enabled: bool,
    pub stop_loss_percent: f64,
    pub take_profit_enabled: bool,
    pub take_profit_percent: f64,
    pub trailing_stop_enabled: bool,
    pub trailing_stop_percent: f64,
    pub sl_tp_min_price_percent: f64,
    pub rate_limit_cooldown_ms: u64,
    pub redemption_check_interval_ms: u64,
    pub kelly_max_fraction: f64,

    // Ambient: concrete port adapter endpoints
    pub market_catalog_url: String,
    pub order_venue_url: String,
    pub forecast_provider_primary_url: String,
    pub forecast_provider_secondary_url: String,
    pub observation_provider_url: String,
    pub http_request_timeout_secs: u64,
    pub state_store_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // missing .env is not fatal

        Ok(Config {
            edge_threshold: env_parse("WEATHER_EDGE_THRESHOLD", "0.03")
                .context("Failed to parse WEATHER_EDGE_THRESHOLD")?,
            max_lead_days: env_parse("WEATHER_MAX_LEAD_DAYS", "7")
                .context("Failed to parse WEATHER_MAX_LEAD_DAYS")?,
            discovery_interval_ms: env_parse("WEATHER_DISCOVERY_INTERVAL_MS", "3600000")
                .context("Failed to parse WEATHER_DISCOVERY_INTERVAL_MS")?,
            forecast_refresh_ms: env_parse("WEATHER_FORECAST_REFRESH_MS", "1800000")
                .context("Failed to parse WEATHER_FORECAST_REFRESH_MS")?,
            observation_poll_ms: env_parse("WEATHER_OBSERVATION_POLL_MS", "300000")
                .context("Failed to parse WEATHER_OBSERVATION_POLL_MS")?,
            min_parser_confidence: env_parse("WEATHER_MIN_PARSER_CONFIDENCE", "0.8")
                .context("Failed to parse WEATHER_MIN_PARSER_CONFIDENCE")?,
            dry_run: env_parse("WEATHER_DRY_RUN", "false")
                .context("Failed to parse WEATHER_DRY_RUN")?,
            max_exposure_per_market_usd: env_parse("MAX_EXPOSURE_PER_MARKET_USD", "50")
                .context("Failed to parse MAX_EXPOSURE_PER_MARKET_USD")?,
            max_exposure_per_region_usd: env_parse("MAX_EXPOSURE_PER_REGION_USD", "200")
                .context("Failed to parse MAX_EXPOSURE_PER_REGION_USD")?,
            max_exposure_per_date_usd: env_parse("MAX_EXPOSURE_PER_DATE_USD", "300")
                .context("Failed to parse MAX_EXPOSURE_PER_DATE_USD")?,
            max_daily_loss_usd: env_parse("MAX_DAILY_LOSS_USD", "100")
                .context("Failed to parse MAX_DAILY_LOSS_USD")?,
            max_data_age_ms: env_parse("MAX_DATA_AGE_MS", "3600000")
                .context("Failed to parse MAX_DATA_AGE_MS")?,
            min_order_size_usd: env_parse("MIN_ORDER_SIZE_USD", "1")
                .context("Failed to parse MIN_ORDER_SIZE_USD")?,
            max_order_size_usd: env_parse("MAX_ORDER_SIZE_USD", "25")
                .context("Failed to parse MAX_ORDER_SIZE_USD")?,
            executor_poll_interval_ms: env_parse("EXECUTOR_POLL_INTERVAL_MS", "5000")
                .context("Failed to parse EXECUTOR_POLL_INTERVAL_MS")?,
            position_check_interval_ms: env_parse("POSITION_CHECK_INTERVAL_MS", "60000")
                .context("Failed to parse POSITION_CHECK_INTERVAL_MS")?,
            stop_loss_enabled: env_parse("STOP_LOSS_ENABLED", "false")
                .context("Failed to parse STOP_LOSS_ENABLED")?,
            stop_loss_percent: env_parse("STOP_LOSS_PERCENT", "20")
                .context("Failed to parse STOP_LOSS_PERCENT")?,
            take_profit_enabled: env_parse("TAKE_PROFIT_ENABLED", "false")
                .context("Failed to parse TAKE_PROFIT_ENABLED")?,
            take_profit_percent: env_parse("TAKE_PROFIT_PERCENT", "50")
                .context("Failed to parse TAKE_PROFIT_PERCENT")?,
            trailing_stop_enabled: env_parse("TRAILING_STOP_ENABLED", "false")
                .context("Failed to parse TRAILING_STOP_ENABLED")?,
            trailing_stop_percent: env_parse("TRAILING_STOP_PERCENT", "15")
                .context("Failed to parse TRAILING_STOP_PERCENT")?,
            sl_tp_min_price_percent: env_parse("SL_TP_MIN_PRICE_PERCENT", "50")
                .context("Failed to parse SL_TP_MIN_PRICE_PERCENT")?,
            rate_limit_cooldown_ms: env_parse("RATE_LIMIT_COOLDOWN_MS", "60000")
                .context("Failed to parse RATE_LIMIT_COOLDOWN_MS")?,
            redemption_check_interval_ms: env_parse("REDEMPTION_CHECK_INTERVAL_MS", "3600000")
                .context("Failed to parse REDEMPTION_CHECK_INTERVAL_MS")?,
            kelly_max_fraction: env_parse("WEATHER_KELLY_MAX_FRACTION", "0.05")
                .context("Failed to parse WEATHER_KELLY_MAX_FRACTION")?,

            market_catalog_url: env_str("MARKET_CATALOG_URL", "https://gamma-api.polymarket.com"),
            order_venue_url: env_str("ORDER_VENUE_URL", "https://clob.polymarket.com"),
            forecast_provider_primary_url: env_str(
                "FORECAST_PROVIDER_PRIMARY_URL",
                "https://api.weather.gov",
            ),
            forecast_provider_secondary_url: env_str(
                "FORECAST_PROVIDER_SECONDARY_URL",
                "https://api.open-meteo.com",
            ),
            observation_provider_url: env_str(
                "OBSERVATION_PROVIDER_URL",
                "https://api.weather.gov",
            ),
            http_request_timeout_secs: env_parse("HTTP_REQUEST_TIMEOUT_SECS", "15")
                .context("Failed to parse HTTP_REQUEST_TIMEOUT_SECS")?,
            state_store_path: env_str("STATE_STORE_PATH", "data/weather-agent-state.db"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.edge_threshold, 0.03);
        assert_eq!(config.max_lead_days, 7);
        assert_eq!(config.discovery_interval_ms, 3_600_000);
        assert_eq!(config.forecast_refresh_ms, 1_800_000);
        assert_eq!(config.min_parser_confidence, 0.8);
        assert!(!config.dry_run);
        assert_eq!(config.max_exposure_per_market_usd, 50.0);
        assert_eq!(config.max_exposure_per_region_usd, 200.0);
        assert_eq!(config.max_exposure_per_date_usd, 300.0);
        assert_eq!(config.max_daily_loss_usd, 100.0);
        assert_eq!(config.min_order_size_usd, 1.0);
        assert_eq!(config.max_order_size_usd, 25.0);
        assert_eq!(config.executor_poll_interval_ms, 5_000);
        assert_eq!(config.position_check_interval_ms, 60_000);
        assert!(!config.stop_loss_enabled);
        assert_eq!(config.stop_loss_percent, 20.0);
        assert_eq!(config.take_profit_percent, 50.0);
        assert_eq!(config.trailing_stop_percent, 15.0);
        assert_eq!(config.sl_tp_min_price_percent, 50.0);
        assert_eq!(config.kelly_max_fraction, 0.05);
    }
}
