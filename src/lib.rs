pub mod adapters;
pub mod config;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod forecast_service;
pub mod market_discovery;
pub mod notification;
pub mod ports;
pub mod position_manager;
pub mod probability_engine;
pub mod redemption_controller;
pub mod risk_manager;
pub mod stations;
pub mod weather_monitor;
