use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use weather_trading_agent::adapters::{
    ClobOrderVenue, GammaMarketCatalog, NoaaForecastProvider, NoaaObservationProvider,
    OpenMeteoForecastProvider, SqliteStateStore,
};
use weather_trading_agent::config::Config;
use weather_trading_agent::executor::Executor;
use weather_trading_agent::forecast_service::ForecastService;
use weather_trading_agent::market_discovery::{Discovery, MarketRegistry, StationDirectory};
use weather_trading_agent::notification::BroadcastNotificationSink;
use weather_trading_agent::ports::{NotificationKind, NotificationSink};
use weather_trading_agent::position_manager::PositionManager;
use weather_trading_agent::redemption_controller::RedemptionController;
use weather_trading_agent::risk_manager::RiskManager;
use weather_trading_agent::stations::default_stations;
use weather_trading_agent::weather_monitor::{jittered_sleep_ms, SignalQueue, WeatherMonitor};

const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(2);
const JITTER_FRACTION: f64 = 0.1;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("weather_trading_agent=info")),
        )
        .init();

    info!(
        "weather trading agent starting: dry_run={}, edge_threshold={}, max_lead_days={}",
        config.dry_run, config.edge_threshold, config.max_lead_days
    );

    let notifier: Arc<dyn NotificationSink> = Arc::new(BroadcastNotificationSink::new());

    let primary_forecast = Arc::new(
        NoaaForecastProvider::new(&config.forecast_provider_primary_url, config.http_request_timeout_secs)
            .context("failed to build primary forecast provider")?,
    );
    let secondary_forecast = Arc::new(
        OpenMeteoForecastProvider::new(&config.forecast_provider_secondary_url, config.http_request_timeout_secs)
            .context("failed to build secondary forecast provider")?,
    );
    let forecast_service = Arc::new(ForecastService::new(primary_forecast, secondary_forecast));

    let observation_provider: Arc<dyn weather_trading_agent::ports::ObservationProvider> = Arc::new(
        NoaaObservationProvider::new(&config.observation_provider_url, config.http_request_timeout_secs)
            .context("failed to build observation provider")?,
    );

    let catalog: Arc<dyn weather_trading_agent::ports::MarketCatalog> = Arc::new(
        GammaMarketCatalog::new(&config.market_catalog_url, &config.order_venue_url, config.http_request_timeout_secs)
            .context("failed to build market catalog")?,
    );

    let api_key = std::env::var("CLOB_API_KEY").ok();
    let venue = Arc::new(
        ClobOrderVenue::new(
            &config.order_venue_url,
            api_key,
            config.http_request_timeout_secs,
            config.rate_limit_cooldown_ms,
        )
        .context("failed to build order venue client")?,
    );
    let order_venue: Arc<dyn weather_trading_agent::ports::OrderVenue> = venue.clone();
    let position_book: Arc<dyn weather_trading_agent::ports::PositionBook> = venue.clone();
    let redemption_port: Arc<dyn weather_trading_agent::ports::RedemptionPort> = venue;

    let state_store: Arc<dyn weather_trading_agent::ports::StateStore> = Arc::new(
        SqliteStateStore::open(&config.state_store_path).context("failed to open state store")?,
    );

    let stations = default_stations();
    let station_directory = StationDirectory::new(stations.clone());
    let discovery = Discovery::new(catalog.clone(), station_directory, config.min_parser_confidence);

    let registry = Arc::new(Mutex::new(MarketRegistry::new()));
    let queue = Arc::new(Mutex::new(SignalQueue::new()));
    let today = Utc::now().date_naive();
    let risk = Arc::new(Mutex::new(RiskManager::new((*config).clone(), today)));

    let monitor = Arc::new(WeatherMonitor::new(
        config.clone(),
        stations,
        catalog,
        forecast_service,
        observation_provider,
        discovery,
    ));
    let executor = Arc::new(Executor::new(config.clone(), order_venue.clone(), notifier.clone()));
    let position_manager = Arc::new(PositionManager::new(
        config.clone(),
        position_book.clone(),
        order_venue,
        state_store,
        notifier.clone(),
        risk.clone(),
    ));
    let redemption_controller = Arc::new(RedemptionController::new(position_book, redemption_port));

    notifier
        .event(NotificationKind::Startup, serde_json::json!({"dry_run": config.dry_run}))
        .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(run_weather_monitor_loop(
        config.clone(),
        monitor,
        registry.clone(),
        queue.clone(),
        risk.clone(),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(run_executor_loop(
        config.clone(),
        executor,
        queue,
        registry,
        risk,
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(run_position_manager_loop(
        config.clone(),
        position_manager,
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(run_redemption_loop(
        config,
        redemption_controller,
        shutdown_rx,
    )));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping background tasks");
    let _ = shutdown_tx.send(true);

    tokio::time::sleep(SHUTDOWN_GRACE).await;
    for task in tasks {
        task.abort();
    }

    info!("weather trading agent stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn run_weather_monitor_loop(
    config: Arc<Config>,
    monitor: Arc<WeatherMonitor>,
    registry: Arc<Mutex<MarketRegistry>>,
    queue: Arc<Mutex<SignalQueue>>,
    risk: Arc<Mutex<RiskManager>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_discovery = None::<tokio::time::Instant>;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = Utc::now().naive_utc();
        let due_for_discovery = last_discovery
            .map(|t| t.elapsed() >= std::time::Duration::from_millis(config.discovery_interval_ms))
            .unwrap_or(true);
        if due_for_discovery {
            let mut reg = registry.lock().await;
            match monitor.discovery().discover(&mut reg, now).await {
                Ok(admitted) => info!("discovery: admitted {} markets", admitted),
                Err(e) => warn!("discovery cycle failed: {}", e),
            }
            last_discovery = Some(tokio::time::Instant::now());
        }

        if let Err(e) = monitor.run_cycle(&registry, &queue, &risk, now).await {
            warn!("weather monitor cycle failed: {}", e);
        }

        tokio::select! {
            _ = tokio::time::sleep(jittered_sleep_ms(config.forecast_refresh_ms, JITTER_FRACTION)) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn run_executor_loop(
    config: Arc<Config>,
    executor: Arc<Executor>,
    queue: Arc<Mutex<SignalQueue>>,
    registry: Arc<Mutex<MarketRegistry>>,
    risk: Arc<Mutex<RiskManager>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = Utc::now().naive_utc();
        match executor.run_cycle(&queue, &registry, &risk, now).await {
            Ok(n) if n > 0 => info!("executor: dispatched {} trades", n),
            Ok(_) => {}
            Err(e) => warn!("executor cycle failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(jittered_sleep_ms(config.executor_poll_interval_ms, JITTER_FRACTION)) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn run_position_manager_loop(
    config: Arc<Config>,
    manager: Arc<PositionManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut peaks = manager.load_peaks().await;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = Utc::now().naive_utc();
        match manager.run_cycle(&mut peaks, now).await {
            Ok(result) if result.triggered > 0 => {
                info!(
                    "position manager: checked {}, triggered {}",
                    result.positions_checked, result.triggered
                );
            }
            Ok(_) => {}
            Err(e) => warn!("position manager cycle failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(jittered_sleep_ms(config.position_check_interval_ms, JITTER_FRACTION)) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn run_redemption_loop(
    config: Arc<Config>,
    controller: Arc<RedemptionController>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match controller.run_cycle().await {
            Ok(result) if result.groups_attempted > 0 => {
                info!(
                    "redemption controller: attempted {}, succeeded {}",
                    result.groups_attempted, result.groups_succeeded
                );
            }
            Ok(_) => {}
            Err(e) => error!("redemption cycle failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(jittered_sleep_ms(config.redemption_check_interval_ms, JITTER_FRACTION)) => {}
            _ = shutdown.changed() => {}
        }
    }
}
