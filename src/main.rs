use ledgersync::gateway::{BybitGateway, CircuitBreakerConfig, ExchangeGateway, RetryConfig};
use ledgersync::orchestration::{PassMode, Reconciler};
use ledgersync::{api, config::Config, db::init_db, Repository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let gateway: Arc<dyn ExchangeGateway> = Arc::new(BybitGateway::new(
        config.bybit_api_url.clone(),
        config.bybit_api_key.clone(),
        config.bybit_api_secret.clone(),
        Duration::from_millis(config.request_timeout_ms),
        RetryConfig::default(),
        CircuitBreakerConfig::default(),
    ));
    let reconciler = Arc::new(Reconciler::new(gateway, repo.clone(), config.clone()));

    // Background reconciliation loop; API-triggered passes share the same
    // reconciler, so both paths converge through the conditional writes.
    let interval_secs = config.reconcile_interval_secs;
    let background = reconciler.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = background.run_pass(PassMode::Scheduled).await {
                tracing::error!("Scheduled reconciliation pass failed: {}", e);
            }
        }
    });

    // Create router
    let app = api::create_router(api::AppState {
        repo,
        config,
        reconciler,
    });

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
