use sc_auth::HttpTokenVerifier;
use sc_registry::RedisRegistry;
use signaling::config::load_config_from_path;
use signaling::directory::{HttpMediaIngest, HttpRoomDirectory};
use signaling::events::{BroadcastEvents, KafkaBroadcastEvents};
use signaling::state::AppState;
use signaling::watchdog;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config_path =
        env::var("CONFIG_PATH").unwrap_or_else(|_| "/etc/streamcast/signaling.toml".to_owned());
    let cfg = match load_config_from_path(Path::new(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %config_path, error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let registry = match RedisRegistry::new(
        &cfg.registry.url,
        cfg.registry.prefix.clone(),
        cfg.registry.lookup_timeout,
    ) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!(error = %e, "failed to initialize registry client");
            std::process::exit(1);
        }
    };

    let events = match KafkaBroadcastEvents::new(&cfg.events.bootstrap, &cfg.events.topic) {
        Ok(events) => Arc::new(events),
        Err(e) => {
            error!(error = %e, "failed to create broadcast event producer");
            std::process::exit(1);
        }
    };
    if let Err(e) = events.ensure_topic(cfg.events.partitions).await {
        // Provisioning is best-effort; brokers in production are usually
        // managed out of band.
        tracing::warn!(error = %e, "event topic provisioning failed");
    }

    let state = AppState::new(
        cfg.options.clone(),
        Arc::new(HttpTokenVerifier::new(&cfg.auth_base_url)),
        Arc::new(HttpRoomDirectory::new(&cfg.rooms_base_url)),
        Arc::new(HttpMediaIngest::new(&cfg.ingest_base_url)),
        events.clone(),
        registry,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watchdog_handle = tokio::spawn(watchdog::run_idle_watchdog(state.clone(), shutdown_rx));

    let router = signaling::build_router(state.clone());
    let listener = match tokio::net::TcpListener::bind(&cfg.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %cfg.bind, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.bind, advertised = %cfg.options.advertised_address, "signaling listening");

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    // Staged teardown: watchdog, then the hub (closing every outbound
    // channel), then the producer flush — all under one hard budget.
    let _ = shutdown_tx.send(true);
    let teardown = async {
        let _ = watchdog_handle.await;
        state.hub.stop().await;
        events.close().await;
    };
    if tokio::time::timeout(SHUTDOWN_BUDGET, teardown).await.is_err() {
        error!("shutdown budget exceeded, exiting anyway");
    }
    info!("signaling shut down");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
