use chat_dispatch::config::load_config_from_path;
use chat_dispatch::pool::{DeliveryPool, PoolConfig};
use chat_dispatch::{Dispatcher, consumer};
use sc_registry::RedisRegistry;
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
        env::var("CONFIG_PATH").unwrap_or_else(|_| "/etc/streamcast/chat-dispatch.toml".to_owned());
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

    let pool = Arc::new(DeliveryPool::new(PoolConfig {
        dial_timeout: cfg.pool.dial_timeout,
        call_timeout: cfg.pool.call_timeout,
        idle_timeout: cfg.pool.idle_timeout,
    }));
    let dispatcher = Arc::new(Dispatcher::new(registry, pool.clone()));

    let consumer = match consumer::build_consumer(&consumer::ConsumerConfig {
        bootstrap: cfg.broker.bootstrap.clone(),
        group_id: cfg.broker.group_id.clone(),
        topic: cfg.broker.chat_topic.clone(),
    }) {
        Ok(consumer) => consumer,
        Err(e) => {
            error!(error = %e, "failed to create chat consumer");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Health/readiness probes; the dispatcher serves no other HTTP.
    let status_listener = match tokio::net::TcpListener::bind(&cfg.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %cfg.bind, error = %e, "failed to bind status listener");
            std::process::exit(1);
        }
    };
    let mut status_shutdown = shutdown_rx.clone();
    let status_handle = tokio::spawn(async move {
        let serve = axum::serve(status_listener, chat_dispatch::build_router())
            .with_graceful_shutdown(async move {
                let _ = status_shutdown.changed().await;
            });
        if let Err(e) = serve.await {
            error!(error = %e, "status server error");
        }
    });

    info!(topic = %cfg.broker.chat_topic, status = %cfg.bind, "chat dispatcher running");
    let loop_handle = tokio::spawn(consumer::run(consumer, dispatcher, shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    // Staged teardown: poll loop first (stop taking work), then the pool,
    // with the status server draining alongside.
    let teardown = async {
        let _ = loop_handle.await;
        pool.close().await;
        let _ = status_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_BUDGET, teardown).await.is_err() {
        error!("shutdown budget exceeded, exiting anyway");
    }
    info!("chat dispatcher shut down");
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
