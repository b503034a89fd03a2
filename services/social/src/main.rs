use sc_auth::HttpTokenVerifier;
use social::cache::RedisCounts;
use social::config::load_config_from_path;
use social::consumer;
use social::http::SocialState;
use social::reconciler::Reconciler;
use social::repo::PgFollowRepo;
use sqlx::postgres::PgPoolOptions;
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
        env::var("CONFIG_PATH").unwrap_or_else(|_| "/etc/streamcast/social.toml".to_owned());
    let cfg = match load_config_from_path(Path::new(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %config_path, error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!("connecting to the follow store...");
    let pool = match PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "failed to connect to the follow store");
            std::process::exit(1);
        }
    };
    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        error!(error = %e, "failed to run follow-store migrations");
        std::process::exit(1);
    }
    info!("follow-store migrations applied");

    let counts = match RedisCounts::new(&cfg.cache.url) {
        Ok(counts) => Arc::new(counts),
        Err(e) => {
            error!(error = %e, "failed to initialize count cache");
            std::process::exit(1);
        }
    };
    let repo = Arc::new(PgFollowRepo::new(pool));
    let state = SocialState {
        counts: counts.clone(),
        repo: repo.clone(),
        verifier: Arc::new(HttpTokenVerifier::new(&cfg.auth_base_url)),
        cache_ttl: cfg.cache.ttl,
    };

    let cdc_consumer = match consumer::build_consumer(&consumer::ConsumerConfig {
        bootstrap: cfg.broker.bootstrap.clone(),
        group_id: cfg.broker.group_id.clone(),
        topic: cfg.broker.cdc_topic.clone(),
    }) {
        Ok(cdc_consumer) => cdc_consumer,
        Err(e) => {
            error!(error = %e, "failed to create change consumer");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let consumer_handle = tokio::spawn(consumer::run(
        cdc_consumer,
        counts.clone(),
        shutdown_rx.clone(),
    ));

    let reconciler = Reconciler::new(
        counts,
        repo,
        cfg.reconciler.interval,
        cfg.reconciler.top_n,
        cfg.cache.ttl,
    );
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx));

    let router = social::build_router(state);
    let listener = match tokio::net::TcpListener::bind(&cfg.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %cfg.bind, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.bind, topic = %cfg.broker.cdc_topic, "social service listening");

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    // Staged teardown: consumer first so no new work arrives, then the
    // reconciler's final drain, all under one hard budget.
    let _ = shutdown_tx.send(true);
    let teardown = async {
        let _ = consumer_handle.await;
        let _ = reconciler_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_BUDGET, teardown).await.is_err() {
        error!("shutdown budget exceeded, exiting anyway");
    }
    info!("social service shut down");
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
