mod background;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tandem_gateway::{Gateway, connection};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tandem=debug,tandem_gateway=debug,tandem_api=debug,tower_http=debug".into()
            }),
        )
        .init();

    // Config
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(tandem_db::Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    // Shared state
    let gateway = Gateway::new(config.gateway.clone(), db);

    tokio::spawn(background::run_stats_loop(gateway.clone(), config.stats_interval));
    tokio::spawn(background::run_ring_sweep_loop(gateway.clone()));

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(connection::ws_handler))
        .with_state(gateway.clone());

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(tandem_api::router(gateway))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Tandem gateway listening on {}", addr);
    info!(
        "Relay host {} ({}/{}), ring timeout {}s, legacy key fill {:?}",
        config.gateway.turn.host,
        config.gateway.turn.port,
        config.gateway.turn.tls_port,
        config.gateway.ring_timeout.as_secs(),
        config.gateway.key_fill,
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
