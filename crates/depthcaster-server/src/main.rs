mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use depthcaster_api::{AppState, AppStateInner, router};
use depthcaster_neynar::{Coalescing, NeynarClient};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "depthcaster=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = depthcaster_db::Database::open(&config.db_path)?;

    // Identical concurrent upstream calls share one request.
    let neynar = NeynarClient::new(&config.neynar_api_url, &config.neynar_api_key)?;
    let source = Coalescing::new(Arc::new(neynar));

    info!(
        "Orphaned replies: {}, feed cache {:?}, curator cache {:?}, {} env webhook secrets",
        config.settings.orphan_policy,
        config.settings.feed_cache_ttl,
        config.settings.curator_cache_ttl,
        config.settings.webhook_secrets.len()
    );
    let state: AppState = Arc::new(AppStateInner::new(db, Arc::new(source), config.settings));

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Depthcaster server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
