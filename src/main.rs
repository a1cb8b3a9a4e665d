use std::sync::Arc;

use pinboard::config::Config;
use pinboard::store::repo::{MemoryRepo, NoteRepo, PgRepo};
use pinboard::{db, routes, state};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().expect("invalid configuration");

    let repo: Arc<dyn NoteRepo> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgRepo::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; notes live in memory only");
            Arc::new(MemoryRepo::new())
        }
    };

    let state = state::AppState::new(repo).with_outbound_capacity(config.ws_outbound_capacity);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "pinboard listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
