//! Chat Store - local conversation service for the browser chat client
//!
//! Serves the cached conversation list over HTTP and streams change events
//! to every open view.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_store::routes::{self, AppState};
use chat_store::{ChangeBus, Config, ConversationCache, ConversationStore, HttpGateway, SqliteBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_store=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let backend = Arc::new(SqliteBackend::new(&config.data_dir.join("chat-store.db")).await?);
    let gateway = Arc::new(HttpGateway::new(config.endpoints.clone())?);
    let store = ConversationStore::new(gateway, ConversationCache::new(backend), ChangeBus::new());

    tracing::info!(
        conversations = %config.endpoints.conversations_url,
        save = %config.endpoints.save_url,
        "Using remote conversation API"
    );

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            store: store.clone(),
        });

    tracing::info!("Chat store running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // let in-flight deletes and refreshes land before exiting
    store.drain_background().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
