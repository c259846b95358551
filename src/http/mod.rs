use crate::agent::{CompletionInvoker, TextGenerator};
use crate::auth::SessionResolver;
use crate::config::Config;
use crate::models::ModelRegistry;
use crate::store::{ChatStore, DocumentStore};
use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

mod chat;
mod relay;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ModelRegistry>,
    pub chats: Arc<dyn ChatStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub sessions: Arc<dyn SessionResolver>,
    pub invoker: Arc<dyn CompletionInvoker>,
    pub generator: Arc<dyn TextGenerator>,
    pub http: reqwest::Client,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route("/health", get(chat::health))
        .route("/models", get(chat::list_models))
        .route(
            "/chat",
            post(chat::send_message)
                .delete(chat::delete_chat)
                .get(chat::get_chat),
        );

    Router::new()
        .nest("/api", api_router)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let bind = state.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    info!("Listening on http://{}", bind);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
