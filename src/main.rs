use anyhow::Result;
use parley::{
    agent::{CompletionInvoker, ProviderRouter},
    auth::TokenSessions,
    config::Config,
    http::{self, AppState},
    models::ModelRegistry,
    store::SqliteStore,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    let registry = ModelRegistry::new(&config.models.default)?;
    let router = ProviderRouter::new(&config.providers)?;
    for provider in registry.providers_in_use() {
        if !router.supports(provider) {
            warn!("No credentials for provider {}, its models are unavailable", provider);
        }
    }

    if config.auth.tokens.is_empty() {
        warn!("No session tokens configured, every request will be rejected");
    }

    let store = SqliteStore::new(&config.storage.data_dir).await?;
    let sessions = TokenSessions::new(config.auth.tokens.clone());

    let state = AppState {
        config: Arc::new(config),
        registry: Arc::new(registry),
        chats: store.clone(),
        documents: store,
        sessions: Arc::new(sessions),
        invoker: router.clone(),
        generator: router,
        http: reqwest::Client::new(),
    };

    http::serve(state).await?;
    info!("Shutdown complete");

    Ok(())
}
