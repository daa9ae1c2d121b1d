//! Counter Agent - order-taking chat API for a burger counter
//!
//! Classifies each customer message, keeps a running cart per session and
//! answers in a staff persona, streaming replies from an Ollama or
//! OpenAI-compatible backend.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod knowledge;
mod providers;
mod routes;
#[cfg(test)]
mod test_support;

use config::{Config, PromptBook};
use crate::core::{ChatEngine, MemoryStore};
use knowledge::KnowledgeBase;
use providers::Provider;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store_name: String,
    pub chat_engine: Arc<ChatEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "counter_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let agent = config.load_agent()?;

    // Prompts are required; there is no sensible reply without them
    let prompts_path = &agent.conversation.prompts_path;
    let prompts = PromptBook::load_from_file(prompts_path)
        .await
        .with_context(|| format!("loading prompt book {}", prompts_path.display()))?;
    tracing::info!(
        personas = prompts.personas.len(),
        tasks = prompts.tasks.len(),
        "Prompt book loaded"
    );

    let knowledge_path = &agent.knowledge.path;
    let knowledge = KnowledgeBase::from_file(knowledge_path)
        .await
        .with_context(|| format!("loading knowledge base {}", knowledge_path.display()))?;
    if knowledge.is_empty() {
        tracing::warn!(path = %knowledge_path.display(), "Knowledge base is empty, answers will lack menu context");
    } else {
        tracing::info!(documents = knowledge.len(), "Knowledge base loaded");
    }

    let provider = Provider::from_config(&agent.llm)?;
    tracing::info!(provider = provider.name(), model = %agent.llm.model, "Generation backend ready");

    let memory = Arc::new(
        MemoryStore::new(&config.data_dir.join("sessions.db"))
            .await
            .context("initializing session store")?,
    );

    let chat_engine = Arc::new(ChatEngine::new(
        &agent,
        Arc::new(prompts),
        Arc::new(provider),
        Arc::new(knowledge),
        memory,
    ));

    let state = AppState {
        store_name: agent.store.name.clone(),
        chat_engine,
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("🍔 {} counter open at http://{}", agent.store.name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
