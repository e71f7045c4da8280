//! `POST /api/chat`: `{messages}` in, `{reply, mode}` out.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use edge_voice::{ChatCompletions, ConversationTurn, RemoteCompletionClient, RetryPolicy, TextGeneration};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    /// `None` while no upstream token is configured.
    client: Option<Arc<RemoteCompletionClient>>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = match config.token.clone() {
            Some(token) => Some(Arc::new(build_client(&config, token)?)),
            None => None,
        };
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }
}

/// v1 chat completions first, legacy text generation once it gives up. Replies are trimmed
/// but not word-capped; the front end applies its own cap.
fn build_client(config: &GatewayConfig, token: String) -> Result<RemoteCompletionClient, GatewayError> {
    let http = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| GatewayError::Internal(format!("http client: {}", e)))?;

    let v1 = ChatCompletions::new(http.clone(), config.api_base.clone(), token.clone(), config.model.clone())
        .with_sampling(config.max_tokens, config.temperature);
    let legacy = TextGeneration::new(http, config.api_base.clone(), token, config.model.clone())
        .with_max_new_tokens(config.max_new_tokens);
    let policy = RetryPolicy {
        max_attempts: config.max_attempts,
        base_delay: Duration::from_millis(config.base_delay_ms),
        max_jitter: Duration::from_millis(config.jitter_ms),
        seed: None,
    };

    Ok(RemoteCompletionClient::new(Box::new(v1), policy)
        .with_fallback(Box::new(legacy))
        .with_system_prompt(config.system_prompt.clone())
        .with_window(config.history_window)
        .with_max_words(None))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat).fallback(method_not_allowed))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> &'static str {
    "OK"
}

async fn method_not_allowed() -> GatewayError {
    GatewayError::MethodNotAllowed
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub reply: String,
    pub mode: String,
}

async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, GatewayError> {
    let Json(request) = body?;
    let client = state.client.as_ref().ok_or(GatewayError::MissingToken)?;

    let reply = client.send(&request.messages).await?;
    info!(
        target: "edge::gateway",
        "💬 /api/chat answered via {} ({} turns in)",
        reply.mode,
        request.messages.len()
    );
    Ok(Json(ChatResponse {
        reply: reply.text,
        mode: reply.mode.to_string(),
    }))
}
