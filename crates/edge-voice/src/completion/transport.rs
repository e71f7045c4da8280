//! Wire shapes for the completion request. One attempt per call; retries live in the client.

use crate::error::CompletionError;
use crate::history::{ConversationTurn, Role};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A single request/response exchange with a completion backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label reported with the reply (`edge`, `v1`, `legacy`).
    fn mode(&self) -> &'static str;

    /// Send already-shaped `messages` once and return the raw reply text.
    async fn attempt(&self, messages: &[ConversationTurn]) -> Result<String, CompletionError>;
}

async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    token: Option<&str>,
    body: &B,
) -> Result<Value, CompletionError> {
    let mut request = client
        .post(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .json(body);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(CompletionError::from_status(status.as_u16(), &text));
    }
    serde_json::from_str(&text)
        .map_err(|e| CompletionError::InvalidResponse(format!("{}: {}", e, crate::error::excerpt(&text))))
}

// ---------------------------------------------------------------------------
// Edge endpoint: POST {messages, model?} -> {reply, mode?}
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EdgeRequest<'a> {
    messages: &'a [ConversationTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct EdgeResponse {
    reply: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

/// The front end's own completion endpoint (see the `edge-gateway` add-on).
pub struct EdgeEndpoint {
    client: Client,
    url: String,
    model: Option<String>,
}

impl EdgeEndpoint {
    pub fn new(client: Client, url: impl Into<String>, model: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            model,
        }
    }
}

#[async_trait]
impl Transport for EdgeEndpoint {
    fn mode(&self) -> &'static str {
        "edge"
    }

    async fn attempt(&self, messages: &[ConversationTurn]) -> Result<String, CompletionError> {
        let body = EdgeRequest {
            messages,
            model: self.model.as_deref(),
        };
        let value = post_json(&self.client, &self.url, None, &body).await?;
        let parsed: EdgeResponse = serde_json::from_value(value)
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;
        if let Some(mode) = parsed.mode.as_deref() {
            debug!("endpoint answered via {}", mode);
        }
        parsed
            .reply
            .ok_or_else(|| CompletionError::InvalidResponse("missing reply field".to_string()))
    }
}

// ---------------------------------------------------------------------------
// OpenAI-style chat completions: /v1/chat/completions
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    max_tokens: u32,
    temperature: f32,
}

/// `POST {base}/v1/chat/completions` with bearer auth; reply from `choices[0].message.content`.
pub struct ChatCompletions {
    client: Client,
    base_url: String,
    token: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletions {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
            model: model.into(),
            max_tokens: 300,
            temperature: 0.7,
        }
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl Transport for ChatCompletions {
    fn mode(&self) -> &'static str {
        "v1"
    }

    async fn attempt(&self, messages: &[ConversationTurn]) -> Result<String, CompletionError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let value = post_json(&self.client, &url, Some(&self.token), &body).await?;
        value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CompletionError::InvalidResponse("missing choices[0].message.content".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Legacy text generation: /models/{model} with a ChatML-style prompt
// ---------------------------------------------------------------------------

/// Render turns into the ChatML-style prompt used by text-generation models, ending with an
/// open assistant tag.
pub fn render_chatml(messages: &[ConversationTurn]) -> String {
    let mut prompt = String::new();
    for turn in messages {
        let tag = match turn.role {
            Role::System => "system",
            Role::Assistant => "assistant",
            Role::User => "user",
        };
        prompt.push_str(&format!("<|{}|>\n{}</s>\n", tag, turn.content));
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

/// `POST {base}/models/{model}`; reply from `[0].generated_text`.
pub struct TextGeneration {
    client: Client,
    base_url: String,
    token: String,
    model: String,
    max_new_tokens: u32,
}

impl TextGeneration {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
            model: model.into(),
            max_new_tokens: 256,
        }
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }
}

#[async_trait]
impl Transport for TextGeneration {
    fn mode(&self) -> &'static str {
        "legacy"
    }

    async fn attempt(&self, messages: &[ConversationTurn]) -> Result<String, CompletionError> {
        let url = format!("{}/models/{}", self.base_url.trim_end_matches('/'), self.model);
        let body = serde_json::json!({
            "inputs": render_chatml(messages),
            "parameters": {
                "max_new_tokens": self.max_new_tokens,
                "return_full_text": false,
            },
            "options": { "wait_for_model": true },
        });
        let value = post_json(&self.client, &url, Some(&self.token), &body).await?;
        // Text generation answers with a list; some deployments return a bare object.
        value
            .pointer("/0/generated_text")
            .or_else(|| value.get("generated_text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CompletionError::InvalidResponse("missing generated_text".to_string()))
    }
}
