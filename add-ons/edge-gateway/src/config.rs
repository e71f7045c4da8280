//! Gateway settings: defaults, then an optional TOML file, then environment.

use edge_voice::completion::DEFAULT_SYSTEM_PROMPT;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::GatewayError;

pub const DEFAULT_API_BASE: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_MODEL: &str = "google/gemma-2-2b-it";

/// Configuration for the completion gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address (default: 127.0.0.1)
    pub host: String,

    /// Listen port (default: 8000)
    pub port: u16,

    /// Upstream inference base URL
    pub api_base: String,

    /// Upstream model id (env: HF_MODEL)
    pub model: String,

    /// Bearer token for the upstream (env: HF_TOKEN). Requests fail with 500 while unset.
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// System turn prepended to every request (env: SYSTEM_PROMPT)
    pub system_prompt: String,

    /// Trailing client turns forwarded upstream (default: 12)
    pub history_window: usize,

    /// v1 chat sampling
    pub max_tokens: u32,
    pub temperature: f32,

    /// Legacy text-generation length (default: 256)
    pub max_new_tokens: u32,

    /// Attempts per upstream protocol, including the first (default: 3)
    pub max_attempts: u32,

    /// First retry delay, doubled per retry (default: 800ms)
    pub base_delay_ms: u64,

    /// Random jitter added per retry (default: 200ms)
    pub jitter_ms: u64,

    /// Upstream request timeout (default: 60s)
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            token: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_window: 12,
            max_tokens: 300,
            temperature: 0.7,
            max_new_tokens: 256,
            max_attempts: 3,
            base_delay_ms: 800,
            jitter_ms: 200,
            timeout_secs: 60,
        }
    }
}

impl GatewayConfig {
    /// Load config. Precedence: `HF_TOKEN` / `HF_MODEL` / `SYSTEM_PROMPT` / `EDGE_API_BASE` >
    /// `EDGE_GATEWAY__*` > `EDGE_GATEWAY_CONFIG` path (default `config/gateway[.toml]`) > defaults.
    pub fn load() -> Result<Self, GatewayError> {
        let config_path =
            std::env::var("EDGE_GATEWAY_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());

        let built = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("EDGE_GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut loaded: Self = built.try_deserialize()?;
        loaded.apply_env_overrides();
        loaded.validate()?;
        Ok(loaded)
    }

    /// The short variable names the hosted deployment uses.
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("HF_TOKEN") {
            self.token = Some(token);
        }
        if let Ok(model) = std::env::var("HF_MODEL") {
            self.model = model;
        }
        if let Ok(prompt) = std::env::var("SYSTEM_PROMPT") {
            self.system_prompt = prompt;
        }
        if let Ok(base) = std::env::var("EDGE_API_BASE") {
            self.api_base = base;
        }
        if self.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            self.token = None;
        }
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::Config("model must not be empty".to_string()));
        }
        if self.history_window == 0 {
            return Err(GatewayError::Config("history_window must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(GatewayError::Config("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, GatewayError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("listen address {}:{}: {}", self.host, self.port, e)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
