//! Layered configuration: defaults, then an optional TOML file, then `EDGE__*` environment.

use crate::completion::CompletionConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::input::InputConfig;
use crate::monitor::MonitorConfig;
use crate::output::OutputConfig;
use crate::turn::TurnConfig;
use serde::{Deserialize, Serialize};

/// Everything the controller needs, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub completion: CompletionConfig,
    pub turn: TurnConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub monitor: MonitorConfig,
}

impl VoiceConfig {
    /// Load config from file and environment. Precedence: env > `EDGE_VOICE_CONFIG` path
    /// (default `config/voice[.toml]`) > defaults.
    ///
    /// Environment keys use `__` between sections, e.g. `EDGE__TURN__INTERRUPT_SETTLE_MS=800`.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("EDGE_VOICE_CONFIG").unwrap_or_else(|_| "config/voice".to_string());

        let built = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("EDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = built.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the components cannot run with.
    pub fn validate(&self) -> VoiceResult<()> {
        let c = &self.completion;
        if c.endpoint.trim().is_empty() {
            return Err(invalid("completion.endpoint must not be empty"));
        }
        if c.history_window == 0 {
            return Err(invalid("completion.history_window must be at least 1"));
        }
        if c.max_words == 0 {
            return Err(invalid("completion.max_words must be at least 1"));
        }
        if c.max_attempts == 0 {
            return Err(invalid("completion.max_attempts must be at least 1"));
        }
        if c.timeout_secs == 0 {
            return Err(invalid("completion.timeout_secs must be positive"));
        }

        let m = &self.monitor;
        if !(m.rms_threshold > 0.0 && m.rms_threshold <= 1.0) {
            return Err(invalid("monitor.rms_threshold must be in (0, 1]"));
        }
        if m.sample_hz == 0 || m.buffer_len == 0 {
            return Err(invalid("monitor.sample_hz and monitor.buffer_len must be positive"));
        }

        if self.input.restart_delay_ms > self.input.max_backoff_ms {
            return Err(invalid("input.restart_delay_ms exceeds input.max_backoff_ms"));
        }
        if self.input.warn_after_failures == 0 {
            return Err(invalid("input.warn_after_failures must be at least 1"));
        }

        let rate = self.output.settings.rate;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(invalid("output.settings.rate must be a positive number"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> VoiceError {
    VoiceError::Config(msg.to_string())
}
