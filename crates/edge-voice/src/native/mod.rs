//! Desktop bindings of the three platform capabilities.
//!
//! - [`CpalCapture`]: microphone stream for barge-in monitoring (cpal).
//! - [`VadRecognizer`]: webrtc-vad gap detection + OpenAI-compatible transcription.
//! - [`HttpSynthesizer`]: OpenAI-compatible `/audio/speech` + rodio playback.
//!
//! cpal streams and rodio sinks are `!Send` on some platforms, so each lives on a dedicated
//! thread and talks to the controller only through [`EventSender`](crate::event::EventSender).

mod capture;
mod recognizer;
mod synthesizer;
mod wav;

pub use capture::CpalCapture;
pub use recognizer::{SttConfig, VadRecognizer};
pub use synthesizer::{HttpSynthesizer, TtsConfig};

use crate::error::{VoiceError, VoiceResult};

/// Resolve the API key for STT/TTS: the specific variable first, then `EDGE_AUDIO_API_KEY`.
fn api_key_from_env(specific: &str) -> VoiceResult<String> {
    std::env::var(specific)
        .or_else(|_| std::env::var("EDGE_AUDIO_API_KEY"))
        .map_err(|_| VoiceError::Config(format!("{} or EDGE_AUDIO_API_KEY is required", specific)))
}
