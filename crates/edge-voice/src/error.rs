//! Error types for the edge voice system

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Longest response body excerpt kept for diagnostics.
pub const BODY_EXCERPT_CHARS: usize = 800;

/// Errors that can occur in the voice turn-taking system
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Recognition error: {0}")]
    Recognition(RecognitionErrorKind),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

/// Error classes reported by a speech recognition capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    #[error("not-allowed")]
    NotAllowed,
    #[error("service-not-allowed")]
    ServiceNotAllowed,
    #[error("already-started")]
    AlreadyStarted,
    #[error("no-speech")]
    NoSpeech,
    #[error("aborted")]
    Aborted,
    #[error("audio-capture")]
    AudioCapture,
    #[error("network")]
    Network,
    #[error("{0}")]
    Other(String),
}

impl RecognitionErrorKind {
    /// Permission denials end the session and are never retried.
    pub fn is_permission_denial(&self) -> bool {
        matches!(self, Self::NotAllowed | Self::ServiceNotAllowed)
    }
}

/// Failure to acquire or read the microphone stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("capture unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a speech synthesis capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SynthesisError(pub String);

/// Terminal failure of a completion request.
///
/// Status and body excerpt are kept for logs only; the transcript shows a generic marker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited (status {status}): {body}")]
    RateLimited { status: u16, body: String },

    #[error("service error (status {status}): {body}")]
    Service { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// Build the error for a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = excerpt(body);
        if status == 429 {
            CompletionError::RateLimited { status, body }
        } else {
            CompletionError::Service { status, body }
        }
    }

    /// 429, any 5xx and transport failures are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            CompletionError::Network(_) | CompletionError::RateLimited { .. } => true,
            CompletionError::Service { status, .. } => (500..600).contains(status),
            CompletionError::InvalidResponse(_) => false,
        }
    }

    /// Last HTTP status observed, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::RateLimited { status, .. } | CompletionError::Service { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CompletionError::InvalidResponse(err.to_string())
        } else {
            CompletionError::Network(err.to_string())
        }
    }
}

/// Truncate a response body for diagnostics, on a char boundary.
pub fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}
