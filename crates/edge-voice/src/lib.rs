//! # EDGE Voice - Half-Duplex Conversational Front End
//!
//! Lets a user speak or type to a remote completion service and hear the reply, with
//! barge-in: talking over the assistant cancels its speech mid-sentence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Turn Controller                         │
//! │        (pure TurnMachine + single-task effect shell)         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ Speech Input │  │ Speech Output│  │ Voice Activity│       │
//! │  │ (auto-restart│  │ (voice pick, │  │   Monitor     │       │
//! │  │  recognizer) │  │  half-duplex)│  │ (RMS barge-in)│       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │         ↓                  ↑                  │              │
//! │  ┌──────────────┐          │           Kill Signal           │
//! │  │ Conversation │  ┌──────────────┐          │              │
//! │  │   History    │→ │  Completion  │──────────┘              │
//! │  │ (window: 12) │  │ (retry+fallbk)│                         │
//! │  └──────────────┘  └──────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Platform capabilities (recognition, synthesis, audio capture) are injected as traits from
//! [`capability`]; the `native-audio` feature binds them to cpal and rodio.

pub mod capability;
pub mod completion;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod history;
pub mod input;
pub mod monitor;
pub mod output;
pub mod text;
pub mod turn;

#[cfg(feature = "native-audio")]
pub mod native;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use capability::{
    AudioCapture, CaptureStream, RecognitionSettings, SpeechRecognizer, SpeechSynthesizer,
    Utterance, Voice,
};
pub use completion::{
    ChatCompletions, CompletionConfig, CompletionService, EdgeEndpoint, RemoteCompletionClient,
    Reply, RetryPolicy, TextGeneration, Transport,
};
pub use config::VoiceConfig;
pub use controller::{ControllerHandle, ControllerParts, ControllerUpdate, TurnController, UpdateKind};
pub use error::{
    CaptureError, CompletionError, RecognitionErrorKind, SynthesisError, VoiceError, VoiceResult,
};
pub use event::{Command, Event, EventSender, RecognitionEvent, SynthesisEvent, UtteranceId};
pub use history::{shape_request, ConversationHistory, ConversationTurn, Role};
pub use input::{InputConfig, SpeechInputSession};
pub use monitor::{MonitorConfig, VoiceActivityMonitor};
pub use output::{OutputConfig, SpeechOutputSession, VoiceSettings};
pub use text::{normalize_reply, truncate_words};
pub use turn::{SessionState, TurnConfig, TurnMachine};
