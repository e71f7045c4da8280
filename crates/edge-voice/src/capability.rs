//! Platform capabilities injected at construction time.
//!
//! Production binds these to the host (see the `native` module behind `native-audio`);
//! tests bind them to the deterministic fakes in `testing`.

use crate::error::{CaptureError, RecognitionErrorKind, SynthesisError};
use crate::event::{EventSender, UtteranceId};
use serde::{Deserialize, Serialize};

/// How the recognizer is configured once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionSettings {
    pub continuous: bool,
    pub interim_results: bool,
    pub language: String,
}

/// Continuous speech recognition.
///
/// Implementations report `Started`, `Result`, `Error` and `Ended` through the sender given to
/// [`SpeechRecognizer::attach`].
pub trait SpeechRecognizer: Send {
    fn attach(&mut self, events: EventSender, settings: &RecognitionSettings);

    /// Begin a recognition session. An immediate failure is returned; later ones arrive as events.
    fn start(&mut self) -> Result<(), RecognitionErrorKind>;

    /// Stop and deliver any pending final result.
    fn stop(&mut self);

    /// Stop without delivering results.
    fn abort(&mut self);
}

/// A synthesis voice offered by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    /// BCP-47 tag, e.g. `en-US`.
    pub lang: String,
    #[serde(default)]
    pub default: bool,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
            default: false,
        }
    }
}

/// One utterance handed to the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub rate: f32,
    /// `None` uses the platform default voice.
    pub voice: Option<Voice>,
}

/// Speech synthesis.
///
/// Implementations report `Started`, `Ended`, `Failed` and `VoicesChanged` through the sender
/// given to [`SpeechSynthesizer::attach`].
pub trait SpeechSynthesizer: Send {
    fn attach(&mut self, events: EventSender);

    /// Currently known voices. May be empty until the platform has enumerated them.
    fn voices(&self) -> Vec<Voice>;

    fn speak(&mut self, utterance: Utterance) -> Result<(), SynthesisError>;

    /// Cancel the current utterance and clear the queue. Safe when idle.
    fn cancel(&mut self);
}

/// Microphone acquisition for the voice-activity monitor.
pub trait AudioCapture: Send {
    fn acquire(&mut self) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A live microphone stream.
pub trait CaptureStream: Send {
    /// Copy the most recent time-domain samples (normalized to -1.0..1.0) into `buf`.
    /// Returns the number of samples written.
    fn read_latest(&mut self, buf: &mut [f32]) -> usize;

    /// Stop all tracks. Called exactly once, when the monitor is torn down.
    fn release(&mut self);
}
