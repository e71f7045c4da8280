//! Tagged events delivered to the controller's single event loop, plus the timer scheduler.
//!
//! Platform capabilities, completion tasks and timers never touch controller state directly:
//! they post an [`Event`] and the loop handles it in one callback, so transitions never
//! interleave.

use crate::error::{CompletionError, RecognitionErrorKind, SynthesisError, VoiceError, VoiceResult};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Identifier of one synthesized utterance.
pub type UtteranceId = u64;

/// Events raised by a speech recognition capability.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Started,
    /// A recognition result. `final_text` is set only for finalized results.
    Result {
        final_text: Option<String>,
        interim: String,
    },
    Error(RecognitionErrorKind),
    Ended,
}

/// Events raised by a speech synthesis capability.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    Started(UtteranceId),
    Ended(UtteranceId),
    Failed(UtteranceId, SynthesisError),
    /// The platform voice list became available or changed.
    VoicesChanged,
}

/// User-facing commands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    EnableVoice,
    DisableVoice,
    /// Typed submission from a text input.
    Submit(String),
    /// Focus moved to the text input; cancels speech.
    FocusTextInput,
    /// Explicit retry after a permission denial.
    RetryPermission,
    SetSpeechOutput(bool),
    SetRate(f32),
    SelectVoice(Option<String>),
    Stop,
}

/// Fixed delays that fire back into the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Delayed recognition restart, tagged with the session's restart token.
    RestartRecognition(u64),
    /// Settle/cooldown before resuming input, tagged with the controller epoch.
    Resume(u64),
}

#[derive(Debug)]
pub enum Event {
    Control(Command),
    Recognition(RecognitionEvent),
    Synthesis(SynthesisEvent),
    Completion(Result<String, CompletionError>),
    Timer(Timer),
}

/// Cloneable handle for posting events into the controller loop.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Create a sender and the receiver the controller loop drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: Event) -> VoiceResult<()> {
        self.tx
            .send(event)
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    }

    pub fn recognition(&self, event: RecognitionEvent) {
        if self.send(Event::Recognition(event)).is_err() {
            debug!("recognition event dropped: controller stopped");
        }
    }

    pub fn synthesis(&self, event: SynthesisEvent) {
        if self.send(Event::Synthesis(event)).is_err() {
            debug!("synthesis event dropped: controller stopped");
        }
    }

    /// Post `timer` after `after`. Must be called inside a tokio runtime.
    pub fn schedule(&self, after: Duration, timer: Timer) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Event::Timer(timer));
        });
    }
}
