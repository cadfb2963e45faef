//! Local (on-device) speech recognition
//!
//! A recognizer is optional. When present it is started alongside the
//! recorder and its transcript takes precedence over cloud transcription.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// Default wait for final results after [`Recognizer::stop`]
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Events emitted by a running recognizer
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    /// A finalized segment of speech
    Result { text: String, confidence: f32 },
    /// The recognizer failed; the session continues on the cloud path
    Error(String),
    /// The recognizer stopped on its own
    Ended,
}

/// Receiving side of a recognizer session
pub struct RecognitionHandle {
    events: mpsc::Receiver<RecognizerEvent>,
}

impl RecognitionHandle {
    #[must_use]
    pub const fn new(events: mpsc::Receiver<RecognizerEvent>) -> Self {
        Self { events }
    }

    /// Next event, or `None` once the recognizer has dropped its sender
    pub async fn next(&mut self) -> Option<RecognizerEvent> {
        self.events.recv().await
    }
}

/// Continuous on-device recognizer
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Begin a recognition session
    async fn start(&self) -> Result<RecognitionHandle>;

    /// Stop the current session; safe to call when not running
    fn stop(&self);

    /// How long a stopped session may keep delivering results
    fn drain_timeout(&self) -> Duration {
        DEFAULT_DRAIN_TIMEOUT
    }
}
