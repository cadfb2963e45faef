//! Conversation state and its single transition function

use serde::Serialize;

use crate::emotion::Emotion;

/// Message shown when a listen cycle produced no text
pub const NO_SPEECH_MESSAGE: &str = "No speech detected. Please try speaking again.";

/// Message shown when both chat transports failed
pub const ALL_CHAT_FAILED_MESSAGE: &str =
    "All chat methods failed. Please check your connection and try again.";

/// Where the conversation currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Listening,
    /// Cloud transcription in flight
    Processing,
    /// Chat request in flight
    AwaitingReply,
    Speaking,
}

impl Phase {
    /// An utterance is between capture and reply
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Processing | Self::AwaitingReply)
    }
}

/// Snapshot observed by the UI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationState {
    pub is_listening: bool,
    pub is_speaking: bool,
    pub is_processing: bool,
    pub audio_level: f32,
    pub emotion: Emotion,
    pub confidence: f32,
    pub error: Option<String>,
    pub phase: Phase,
}

/// Every event that can change [`ConversationState`]
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    ErrorCleared,
    /// Speech cut short by a new listen cycle or an explicit stop
    SpeechCancelled,
    ListenStarted,
    /// Capture stopped; `needs_cloud` when no local transcript exists
    ListenStopped { needs_cloud: bool },
    /// Cloud transcription returned; `heard` when it produced text
    TranscriptionFinished { heard: bool },
    AwaitingReply,
    Level(f32),
    Confidence(f32),
    RecognizerError(String),
    Failed(String),
    ReplyReceived(Emotion),
    SpeakingStarted,
    SpeakingFinished,
}

impl ConversationState {
    /// Apply one transition
    pub fn apply(&mut self, transition: &Transition) {
        match transition {
            Transition::ErrorCleared => self.error = None,
            Transition::SpeechCancelled | Transition::SpeakingFinished => {
                self.is_speaking = false;
                if self.phase == Phase::Speaking {
                    self.phase = Phase::Idle;
                }
            }
            Transition::ListenStarted => {
                self.is_listening = true;
                self.phase = Phase::Listening;
            }
            Transition::ListenStopped { needs_cloud } => {
                self.is_listening = false;
                self.audio_level = 0.0;
                if *needs_cloud {
                    self.is_processing = true;
                    self.phase = Phase::Processing;
                } else {
                    self.phase = Phase::AwaitingReply;
                }
            }
            Transition::TranscriptionFinished { heard } => {
                self.is_processing = false;
                if self.phase == Phase::Processing {
                    self.phase = if *heard {
                        Phase::AwaitingReply
                    } else {
                        Phase::Idle
                    };
                }
            }
            Transition::AwaitingReply => self.phase = Phase::AwaitingReply,
            Transition::Level(level) => self.audio_level = level.clamp(0.0, 1.0),
            Transition::Confidence(confidence) => self.confidence = confidence.clamp(0.0, 1.0),
            Transition::RecognizerError(message) => {
                self.error = Some(format!("Speech recognition error: {message}"));
            }
            Transition::Failed(message) => {
                self.error = Some(message.clone());
                self.is_listening = false;
                self.is_processing = false;
                self.audio_level = 0.0;
                self.phase = Phase::Idle;
            }
            Transition::ReplyReceived(emotion) => {
                self.emotion = *emotion;
                self.error = None;
                self.is_speaking = true;
                self.phase = Phase::Speaking;
            }
            Transition::SpeakingStarted => {
                self.is_speaking = true;
                self.phase = Phase::Speaking;
            }
        }
    }
}
