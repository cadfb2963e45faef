//! Emotive Voice - voice conversation front end for hosted chat models
//!
//! This library provides:
//! - Audio capture with a local-recognizer-first, cloud-fallback transcript
//! - Chat completions over a streaming transport with a direct fallback
//! - Keyword emotion classification of replies
//! - Speech synthesis and playback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   Conversation                        │
//! │   Idle → Listening → (Processing) → Awaiting → Speak │
//! └───────┬──────────────┬──────────────┬────────────────┘
//!         │              │              │
//! ┌───────▼──────┐ ┌─────▼──────┐ ┌─────▼──────────────┐
//! │ Capture/STT  │ │    Chat    │ │  Emotion / TTS     │
//! │ local, cloud │ │ stream,    │ │  classify, speak   │
//! │              │ │ direct     │ │                    │
//! └──────────────┘ └────────────┘ └────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod conversation;
pub mod emotion;
pub mod error;
pub mod voice;

pub use chat::{ChatTransport, DirectChat, Message, Role, StreamingChat};
pub use config::Config;
pub use conversation::{
    Collaborators, Conversation, ConversationOptions, ConversationState, Phase, Transition,
};
pub use emotion::Emotion;
pub use error::{Error, Result};
