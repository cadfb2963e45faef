//! Chat completion transports
//!
//! Two transports talk to the same Azure OpenAI deployment:
//! [`StreamingChat`] (primary, server-sent events) and [`DirectChat`]
//! (fallback, single JSON response). Both report failures so that only
//! transport-level errors qualify for the fallback.

mod direct;
mod stream;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use direct::DirectChat;
pub use stream::{SseEvent, StreamingChat, parse_sse_line};

use crate::{Error, Result};

/// Persona prompt sent with every request
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an empathetic AI assistant with emotional intelligence. \
Respond naturally and show appropriate emotions in your responses. \
Keep responses concise but engaging for voice conversation.\n\n\
Analyze the emotional tone of the user's message and respond with:\n\
- Appropriate emotional context\n\
- Supportive and understanding tone\n\
- Clear, conversational language suitable for speech\n\n\
Always respond to the user's query directly and helpfully.";

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single turn in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with a fresh id
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A way of getting an assistant reply for a conversation
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &'static str;

    /// Return the assistant reply for the ordered message list
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] for network or HTTP failures,
    /// [`Error::Refused`] when the content filter blocks the reply,
    /// [`Error::EmptyResult`] when the model returns no text
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// Wire format of a message in a completions request
#[derive(Debug, Serialize)]
pub(crate) struct WireMessage<'a> {
    pub role: Role,
    pub content: &'a str,
}

/// Completions request body
#[derive(Debug, Serialize)]
pub(crate) struct CompletionRequest<'a> {
    pub messages: Vec<WireMessage<'a>>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// Build the wire message list, prepending the system prompt unless the
/// conversation already starts with a system message
pub(crate) fn with_system_prompt<'a>(
    system_prompt: &'a str,
    messages: &'a [Message],
) -> Vec<WireMessage<'a>> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    if messages.first().is_none_or(|m| m.role != Role::System) {
        wire.push(WireMessage {
            role: Role::System,
            content: system_prompt,
        });
    }
    wire.extend(messages.iter().map(|m| WireMessage {
        role: m.role,
        content: &m.content,
    }));
    wire
}

/// Map a non-success response to an error
///
/// Azure reports content filtering as HTTP 400 with
/// `error.code = "content_filter"`; that is a refusal, not a transport failure.
pub(crate) fn error_for_status(status: reqwest::StatusCode, body: &str) -> Error {
    if is_content_filter_body(body) {
        return Error::Refused(format!("content filter ({status})"));
    }
    Error::Transport(format!("chat API error {status}: {body}"))
}

fn is_content_filter_body(body: &str) -> bool {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    let error = v.get("error");
    let code = error.and_then(|e| e.get("code")).and_then(|c| c.as_str());
    let inner = error
        .and_then(|e| e.get("innererror"))
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str());

    matches!(code, Some("content_filter"))
        || matches!(inner, Some("ResponsibleAIPolicyViolation"))
}

/// Map a transport-level reqwest failure
pub(crate) fn transport_error(e: &reqwest::Error) -> Error {
    Error::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_prepended_once() {
        let messages = vec![Message::user("hi")];
        let wire = with_system_prompt("be nice", &messages);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, Role::System);
        assert_eq!(wire[0].content, "be nice");
        assert_eq!(wire[1].content, "hi");

        let messages = vec![Message::system("custom"), Message::user("hi")];
        let wire = with_system_prompt("be nice", &messages);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].content, "custom");
    }

    #[test]
    fn content_filter_is_refusal() {
        let body = r#"{"error":{"code":"content_filter","message":"filtered"}}"#;
        let err = error_for_status(reqwest::StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, Error::Refused(_)));
        assert!(!err.is_transport());
    }

    #[test]
    fn policy_violation_is_refusal() {
        let body = r#"{"error":{"code":"400","innererror":{"code":"ResponsibleAIPolicyViolation"}}}"#;
        let err = error_for_status(reqwest::StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, Error::Refused(_)));
    }

    #[test]
    fn other_statuses_are_transport() {
        let err = error_for_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "busy");
        assert!(err.is_transport());

        let err = error_for_status(
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"error":{"code":"401"}}"#,
        );
        assert!(err.is_transport());
    }

    #[test]
    fn role_serializes_lowercase() {
        let wire = WireMessage {
            role: Role::Assistant,
            content: "ok",
        };
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
