//! Streaming chat transport (server-sent events)

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{
    ChatTransport, CompletionRequest, Message, error_for_status, transport_error,
    with_system_prompt,
};
use crate::config::ChatSettings;
use crate::{Error, Result};

/// One parsed server-sent event line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A completion chunk
    Chunk {
        content: Option<String>,
        finish_reason: Option<String>,
    },
    /// End-of-stream sentinel (`data: [DONE]`)
    Done,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse a single SSE line
///
/// Returns `None` for blank lines, comments, non-data fields and
/// payloads that are not completion chunks.
#[must_use]
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::trace!(error = %e, "skipping unparseable stream payload");
            return None;
        }
    };

    // Azure sends a leading chunk with no choices (prompt filter results)
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Some(SseEvent::Chunk {
            content: None,
            finish_reason: None,
        });
    };

    Some(SseEvent::Chunk {
        content: choice.delta.and_then(|d| d.content),
        finish_reason: choice.finish_reason,
    })
}

/// Primary chat transport: streams the completion and joins the deltas
pub struct StreamingChat {
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl StreamingChat {
    /// Create a streaming transport from resolved settings
    #[must_use]
    pub fn new(settings: ChatSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: settings.url,
            api_key: settings.api_key,
            system_prompt: settings.system_prompt,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }
}

#[async_trait]
impl ChatTransport for StreamingChat {
    fn name(&self) -> &'static str {
        "streaming"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = CompletionRequest {
            messages: with_system_prompt(&self.system_prompt, messages),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        tracing::debug!(messages = messages.len(), "sending streaming chat request");

        let response = self
            .client
            .post(&self.url)
            .header("api-key", self.api_key.expose_secret())
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "streaming chat request failed");
                transport_error(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "streaming chat API error");
            return Err(error_for_status(status, &body));
        }

        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut reply = String::new();
        let mut done = false;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::error!(error = %e, "chat stream interrupted");
                transport_error(&e)
            })?;
            pending.extend_from_slice(&chunk);

            // Only complete lines are decoded so multi-byte characters
            // split across chunks stay intact
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if apply_line(&line, &mut reply)? {
                    done = true;
                    break 'read;
                }
            }
        }

        if !done {
            // Last line may lack its newline
            if !pending.is_empty() {
                done = apply_line(&pending, &mut reply)?;
            }
            if !done {
                tracing::warn!(chars = reply.len(), "chat stream ended without [DONE]");
            }
        }

        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(Error::EmptyResult("model returned no text".to_string()));
        }

        tracing::debug!(chars = reply.len(), "streaming reply complete");
        Ok(reply)
    }
}

/// Fold one SSE line into `reply`; `true` on the `[DONE]` sentinel
fn apply_line(line: &[u8], reply: &mut String) -> Result<bool> {
    let line = String::from_utf8_lossy(line);
    match parse_sse_line(line.trim_end()) {
        Some(SseEvent::Done) => Ok(true),
        Some(SseEvent::Chunk {
            content,
            finish_reason,
        }) => {
            if let Some(content) = content {
                reply.push_str(&content);
            }
            if finish_reason.as_deref() == Some("content_filter") {
                tracing::warn!("streaming reply stopped by content filter");
                return Err(Error::Refused("content filter".to_string()));
            }
            Ok(false)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delta_chunk() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(
            parse_sse_line(line),
            Some(SseEvent::Chunk {
                content: Some("Hel".to_string()),
                finish_reason: None,
            })
        );
    }

    #[test]
    fn parses_done_sentinel() {
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line("data:[DONE]"), Some(SseEvent::Done));
    }

    #[test]
    fn leading_filter_chunk_has_no_content() {
        let line = r#"data: {"choices":[],"prompt_filter_results":[]}"#;
        assert_eq!(
            parse_sse_line(line),
            Some(SseEvent::Chunk {
                content: None,
                finish_reason: None,
            })
        );
    }

    #[test]
    fn finish_reason_is_reported() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"content_filter"}]}"#;
        assert_eq!(
            parse_sse_line(line),
            Some(SseEvent::Chunk {
                content: None,
                finish_reason: Some("content_filter".to_string()),
            })
        );
    }

    #[test]
    fn lines_fold_into_reply_until_done() {
        let mut reply = String::new();
        let chunk = br#"data: {"choices":[{"delta":{"content":"bye"}}]}"#;
        assert!(!apply_line(chunk, &mut reply).unwrap());
        assert!(!apply_line(b": keep-alive\n", &mut reply).unwrap());
        assert!(apply_line(b"data: [DONE]\r\n", &mut reply).unwrap());
        assert_eq!(reply, "bye");

        let filtered = br#"data: {"choices":[{"delta":{},"finish_reason":"content_filter"}]}"#;
        assert!(matches!(
            apply_line(filtered, &mut reply),
            Err(Error::Refused(_))
        ));
    }

    #[test]
    fn ignores_non_data_lines() {
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: message"), None);
        assert_eq!(parse_sse_line("data: {not json"), None);
    }
}
