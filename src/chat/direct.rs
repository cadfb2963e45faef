//! Direct (non-streaming) chat transport used as the fallback

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{
    ChatTransport, CompletionRequest, Message, error_for_status, transport_error,
    with_system_prompt,
};
use crate::config::ChatSettings;
use crate::{Error, Result};

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Fallback chat transport: one request, one JSON response
pub struct DirectChat {
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl DirectChat {
    /// Create a direct transport from resolved settings
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

/// Extract the assistant text from a completions response body
fn reply_from(response: CompletionResponse) -> Result<String> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(Error::EmptyResult("no response from model".to_string()));
    };

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(Error::Refused("content filter".to_string()));
    }

    let text = choice
        .message
        .and_then(|m| m.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(Error::EmptyResult("model returned no text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl ChatTransport for DirectChat {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = CompletionRequest {
            messages: with_system_prompt(&self.system_prompt, messages),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        tracing::debug!(messages = messages.len(), "sending direct chat request");

        let response = self
            .client
            .post(&self.url)
            .header("api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "direct chat request failed");
                transport_error(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "direct chat API error");
            return Err(error_for_status(status, &body));
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse chat response");
            transport_error(&e)
        })?;

        reply_from(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<String> {
        reply_from(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn extracts_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":" Hi there! "},"finish_reason":"stop"}]}"#;
        assert_eq!(parse(body).unwrap(), "Hi there!");
    }

    #[test]
    fn no_choices_is_empty_result() {
        assert!(matches!(parse(r#"{"choices":[]}"#), Err(Error::EmptyResult(_))));
        assert!(matches!(parse("{}"), Err(Error::EmptyResult(_))));
    }

    #[test]
    fn filtered_choice_is_refusal() {
        let body = r#"{"choices":[{"message":{"content":null},"finish_reason":"content_filter"}]}"#;
        assert!(matches!(parse(body), Err(Error::Refused(_))));
    }

    #[test]
    fn null_content_is_empty_result() {
        let body = r#"{"choices":[{"message":{"content":null},"finish_reason":"stop"}]}"#;
        assert!(matches!(parse(body), Err(Error::EmptyResult(_))));
    }
}
