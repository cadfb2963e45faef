//! Speech-to-text (STT) processing
//!
//! Cloud transcription is a fallback path and never raises: any failure
//! is reported as an empty transcript, which callers treat as "no speech
//! detected".

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::wav::AudioBlob;
use crate::config::{Config, SpeechSettings, SttProviderKind, resource_base};
use crate::{Error, Result};

/// Confidence used when the service does not report one
pub const DEFAULT_CONFIDENCE: f32 = 0.9;

/// Confidence reported for Whisper transcripts (the API has none)
const WHISPER_CONFIDENCE: f32 = 0.95;

/// Fast transcription API version
const FAST_TRANSCRIPTION_API_VERSION: &str = "2024-11-15";

/// Whisper API version
const WHISPER_API_VERSION: &str = "2024-02-01";

/// Recognized text and how sure the recognizer is
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    pub confidence: f32,
}

impl TranscriptionResult {
    #[must_use]
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// "No speech detected"
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Turns recorded audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe audio; failures yield [`TranscriptionResult::empty`]
    async fn transcribe(&self, audio: &AudioBlob) -> TranscriptionResult;
}

/// STT provider backend
#[derive(Clone, Copy, Debug)]
enum SttProvider {
    AzureSpeech,
    Whisper,
}

/// Transcribes speech to text over REST
pub struct SpeechToText {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    language: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create an Azure Speech Services transcriber
    #[must_use]
    pub fn new_azure(settings: SpeechSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint,
            api_key: settings.api_key,
            language: settings.language,
            provider: SttProvider::AzureSpeech,
        }
    }

    /// Create an Azure OpenAI Whisper transcriber
    ///
    /// `url` is the full `audio/transcriptions` URL of the deployment.
    #[must_use]
    pub fn new_whisper(url: String, api_key: SecretString, language: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: url,
            api_key,
            language,
            provider: SttProvider::Whisper,
        }
    }

    /// Create the configured transcriber
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the provider's endpoint or key is missing
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.speech.provider {
            SttProviderKind::Azure => Ok(Self::new_azure(config.speech.require()?)),
            SttProviderKind::Whisper => {
                let endpoint = config.chat.endpoint.as_deref().ok_or_else(|| {
                    Error::Config("AZURE_OPENAI_ENDPOINT is required for Whisper".to_string())
                })?;
                let api_key = config.chat.api_key.as_ref().ok_or_else(|| {
                    Error::Config("AZURE_OPENAI_API_KEY is required for Whisper".to_string())
                })?;
                let url = format!(
                    "{}/openai/deployments/{}/audio/transcriptions?api-version={WHISPER_API_VERSION}",
                    resource_base(endpoint),
                    config.speech.whisper_deployment
                );
                Ok(Self::new_whisper(
                    url,
                    SecretString::from(api_key.expose_secret().to_string()),
                    config.speech.language.clone(),
                ))
            }
        }
    }

    /// Transcribe with Azure Speech, retrying once on the short-audio endpoint
    async fn transcribe_azure(&self, audio: &AudioBlob) -> Result<TranscriptionResult> {
        match self.transcribe_fast(audio).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(error = %e, "fast transcription failed, trying conversation endpoint");
                self.transcribe_conversation(audio).await
            }
        }
    }

    /// Azure fast transcription (multipart audio + definition)
    async fn transcribe_fast(&self, audio: &AudioBlob) -> Result<TranscriptionResult> {
        tracing::debug!(audio_bytes = audio.bytes.len(), "starting Azure fast transcription");

        let definition = serde_json::json!({ "locales": [self.language] }).to_string();
        let form = reqwest::multipart::Form::new()
            .part(
                "audio",
                reqwest::multipart::Part::bytes(audio.bytes.clone())
                    .file_name("audio.wav")
                    .mime_str(&audio.mime)
                    .map_err(|e| Error::Transport(e.to_string()))?,
            )
            .text("definition", definition);

        let url = format!(
            "{}/speechtotext/transcriptions:transcribe?api-version={FAST_TRANSCRIPTION_API_VERSION}",
            self.endpoint
        );

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
            .header("Accept", "application/json")
            .multipart(form)
            .send()
            .await?;

        self.read_result(response, "fast transcription").await
    }

    /// Azure short-audio recognition (raw WAV body)
    async fn transcribe_conversation(&self, audio: &AudioBlob) -> Result<TranscriptionResult> {
        let url = format!(
            "{}/speechtotext/recognition/conversation/cognitiveservices/v1?language={}",
            self.endpoint, self.language
        );

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
            .header(
                "Content-Type",
                "audio/wav; codecs=audio/pcm; samplerate=16000",
            )
            .header("Accept", "application/json")
            .body(audio.bytes.clone())
            .send()
            .await?;

        self.read_result(response, "conversation recognition").await
    }

    /// Transcribe using an Azure OpenAI Whisper deployment
    async fn transcribe_whisper(&self, audio: &AudioBlob) -> Result<TranscriptionResult> {
        tracing::debug!(audio_bytes = audio.bytes.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.bytes.clone())
                    .file_name("audio.wav")
                    .mime_str(&audio.mime)
                    .map_err(|e| Error::Transport(e.to_string()))?,
            )
            .text("model", "whisper-1")
            .text("response_format", "json");

        let response = self
            .client
            .post(&self.endpoint)
            .header("api-key", self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let mut result = self.read_result(response, "Whisper").await?;
        if !result.is_empty() {
            result.confidence = WHISPER_CONFIDENCE;
        }
        Ok(result)
    }

    async fn read_result(
        &self,
        response: reqwest::Response,
        label: &str,
    ) -> Result<TranscriptionResult> {
        let status = response.status();
        tracing::debug!(status = %status, api = label, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, api = label, "speech API error");
            return Err(Error::Transport(format!("{label} error {status}: {body}")));
        }

        let body: Value = response.json().await.map_err(|e| {
            tracing::error!(error = %e, api = label, "failed to parse response");
            e
        })?;

        Ok(normalize_response(&body))
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: &AudioBlob) -> TranscriptionResult {
        let outcome = match self.provider {
            SttProvider::AzureSpeech => self.transcribe_azure(audio).await,
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
        };

        match outcome {
            Ok(result) => {
                tracing::info!(
                    transcript = %result.text,
                    confidence = result.confidence,
                    "transcription complete"
                );
                result
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed, treating as no speech");
                TranscriptionResult::empty()
            }
        }
    }
}

/// Normalize the known response shapes into one result
///
/// Handles batch `combinedRecognizedPhrases`, fast-transcription
/// `combinedPhrases`, short-audio `DisplayText` and Whisper `text`.
#[must_use]
pub fn normalize_response(body: &Value) -> TranscriptionResult {
    let first = |key: &str| body.get(key).and_then(|v| v.as_array()).and_then(|a| a.first());
    let confidence_of = |v: Option<&Value>, key: &str| {
        v.and_then(|v| v.get(key))
            .and_then(Value::as_f64)
            .filter(|c| *c > 0.0)
    };

    let (text, confidence) = if let Some(phrase) = first("combinedRecognizedPhrases") {
        (
            phrase.get("display").and_then(Value::as_str),
            confidence_of(Some(phrase), "confidence"),
        )
    } else if let Some(phrase) = first("combinedPhrases") {
        (
            phrase.get("text").and_then(Value::as_str),
            confidence_of(first("phrases"), "confidence"),
        )
    } else if body.get("DisplayText").is_some() || body.get("RecognitionStatus").is_some() {
        let status_ok = body
            .get("RecognitionStatus")
            .and_then(Value::as_str)
            .is_none_or(|s| s == "Success");
        let text = if status_ok {
            body.get("DisplayText").and_then(Value::as_str)
        } else {
            None
        };
        let confidence = confidence_of(Some(body), "Confidence")
            .or_else(|| confidence_of(first("NBest"), "Confidence"));
        (text, confidence)
    } else {
        (body.get("text").and_then(Value::as_str), None)
    };

    let text = text.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return TranscriptionResult::empty();
    }

    #[allow(clippy::cast_possible_truncation)]
    let confidence = confidence.map_or(DEFAULT_CONFIDENCE, |c| c as f32);
    TranscriptionResult::new(text, confidence)
}
