//! Text-to-speech (TTS) processing

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::playback::AudioPlayback;
use super::voices::Voice;
use crate::config::SpeechSettings;
use crate::{Error, Result};

/// Voice used when the caller does not pick one
pub const DEFAULT_VOICE: &str = "en-US-JennyNeural";

/// Output format matching the playback sample rate
const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

/// Prosody applied to every utterance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechParams {
    /// Speaking rate, 1.0 = normal
    pub rate: f32,
    /// Pitch multiplier, 1.0 = normal
    pub pitch: f32,
    /// Volume in `[0, 1]`
    pub volume: f32,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            rate: 0.9,
            pitch: 1.1,
            volume: 0.8,
        }
    }
}

/// Text to speak and how to speak it
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<Voice>,
    pub params: SpeechParams,
}

impl Utterance {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            params: SpeechParams::default(),
        }
    }

    #[must_use]
    pub fn with_voice(mut self, voice: Option<Voice>) -> Self {
        self.voice = voice;
        self
    }
}

/// Lifecycle of one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started,
    Ended,
    Error(String),
}

/// Event stream for one utterance
///
/// Dropping the handle stops playback of its utterance, and only that one.
pub struct SpeechHandle {
    events: mpsc::Receiver<SpeechEvent>,
    cancel: Option<Arc<AtomicBool>>,
}

impl SpeechHandle {
    #[must_use]
    pub const fn new(events: mpsc::Receiver<SpeechEvent>) -> Self {
        Self {
            events,
            cancel: None,
        }
    }

    /// Handle whose drop raises `cancel`
    #[must_use]
    pub const fn with_cancel(
        events: mpsc::Receiver<SpeechEvent>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            events,
            cancel: Some(cancel),
        }
    }

    /// Next event, or `None` once the synthesizer is done with this utterance
    pub async fn next(&mut self) -> Option<SpeechEvent> {
        self.events.recv().await
    }
}

impl Drop for SpeechHandle {
    fn drop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.store(true, Ordering::Relaxed);
        }
    }
}

/// Speaks text aloud
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Voices this synthesizer can use
    async fn voices(&self) -> Result<Vec<Voice>>;

    /// Queue an utterance and return its event stream
    async fn speak(&self, utterance: Utterance) -> Result<SpeechHandle>;

    /// Stop whatever is currently being spoken
    fn cancel(&self);
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VoiceEntry {
    short_name: String,
    locale: String,
}

/// Azure neural TTS with local playback
pub struct CloudSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    language: String,
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl CloudSynthesizer {
    #[must_use]
    pub fn new(settings: SpeechSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint,
            api_key: settings.api_key,
            language: settings.language,
            current: Mutex::new(None),
        }
    }

    /// Synthesize an utterance to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if the TTS request fails
    pub async fn synthesize(&self, utterance: &Utterance) -> Result<Vec<u8>> {
        let (voice, lang) = utterance.voice.as_ref().map_or(
            (DEFAULT_VOICE, self.language.as_str()),
            |v| (v.name.as_str(), v.lang.as_str()),
        );
        let ssml = build_ssml(&utterance.text, voice, lang, utterance.params);

        let response = self
            .client
            .post(format!("{}/cognitiveservices/v1", self.endpoint))
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .body(ssml)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("Azure TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), voice, "synthesized speech");
        Ok(audio.to_vec())
    }

    fn replace_current(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        if let Ok(mut current) = self.current.lock()
            && let Some(previous) = current.replace(Arc::clone(&flag))
        {
            previous.store(true, Ordering::Relaxed);
        }
        flag
    }
}

#[async_trait]
impl Synthesizer for CloudSynthesizer {
    async fn voices(&self) -> Result<Vec<Voice>> {
        let response = self
            .client
            .get(format!("{}/cognitiveservices/voices/list", self.endpoint))
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("voice list error {status}: {body}")));
        }

        let entries: Vec<VoiceEntry> = response.json().await?;
        Ok(entries
            .into_iter()
            .map(|e| Voice::new(e.short_name, e.locale))
            .collect())
    }

    async fn speak(&self, utterance: Utterance) -> Result<SpeechHandle> {
        let cancel = self.replace_current();
        let (tx, rx) = mpsc::channel(4);
        let handle = SpeechHandle::with_cancel(rx, Arc::clone(&cancel));

        let audio = match self.synthesize(&utterance).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(error = %e, "speech synthesis failed");
                let _ = tx.send(SpeechEvent::Error(e.to_string())).await;
                return Ok(handle);
            }
        };

        if cancel.load(Ordering::Relaxed) {
            let _ = tx.send(SpeechEvent::Ended).await;
            return Ok(handle);
        }

        tokio::spawn(async move {
            let _ = tx.send(SpeechEvent::Started).await;

            let played = tokio::task::spawn_blocking(move || {
                AudioPlayback::new()?.play_mp3_blocking(&audio, &cancel)
            })
            .await;

            let event = match played {
                Ok(Ok(_)) => SpeechEvent::Ended,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "speech playback failed");
                    SpeechEvent::Error(e.to_string())
                }
                Err(e) => SpeechEvent::Error(e.to_string()),
            };
            let _ = tx.send(event).await;
        });

        Ok(handle)
    }

    fn cancel(&self) {
        if let Ok(current) = self.current.lock()
            && let Some(flag) = current.as_ref()
        {
            flag.store(true, Ordering::Relaxed);
        }
    }
}

/// Prints replies instead of speaking them
#[derive(Debug, Default, Clone, Copy)]
pub struct TextOnlySynthesizer;

#[async_trait]
impl Synthesizer for TextOnlySynthesizer {
    async fn voices(&self) -> Result<Vec<Voice>> {
        Ok(Vec::new())
    }

    async fn speak(&self, utterance: Utterance) -> Result<SpeechHandle> {
        let (tx, rx) = mpsc::channel(2);
        tracing::info!(text = %utterance.text, "assistant reply (speech output disabled)");
        let _ = tx.send(SpeechEvent::Started).await;
        let _ = tx.send(SpeechEvent::Ended).await;
        Ok(SpeechHandle::new(rx))
    }

    fn cancel(&self) {}
}

/// Render an utterance as SSML
#[must_use]
pub fn build_ssml(text: &str, voice: &str, lang: &str, params: SpeechParams) -> String {
    let mut ssml = String::new();
    let _ = write!(
        ssml,
        "<speak version='1.0' xml:lang='{lang}'><voice name='{voice}'>\
         <prosody rate='{}' pitch='{}' volume='{}'>{}</prosody></voice></speak>",
        relative_percent(params.rate),
        relative_percent(params.pitch),
        volume_percent(params.volume),
        escape_xml(text),
    );
    ssml
}

#[allow(clippy::cast_possible_truncation)]
fn relative_percent(factor: f32) -> String {
    let percent = ((factor - 1.0) * 100.0).round() as i32;
    format!("{percent:+}%")
}

#[allow(clippy::cast_possible_truncation)]
fn volume_percent(volume: f32) -> i32 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as i32
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
