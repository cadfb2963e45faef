//! Offline recognition of a whole utterance
//!
//! The recognizer records alongside the cloud path and runs its model once
//! the session is stopped. Inference happens on the blocking pool.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::capture::{AudioSource, Recording};
use super::recognizer::{RecognitionHandle, Recognizer, RecognizerEvent};
use super::stt::DEFAULT_CONFIDENCE;
use super::wav;
use crate::Result;

/// Time a stopped session may spend running the model
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Speech-to-text model that runs in process
pub trait SpeechModel: Send + Sync + 'static {
    /// Transcribe 16 kHz mono samples
    ///
    /// # Errors
    ///
    /// Returns error if inference fails
    fn transcribe(&self, samples: &[f32]) -> Result<String>;
}

/// [`Recognizer`] backed by an in-process [`SpeechModel`]
pub struct OfflineRecognizer<M> {
    model: Arc<M>,
    source: Arc<dyn AudioSource>,
    drain_timeout: Duration,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl<M: SpeechModel> OfflineRecognizer<M> {
    #[must_use]
    pub fn new(model: M, source: Arc<dyn AudioSource>) -> Self {
        Self {
            model: Arc::new(model),
            source,
            drain_timeout: DRAIN_TIMEOUT,
            stop: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

#[async_trait]
impl<M: SpeechModel> Recognizer for OfflineRecognizer<M> {
    async fn start(&self) -> Result<RecognitionHandle> {
        let recording = self.source.open().await?;
        let (tx, rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        if let Ok(mut stop) = self.stop.lock()
            && let Some(previous) = stop.replace(stop_tx)
        {
            let _ = previous.send(());
        }

        let model = Arc::clone(&self.model);
        tokio::spawn(async move {
            // Resolves on stop, or when the recognizer is dropped
            let _ = stop_rx.await;
            if let Some(event) = recognize(model, recording).await {
                let _ = tx.send(event).await;
            }
        });

        tracing::debug!("offline recognizer started");
        Ok(RecognitionHandle::new(rx))
    }

    fn stop(&self) {
        if let Ok(mut stop) = self.stop.lock()
            && let Some(tx) = stop.take()
        {
            let _ = tx.send(());
        }
    }

    fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

/// Finish the recording and run the model; `None` when nothing was said
async fn recognize<M: SpeechModel>(
    model: Arc<M>,
    recording: Box<dyn Recording>,
) -> Option<RecognizerEvent> {
    let audio = match recording.finish().await {
        Ok(audio) if audio.is_empty() => return None,
        Ok(audio) => audio,
        Err(e) => return Some(RecognizerEvent::Error(e.to_string())),
    };

    let samples = match wav::to_samples(&audio.into_blob()) {
        Ok(samples) => samples,
        Err(e) => return Some(RecognizerEvent::Error(e.to_string())),
    };

    let started = std::time::Instant::now();
    let transcribed = tokio::task::spawn_blocking(move || model.transcribe(&samples)).await;

    match transcribed {
        Ok(Ok(text)) => {
            let text = text.trim();
            tracing::debug!(
                elapsed_ms = started.elapsed().as_millis(),
                chars = text.len(),
                "offline transcription finished"
            );
            (!text.is_empty()).then(|| RecognizerEvent::Result {
                text: text.to_string(),
                confidence: DEFAULT_CONFIDENCE,
            })
        }
        Ok(Err(e)) => Some(RecognizerEvent::Error(e.to_string())),
        Err(e) => Some(RecognizerEvent::Error(format!("recognizer task failed: {e}"))),
    }
}

/// Language code a multilingual model expects for a locale ("en-US" → "en")
#[must_use]
pub fn model_language(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::voice::{CapturedAudio, samples_to_wav};
    use crate::{Error, Result};

    struct FixedModel(Result<String>);

    impl SpeechModel for FixedModel {
        fn transcribe(&self, samples: &[f32]) -> Result<String> {
            assert!(!samples.is_empty());
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(Error::Audio(e.to_string())),
            }
        }
    }

    struct ToneSource;

    struct ToneRecording;

    #[async_trait]
    impl AudioSource for ToneSource {
        async fn open(&self) -> Result<Box<dyn Recording>> {
            Ok(Box::new(ToneRecording))
        }
    }

    #[async_trait]
    impl Recording for ToneRecording {
        fn level(&self) -> f32 {
            0.0
        }

        async fn finish(self: Box<Self>) -> Result<CapturedAudio> {
            Ok(CapturedAudio {
                chunks: vec![samples_to_wav(&[0.1; 4_800], 48_000, 1)?],
                mime: "audio/wav".to_string(),
            })
        }
    }

    fn recognizer(model: Result<String>) -> OfflineRecognizer<FixedModel> {
        OfflineRecognizer::new(FixedModel(model), Arc::new(ToneSource))
    }

    #[tokio::test]
    async fn transcript_arrives_after_stop() {
        let recognizer = recognizer(Ok("  turn on the lights ".to_string()));
        let mut handle = recognizer.start().await.unwrap();

        recognizer.stop();

        assert_eq!(
            handle.next().await,
            Some(RecognizerEvent::Result {
                text: "turn on the lights".to_string(),
                confidence: DEFAULT_CONFIDENCE,
            })
        );
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn blank_transcript_ends_without_result() {
        let recognizer = recognizer(Ok("   ".to_string()));
        let mut handle = recognizer.start().await.unwrap();
        recognizer.stop();
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn model_failure_is_reported() {
        let recognizer = recognizer(Err(Error::Audio("model crashed".to_string())));
        let mut handle = recognizer.start().await.unwrap();
        recognizer.stop();
        assert!(matches!(
            handle.next().await,
            Some(RecognizerEvent::Error(ref m)) if m.contains("model crashed")
        ));
    }

    #[test]
    fn drain_timeout_is_configurable() {
        let recognizer = recognizer(Ok(String::new()));
        assert_eq!(recognizer.drain_timeout(), DRAIN_TIMEOUT);

        let recognizer = recognizer.with_drain_timeout(Duration::from_secs(1));
        assert_eq!(recognizer.drain_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn locale_maps_to_model_language() {
        assert_eq!(model_language("en-US"), "en");
        assert_eq!(model_language("pt_BR"), "pt");
        assert_eq!(model_language("DE"), "de");
    }
}
