//! whisper.cpp model for offline recognition
//!
//! Built only with the `local-whisper` feature.

use std::path::Path;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::local::{SpeechModel, model_language};
use crate::{Error, Result};

/// A loaded ggml Whisper model
pub struct WhisperModel {
    context: WhisperContext,
    language: String,
}

impl WhisperModel {
    /// Load a ggml model file (e.g. `ggml-base.en.bin`)
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or cannot be loaded
    pub fn load(path: &Path, locale: &str) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "whisper model not found: {}",
                path.display()
            )));
        }
        let path_str = path.to_str().ok_or_else(|| {
            Error::Config(format!("model path is not valid UTF-8: {}", path.display()))
        })?;

        let context =
            WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
                .map_err(|e| Error::Environment(format!("failed to load whisper model: {e:?}")))?;

        tracing::info!(model = %path.display(), "whisper model loaded");
        Ok(Self {
            context,
            language: model_language(locale),
        })
    }
}

impl SpeechModel for WhisperModel {
    fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let mut state = self
            .context
            .create_state()
            .map_err(|e| Error::Audio(format!("failed to create whisper state: {e:?}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.language));
        params.set_translate(false);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| Error::Audio(format!("whisper transcription failed: {e:?}")))?;

        let mut text = String::new();
        for segment in state.as_iter() {
            if let Ok(segment_text) = segment.to_str() {
                let segment_text = segment_text.trim();
                if segment_text.is_empty() {
                    continue;
                }
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(segment_text);
            }
        }

        Ok(text)
    }
}
