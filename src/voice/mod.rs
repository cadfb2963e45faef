//! Voice processing module
//!
//! Handles audio capture, local recognition, cloud transcription,
//! speech synthesis and playback.

mod capture;
mod local;
mod playback;
mod recognizer;
mod stt;
mod tts;
mod voices;
pub mod wav;
#[cfg(feature = "local-whisper")]
mod whisper;

pub use capture::{
    AudioSource, CapturedAudio, MicrophoneSource, Recording, input_level, samples_to_wav,
};
pub use local::{OfflineRecognizer, SpeechModel, model_language};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use recognizer::{DEFAULT_DRAIN_TIMEOUT, RecognitionHandle, Recognizer, RecognizerEvent};
pub use stt::{
    DEFAULT_CONFIDENCE, SpeechToText, Transcriber, TranscriptionResult, normalize_response,
};
pub use tts::{
    CloudSynthesizer, DEFAULT_VOICE, SpeechEvent, SpeechHandle, SpeechParams, Synthesizer,
    TextOnlySynthesizer, Utterance, build_ssml,
};
pub use voices::{Voice, select_voice};
pub use wav::{AudioBlob, to_samples, to_wav};
#[cfg(feature = "local-whisper")]
pub use whisper::WhisperModel;
