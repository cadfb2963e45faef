//! TOML configuration file loading
//!
//! Supports `~/.config/emotive/config.toml` as a persistent config source.
//! All fields are optional: the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct EmotiveConfigFile {
    /// Chat completion endpoint configuration
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Speech recognition / synthesis configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Listening session configuration
    #[serde(default)]
    pub listen: ListenFileConfig,
}

/// Chat-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Azure OpenAI resource endpoint
    pub endpoint: Option<String>,

    /// Azure OpenAI API key
    pub api_key: Option<String>,

    /// Deployment name (e.g. "gpt-4o")
    pub deployment: Option<String>,

    /// REST API version
    pub api_version: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Response length cap
    pub max_tokens: Option<u32>,

    /// Override for the assistant persona prompt
    pub system_prompt: Option<String>,
}

/// Speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Speech resource endpoint
    pub endpoint: Option<String>,

    /// Speech subscription key
    pub api_key: Option<String>,

    /// Transcription provider ("azure" or "whisper")
    pub provider: Option<String>,

    /// Recognition language (e.g. "en-US")
    pub language: Option<String>,

    /// Text-to-speech endpoint (e.g. `https://westeurope.tts.speech.microsoft.com`)
    pub tts_endpoint: Option<String>,

    /// Preferred synthesis voice name
    pub voice: Option<String>,

    /// Whisper deployment name when `provider = "whisper"`
    pub whisper_deployment: Option<String>,

    /// ggml model file for offline recognition
    pub local_model: Option<PathBuf>,
}

/// Listening configuration
#[derive(Debug, Default, Deserialize)]
pub struct ListenFileConfig {
    /// Device profile ("desktop" or "mobile")
    pub profile: Option<String>,

    /// Auto-stop timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `EmotiveConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> EmotiveConfigFile {
    let Some(path) = config_file_path() else {
        return EmotiveConfigFile::default();
    };

    load_config_from(&path)
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files yield defaults.
pub fn load_config_from(path: &Path) -> EmotiveConfigFile {
    if !path.exists() {
        return EmotiveConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                EmotiveConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            EmotiveConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/emotive/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("emotive").join("config.toml"))
}
