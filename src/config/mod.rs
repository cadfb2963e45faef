//! Configuration management for the voice front end
//!
//! Values resolve env > toml > default. Missing credentials are not an
//! error at load time; they become fatal when the client that needs them
//! is constructed (see [`ChatConfig::require`] and [`SpeechConfig::require`]).

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::chat::DEFAULT_SYSTEM_PROMPT;
use crate::{Error, Result};

use file::EmotiveConfigFile;

/// Default Azure OpenAI REST API version
pub const DEFAULT_API_VERSION: &str = "2025-01-01-preview";

/// Default recognition language
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Emotive configuration
#[derive(Debug)]
pub struct Config {
    /// Chat completion configuration
    pub chat: ChatConfig,

    /// Speech configuration
    pub speech: SpeechConfig,

    /// Listening session configuration
    pub listen: ListenConfig,
}

/// Chat completion endpoint configuration
#[derive(Debug)]
pub struct ChatConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub deployment: Option<String>,
    pub api_version: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
}

/// Chat configuration with every required value present
#[derive(Debug)]
pub struct ChatSettings {
    /// Fully-qualified chat completions URL
    pub url: String,
    pub api_key: SecretString,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
}

/// Transcription backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SttProviderKind {
    /// Azure Speech Services REST recognition
    #[default]
    Azure,
    /// Azure OpenAI Whisper deployment
    Whisper,
}

impl SttProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "azure" | "azure-speech" => Some(Self::Azure),
            "whisper" => Some(Self::Whisper),
            _ => None,
        }
    }
}

/// Speech configuration
#[derive(Debug)]
pub struct SpeechConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub provider: SttProviderKind,
    pub language: String,
    pub tts_endpoint: Option<String>,
    pub voice: Option<String>,
    /// Whisper deployment name, used with the chat resource credentials
    pub whisper_deployment: String,
    /// ggml model for offline recognition
    pub local_model: Option<PathBuf>,
}

/// Endpoint and key pair for a speech service
#[derive(Debug)]
pub struct SpeechSettings {
    pub endpoint: String,
    pub api_key: SecretString,
    pub language: String,
}

/// Runtime the capture happens on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceProfile {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceProfile {
    /// Hard limit on a single listening session
    #[must_use]
    pub const fn listen_timeout(self) -> Duration {
        match self {
            Self::Desktop => Duration::from_secs(10),
            Self::Mobile => Duration::from_secs(8),
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "desktop" => Some(Self::Desktop),
            "mobile" => Some(Self::Mobile),
            _ => None,
        }
    }
}

/// Listening session configuration
#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub profile: DeviceProfile,
    pub timeout: Duration,
}

impl Default for ListenConfig {
    fn default() -> Self {
        let profile = DeviceProfile::default();
        Self {
            profile,
            timeout: profile.listen_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    pub fn from_sources(fc: EmotiveConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        // Treat empty env values as unset
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let chat = ChatConfig {
            endpoint: env("AZURE_OPENAI_ENDPOINT").or(fc.chat.endpoint),
            api_key: env("AZURE_OPENAI_API_KEY")
                .or(fc.chat.api_key)
                .map(SecretString::from),
            deployment: env("DEPLOYMENT_NAME").or(fc.chat.deployment),
            api_version: env("AZURE_OPENAI_API_VERSION")
                .or(fc.chat.api_version)
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            temperature: fc.chat.temperature.unwrap_or(0.7),
            max_tokens: fc.chat.max_tokens.unwrap_or(150),
            system_prompt: fc
                .chat
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        let provider = env("EMOTIVE_STT_PROVIDER")
            .or(fc.speech.provider)
            .map_or_else(SttProviderKind::default, |p| {
                SttProviderKind::parse(&p).unwrap_or_else(|| {
                    tracing::warn!(provider = %p, "unknown STT provider, using azure");
                    SttProviderKind::default()
                })
            });

        let speech = SpeechConfig {
            endpoint: env("AZURE_SPEECH_ENDPOINT").or(fc.speech.endpoint),
            api_key: env("SPEECH_KEY").or(fc.speech.api_key).map(SecretString::from),
            provider,
            language: env("EMOTIVE_LANGUAGE")
                .or(fc.speech.language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            tts_endpoint: env("AZURE_TTS_ENDPOINT").or(fc.speech.tts_endpoint),
            voice: env("EMOTIVE_VOICE").or(fc.speech.voice),
            whisper_deployment: env("EMOTIVE_WHISPER_DEPLOYMENT")
                .or(fc.speech.whisper_deployment)
                .unwrap_or_else(|| "whisper".to_string()),
            local_model: env("EMOTIVE_LOCAL_MODEL")
                .map(PathBuf::from)
                .or(fc.speech.local_model),
        };

        let profile = env("EMOTIVE_PROFILE")
            .or(fc.listen.profile)
            .and_then(|p| DeviceProfile::parse(&p))
            .unwrap_or_default();
        let timeout = env("EMOTIVE_LISTEN_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .or(fc.listen.timeout_secs)
            .map_or_else(|| profile.listen_timeout(), Duration::from_secs);

        Self {
            chat,
            speech,
            listen: ListenConfig { profile, timeout },
        }
    }
}

impl ChatConfig {
    /// Resolve the chat completions URL and credentials
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if endpoint, key, or deployment is missing
    pub fn require(&self) -> Result<ChatSettings> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::Config("AZURE_OPENAI_ENDPOINT is not configured".to_string()))?;
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("AZURE_OPENAI_API_KEY is not configured".to_string()))?;
        let deployment = self
            .deployment
            .as_deref()
            .ok_or_else(|| Error::Config("DEPLOYMENT_NAME is not configured".to_string()))?;

        Ok(ChatSettings {
            url: completions_url(endpoint, deployment, &self.api_version),
            api_key: SecretString::from(api_key.expose_secret().to_string()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt.clone(),
        })
    }

    /// Azure OpenAI resource base URL (endpoint cut at `/openai/`)
    #[must_use]
    pub fn resource_base(&self) -> Option<String> {
        self.endpoint.as_deref().map(resource_base)
    }
}

impl SpeechConfig {
    /// Resolve the speech endpoint and key
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint or key is missing
    pub fn require(&self) -> Result<SpeechSettings> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::Config("AZURE_SPEECH_ENDPOINT is not configured".to_string()))?;
        self.settings_for(endpoint)
    }

    /// Resolve the text-to-speech endpoint and key
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the TTS endpoint or key is missing
    pub fn require_tts(&self) -> Result<SpeechSettings> {
        let endpoint = self
            .tts_endpoint
            .as_deref()
            .ok_or_else(|| Error::Config("AZURE_TTS_ENDPOINT is not configured".to_string()))?;
        self.settings_for(endpoint)
    }

    fn settings_for(&self, endpoint: &str) -> Result<SpeechSettings> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("SPEECH_KEY is not configured".to_string()))?;

        Ok(SpeechSettings {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.expose_secret().to_string()),
            language: self.language.clone(),
        })
    }
}

/// Strip any deployment path from an Azure OpenAI endpoint
#[must_use]
pub fn resource_base(endpoint: &str) -> String {
    endpoint
        .split("/openai/")
        .next()
        .unwrap_or(endpoint)
        .trim_end_matches('/')
        .to_string()
}

/// Build the chat completions URL for a deployment
#[must_use]
pub fn completions_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
        resource_base(endpoint)
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(EmotiveConfigFile::default(), |_| None);

        assert!(config.chat.endpoint.is_none());
        assert_eq!(config.chat.api_version, DEFAULT_API_VERSION);
        assert!((config.chat.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.chat.max_tokens, 150);
        assert_eq!(config.speech.language, "en-US");
        assert_eq!(config.speech.provider, SttProviderKind::Azure);
        assert_eq!(config.listen.profile, DeviceProfile::Desktop);
        assert_eq!(config.listen.timeout, Duration::from_secs(10));
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = EmotiveConfigFile::default();
        fc.chat.deployment = Some("from-file".to_string());
        fc.chat.endpoint = Some("https://file.openai.azure.com".to_string());

        let config = Config::from_sources(fc, env_from(&[("DEPLOYMENT_NAME", "from-env")]));

        assert_eq!(config.chat.deployment.as_deref(), Some("from-env"));
        assert_eq!(
            config.chat.endpoint.as_deref(),
            Some("https://file.openai.azure.com")
        );
    }

    #[test]
    fn empty_env_value_is_unset() {
        let mut fc = EmotiveConfigFile::default();
        fc.chat.deployment = Some("from-file".to_string());

        let config = Config::from_sources(fc, env_from(&[("DEPLOYMENT_NAME", "  ")]));
        assert_eq!(config.chat.deployment.as_deref(), Some("from-file"));
    }

    #[test]
    fn mobile_profile_shortens_timeout() {
        let config = Config::from_sources(
            EmotiveConfigFile::default(),
            env_from(&[("EMOTIVE_PROFILE", "mobile")]),
        );
        assert_eq!(config.listen.timeout, Duration::from_secs(8));

        let config = Config::from_sources(
            EmotiveConfigFile::default(),
            env_from(&[("EMOTIVE_PROFILE", "mobile"), ("EMOTIVE_LISTEN_TIMEOUT_SECS", "3")]),
        );
        assert_eq!(config.listen.timeout, Duration::from_secs(3));
    }

    #[test]
    fn chat_require_reports_missing_values() {
        let config = Config::from_sources(
            EmotiveConfigFile::default(),
            env_from(&[
                ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com"),
                ("AZURE_OPENAI_API_KEY", "key"),
            ]),
        );

        let err = config.chat.require().unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("DEPLOYMENT_NAME")));
    }

    #[test]
    fn chat_require_builds_url_from_deployment_endpoint() {
        let config = Config::from_sources(
            EmotiveConfigFile::default(),
            env_from(&[
                (
                    "AZURE_OPENAI_ENDPOINT",
                    "https://res.openai.azure.com/openai/deployments/old/chat/completions?api-version=x",
                ),
                ("AZURE_OPENAI_API_KEY", "key"),
                ("DEPLOYMENT_NAME", "gpt-4o"),
            ]),
        );

        let settings = config.chat.require().unwrap();
        assert_eq!(
            settings.url,
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2025-01-01-preview"
        );
        assert_eq!(settings.api_key.expose_secret(), "key");
    }

    #[test]
    fn speech_require_needs_key() {
        let config = Config::from_sources(
            EmotiveConfigFile::default(),
            env_from(&[("AZURE_SPEECH_ENDPOINT", "https://westeurope.api.cognitive.microsoft.com/")]),
        );

        assert!(matches!(config.speech.require(), Err(Error::Config(_))));
        assert!(matches!(config.speech.require_tts(), Err(Error::Config(_))));
    }

    #[test]
    fn speech_require_trims_trailing_slash() {
        let config = Config::from_sources(
            EmotiveConfigFile::default(),
            env_from(&[
                ("AZURE_SPEECH_ENDPOINT", "https://westeurope.api.cognitive.microsoft.com/"),
                ("SPEECH_KEY", "secret"),
                ("EMOTIVE_STT_PROVIDER", "whisper"),
            ]),
        );

        let settings = config.speech.require().unwrap();
        assert_eq!(settings.endpoint, "https://westeurope.api.cognitive.microsoft.com");
        assert_eq!(config.speech.provider, SttProviderKind::Whisper);
    }

    #[test]
    fn local_model_env_overrides_file() {
        let mut fc = EmotiveConfigFile::default();
        fc.speech.local_model = Some(PathBuf::from("/models/file.bin"));

        let config = Config::from_sources(fc, env_from(&[]));
        assert_eq!(
            config.speech.local_model.as_deref(),
            Some(std::path::Path::new("/models/file.bin"))
        );

        let mut fc = EmotiveConfigFile::default();
        fc.speech.local_model = Some(PathBuf::from("/models/file.bin"));
        let config = Config::from_sources(
            fc,
            env_from(&[("EMOTIVE_LOCAL_MODEL", "/models/env.bin")]),
        );
        assert_eq!(
            config.speech.local_model.as_deref(),
            Some(std::path::Path::new("/models/env.bin"))
        );
    }
}
