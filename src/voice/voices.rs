//! Voice catalog and selection

use serde::{Deserialize, Serialize};

/// Name fragments that mark a high quality voice
const PREMIUM_MARKERS: [&str; 3] = ["Neural", "Premium", "Enhanced"];

/// Locale used when no premium voice is available
const FALLBACK_LOCALE: &str = "en-US";

/// A synthesizer voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub lang: String,
    pub is_premium: bool,
}

impl Voice {
    /// Build a voice, deriving `is_premium` from its name
    #[must_use]
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        let name = name.into();
        let is_premium = PREMIUM_MARKERS.iter().any(|m| name.contains(m));
        Self {
            name,
            lang: lang.into(),
            is_premium,
        }
    }
}

/// Pick the voice to speak with
///
/// An explicitly preferred voice wins when it is in the list; otherwise
/// the first premium voice, then the first `en-US` voice, then the first
/// voice at all.
#[must_use]
pub fn select_voice(preferred: Option<&str>, voices: &[Voice]) -> Option<Voice> {
    if let Some(name) = preferred
        && let Some(voice) = voices.iter().find(|v| v.name == name)
    {
        return Some(voice.clone());
    }

    voices
        .iter()
        .find(|v| v.is_premium)
        .or_else(|| voices.iter().find(|v| v.lang == FALLBACK_LOCALE))
        .or_else(|| voices.first())
        .cloned()
}
