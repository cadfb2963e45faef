//! Keyword-based emotion classification of assistant replies
//!
//! Each category counts case-insensitive keyword matches at word starts and
//! the highest count wins. The categories share no keyword: "amazing",
//! "fantastic" and "awesome" count as happy only, and the excited set is
//! filled out with "excited" and "thrilling" instead.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Mood shown for the assistant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Excited,
    Concerned,
}

impl Emotion {
    /// Lowercase label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Excited => "excited",
            Self::Concerned => "concerned",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Keyword sets must stay disjoint
const HAPPY: &[&str] = &[
    "great",
    "wonderful",
    "amazing",
    "excellent",
    "fantastic",
    "awesome",
    "brilliant",
    "love",
    "perfect",
];

const SAD: &[&str] = &[
    "sorry",
    "unfortunately",
    "sad",
    "disappointed",
    "regret",
    "apologize",
    "terrible",
    "awful",
];

const EXCITED: &[&str] = &[
    "exciting",
    "excited",
    "incredible",
    "wow",
    "unbelievable",
    "thrilled",
    "thrilling",
];

const CONCERNED: &[&str] = &[
    "concerned",
    "worried",
    "careful",
    "caution",
    "warning",
    "problem",
    "issue",
    "trouble",
];

/// Categories in tie-break order (ties resolve to neutral regardless)
const CATEGORIES: [(Emotion, &[&str]); 4] = [
    (Emotion::Happy, HAPPY),
    (Emotion::Sad, SAD),
    (Emotion::Excited, EXCITED),
    (Emotion::Concerned, CONCERNED),
];

static PATTERNS: LazyLock<Vec<(Emotion, Regex)>> = LazyLock::new(|| {
    CATEGORIES
        .iter()
        .map(|(emotion, words)| {
            let alternation = words.join("|");
            let re = Regex::new(&format!(r"(?i)\b(?:{alternation})")).expect("valid regex");
            (*emotion, re)
        })
        .collect()
});

/// Per-category match counts for `text`
#[must_use]
pub fn scores(text: &str) -> Vec<(Emotion, usize)> {
    PATTERNS
        .iter()
        .map(|(emotion, re)| (*emotion, re.find_iter(text).count()))
        .collect()
}

/// Pick the emotion whose keywords match most often
///
/// The highest score must be non-zero and unique, otherwise the
/// result is [`Emotion::Neutral`].
#[must_use]
pub fn classify(text: &str) -> Emotion {
    let scores = scores(text);
    let best = scores.iter().map(|(_, n)| *n).max().unwrap_or(0);
    if best == 0 {
        return Emotion::Neutral;
    }

    let mut leaders = scores.iter().filter(|(_, n)| *n == best);
    match (leaders.next(), leaders.next()) {
        (Some((emotion, _)), None) => *emotion,
        _ => Emotion::Neutral,
    }
}
