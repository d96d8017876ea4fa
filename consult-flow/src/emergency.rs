//! Emergency keyword triage.
//!
//! A message that mentions one of the configured phrases skips the model
//! entirely and gets a fixed alert instead.

/// Phrases that trigger the emergency alert
pub const DEFAULT_EMERGENCY_KEYWORDS: &[&str] = &[
    "heart attack",
    "chest pain",
    "can't breathe",
    "bleeding",
    "stroke",
    "suicide",
    "poison",
];

/// Reply appended in place of a model answer when triage fires
pub const EMERGENCY_ALERT: &str = "EMERGENCY! CALL 1122 IMMEDIATELY!";

/// Spoken form of the alert
pub const EMERGENCY_SPEECH: &str = "Emergency, call one one two two";

#[derive(Debug, Clone)]
pub struct EmergencyDetector {
    keywords: Vec<String>,
}

impl EmergencyDetector {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| normalize(k.as_ref().trim()))
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Case-insensitive substring match against the keyword list
    pub fn is_emergency(&self, text: &str) -> bool {
        let text = normalize(text);
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for EmergencyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_EMERGENCY_KEYWORDS)
    }
}

/// Shorthand for the default keyword list
pub fn is_emergency(text: &str) -> bool {
    EmergencyDetector::default().is_emergency(text)
}

// Phones substitute typographic apostrophes, so "can’t breathe" must match too.
fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}
