//! Trigger phrase set and the matching predicate

use serde::{Deserialize, Serialize};

use super::VoiceError;

/// Built-in phrases, always checked before custom ones
pub const DEFAULT_PHRASES: [&str; 8] = [
    "help",
    "emergency",
    "help me",
    "call for help",
    "i need help",
    "safe word",
    "danger",
    "assistance needed",
];

/// Custom phrases a fresh install starts with
pub const INITIAL_CUSTOM_PHRASES: [&str; 3] = ["help me", "emergency", "safe word"];

/// Default recognition confidence required before matching
pub const DEFAULT_SENSITIVITY: f32 = 0.7;

/// Bounds of the user-facing sensitivity setting
pub const SENSITIVITY_RANGE: (f32, f32) = (0.3, 1.0);

pub fn clamp_sensitivity(value: f32) -> f32 {
    if value.is_nan() {
        return DEFAULT_SENSITIVITY;
    }
    value.clamp(SENSITIVITY_RANGE.0, SENSITIVITY_RANGE.1)
}

/// Lowercase, trim, and collapse runs of whitespace
pub fn normalize_utterance(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Default phrases followed by the user's own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPhrases {
    defaults: Vec<String>,
    custom: Vec<String>,
}

impl Default for TriggerPhrases {
    fn default() -> Self {
        Self::with_custom(INITIAL_CUSTOM_PHRASES.iter().map(|p| p.to_string()))
    }
}

impl TriggerPhrases {
    pub fn with_custom(custom: impl IntoIterator<Item = String>) -> Self {
        let mut phrases = Self {
            defaults: DEFAULT_PHRASES.iter().map(|p| p.to_string()).collect(),
            custom: Vec::new(),
        };
        for phrase in custom {
            // seed lists may repeat; keep the first
            let _ = phrases.add_custom(&phrase);
        }
        phrases
    }

    pub fn defaults(&self) -> &[String] {
        &self.defaults
    }

    pub fn custom(&self) -> &[String] {
        &self.custom
    }

    /// Iteration order used for matching: defaults, then custom
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.defaults.iter().chain(self.custom.iter()).map(String::as_str)
    }

    pub fn add_custom(&mut self, phrase: &str) -> Result<(), VoiceError> {
        let phrase = normalize_utterance(phrase);
        if phrase.is_empty() {
            return Err(VoiceError::EmptyPhrase);
        }
        if self.custom.contains(&phrase) {
            return Err(VoiceError::DuplicatePhrase(phrase));
        }
        self.custom.push(phrase);
        Ok(())
    }

    /// Returns whether anything was removed. Matches the stored form, so
    /// case and spacing of `phrase` do not matter.
    pub fn remove_custom(&mut self, phrase: &str) -> bool {
        let phrase = normalize_utterance(phrase);
        let before = self.custom.len();
        self.custom.retain(|p| *p != phrase);
        self.custom.len() != before
    }

    /// First phrase contained in `utterance`, if the recognizer was
    /// confident enough. Precedence is list order, not match length.
    pub fn find_trigger(&self, utterance: &str, confidence: f32, threshold: f32) -> Option<&str> {
        if confidence < threshold {
            return None;
        }
        let utterance = normalize_utterance(utterance);
        self.iter().find(|phrase| utterance.contains(phrase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_with_enough_confidence() {
        let phrases = TriggerPhrases::default();
        assert_eq!(
            phrases.find_trigger("i need help now", 0.9, DEFAULT_SENSITIVITY),
            Some("help")
        );
        assert_eq!(phrases.find_trigger("i need help now", 0.5, DEFAULT_SENSITIVITY), None);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let phrases = TriggerPhrases::default();
        assert_eq!(phrases.find_trigger("danger", 0.7, 0.7), Some("danger"));
    }

    #[test]
    fn test_first_match_wins_by_list_order() {
        let phrases = TriggerPhrases::default();
        // "call for help" also matches, but "help" is listed first
        assert_eq!(phrases.find_trigger("call for help", 1.0, 0.7), Some("help"));
    }

    #[test]
    fn test_custom_phrases_checked_after_defaults() {
        let mut phrases = TriggerPhrases::with_custom(Vec::new());
        phrases.add_custom("  Pineapple  Pizza ").unwrap();
        assert_eq!(phrases.custom(), ["pineapple pizza".to_string()]);
        assert_eq!(
            phrases.find_trigger("Order a PINEAPPLE   pizza", 0.8, 0.7),
            Some("pineapple pizza")
        );
        assert_eq!(phrases.find_trigger("nothing here", 1.0, 0.7), None);
    }

    #[test]
    fn test_add_and_remove_custom() {
        let mut phrases = TriggerPhrases::default();
        assert_eq!(phrases.custom().len(), 3);
        assert!(matches!(phrases.add_custom("Safe Word"), Err(VoiceError::DuplicatePhrase(_))));
        assert!(matches!(phrases.add_custom("   "), Err(VoiceError::EmptyPhrase)));

        assert!(phrases.remove_custom("safe word"));
        assert!(!phrases.remove_custom("safe word"));
        // defaults are untouched
        assert!(phrases.defaults().iter().any(|p| p == "safe word"));
    }

    #[test]
    fn test_remove_matches_stored_form() {
        let mut phrases = TriggerPhrases::default();
        phrases.add_custom("Red  Balloon").unwrap();
        assert!(phrases.remove_custom("  RED balloon "));
        assert!(!phrases.custom().iter().any(|p| p == "red balloon"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_utterance("  Help\tME \n now "), "help me now");
    }

    #[test]
    fn test_clamp_sensitivity() {
        assert_eq!(clamp_sensitivity(0.1), 0.3);
        assert_eq!(clamp_sensitivity(1.5), 1.0);
        assert_eq!(clamp_sensitivity(0.8), 0.8);
        assert_eq!(clamp_sensitivity(f32::NAN), DEFAULT_SENSITIVITY);
    }
}
