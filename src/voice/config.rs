use super::debug::DEFAULT_DEBUG_CAPACITY;
use std::time::Duration;

/// Voice used when the caller does not ask for one
pub const DEFAULT_VOICE: &str = "ash";

/// Retired voice identifiers and their replacements
const LEGACY_VOICES: &[(&str, &str)] = &[("alloy", "ash")];

/// Configuration for a session orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Voice used when `speak` is called without one
    pub default_voice: String,

    /// Upper bound on any single backend call or token issuance.
    /// `None` lets calls run unbounded.
    pub operation_timeout: Option<Duration>,

    /// Number of debug lines retained
    pub debug_capacity: usize,
}

impl OrchestratorConfig {
    /// Resolve the voice for a `speak` call, mapping legacy identifiers
    pub fn normalize_voice(&self, voice: Option<&str>) -> String {
        let voice = voice
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(&self.default_voice);

        LEGACY_VOICES
            .iter()
            .find(|(legacy, _)| *legacy == voice)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(voice)
            .to_string()
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_voice: DEFAULT_VOICE.to_string(),
            operation_timeout: Some(Duration::from_secs(15)),
            debug_capacity: DEFAULT_DEBUG_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_voice_is_normalized() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.normalize_voice(Some("alloy")), "ash");
        assert_eq!(config.normalize_voice(Some("verse")), "verse");
        assert_eq!(config.normalize_voice(None), "ash");
        assert_eq!(config.normalize_voice(Some("")), "ash");
    }

    #[test]
    fn test_legacy_default_voice_is_normalized_too() {
        let config = OrchestratorConfig {
            default_voice: "alloy".to_string(),
            ..Default::default()
        };

        assert_eq!(config.normalize_voice(None), "ash");
    }
}
