//! Awareness profiles: built-in system-prompt templates telling an agent
//! about the nature of the conversation (and, at `research` level, the
//! other agent's display name), or a custom per-turn override loaded from
//! YAML.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::model::AwarenessLevel;

const NONE_PROMPT: &str = "";

const BASIC_PROMPT: &str = "You are taking part in a conversation with another AI agent.";

const FIRM_PROMPT: &str = "You are talking with another AI. This is a conversation between two AI agents, not a human and an AI. Respond naturally as yourself.";

const RESEARCH_PROMPT_TEMPLATE: &str = "You are part of a research study on AI-to-AI conversation. You are talking with another AI agent named {other_display_name}. Your responses will be recorded and analyzed for patterns such as vocabulary convergence and structural mimicry.";

/// Render a built-in awareness level's system prompt, substituting the
/// other agent's display name at `research` level.
pub fn render_level(level: AwarenessLevel, other_display_name: &str) -> String {
    match level {
        AwarenessLevel::None => NONE_PROMPT.to_string(),
        AwarenessLevel::Basic => BASIC_PROMPT.to_string(),
        AwarenessLevel::Firm => FIRM_PROMPT.to_string(),
        AwarenessLevel::Research => {
            RESEARCH_PROMPT_TEMPLATE.replace("{other_display_name}", other_display_name)
        }
    }
}

/// A custom per-turn awareness override, keyed by turn index (`"*"` is the
/// default applied when no turn-specific entry matches).
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct CustomAwareness {
    entries: HashMap<String, String>,
}

impl CustomAwareness {
    pub fn load(path: &Path) -> Result<Self, AwarenessError> {
        let raw = std::fs::read_to_string(path).map_err(AwarenessError::Io)?;
        let entries: HashMap<String, String> =
            serde_yaml::from_str(&raw).map_err(AwarenessError::Yaml)?;
        Ok(Self { entries })
    }

    pub fn prompt_for_turn(&self, turn: u32) -> Option<&str> {
        self.entries
            .get(&turn.to_string())
            .or_else(|| self.entries.get("*"))
            .map(String::as_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AwarenessError {
    #[error("failed to read custom awareness file: {0}")]
    Io(std::io::Error),
    #[error("failed to parse custom awareness YAML: {0}")]
    Yaml(serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_level_substitutes_display_name() {
        let prompt = render_level(AwarenessLevel::Research, "Claude");
        assert!(prompt.contains("Claude"));
    }

    #[test]
    fn none_level_is_empty() {
        assert!(render_level(AwarenessLevel::None, "Claude").is_empty());
    }

    #[test]
    fn custom_awareness_falls_back_to_default_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("awareness.yaml");
        std::fs::write(&path, "\"1\": \"Turn one prompt\"\n\"*\": \"Default prompt\"\n").unwrap();

        let custom = CustomAwareness::load(&path).unwrap();
        assert_eq!(custom.prompt_for_turn(1), Some("Turn one prompt"));
        assert_eq!(custom.prompt_for_turn(2), Some("Default prompt"));
    }
}
