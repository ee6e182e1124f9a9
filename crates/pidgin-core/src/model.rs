//! Core data model: messages, agents, conversations, experiment configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which of the two conversational participants a message or agent belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    AgentA,
    AgentB,
}

impl AgentId {
    pub fn other(self) -> AgentId {
        match self {
            AgentId::AgentA => AgentId::AgentB,
            AgentId::AgentB => AgentId::AgentA,
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentId::AgentA => write!(f, "agent_a"),
            AgentId::AgentB => write!(f, "agent_b"),
        }
    }
}

/// A message's role as emitted (before the conductor rewrites it for replay
/// to a provider — see [`crate::conductor`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message in a conversation. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub agent_id: Option<AgentId>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, agent_id: Option<AgentId>) -> Self {
        Self {
            role,
            content: content.into(),
            agent_id,
            timestamp: Utc::now(),
        }
    }
}

/// One of the two participants in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub model_id: String,
    pub display_name: String,
    pub temperature: Option<f32>,
    pub thinking_enabled: bool,
    pub thinking_budget: Option<u32>,
    /// Set once the first message is parsed, when `choose_names` is enabled.
    pub chosen_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Created,
    Running,
    Completed,
    Failed,
    Interrupted,
}

/// Why a conversation's turn loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxTurnsReached,
    HighConvergence,
    ProviderFatal,
    Interrupted,
    PausedIndefinite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub experiment_id: String,
    pub agents: [Agent; 2],
    pub messages: Vec<Message>,
    pub turn_count: u32,
    pub status: ConversationStatus,
    pub convergence_history: Vec<f64>,
}

impl Conversation {
    /// Messages contributed by one agent, excluding system/seed messages.
    pub fn messages_from(&self, agent_id: AgentId) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(move |m| m.agent_id == Some(agent_id) && m.role == MessageRole::Assistant)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstSpeaker {
    AgentA,
    AgentB,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceAction {
    Stop,
    Pause,
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvergenceProfile {
    #[default]
    Balanced,
    Structural,
    Semantic,
    Strict,
}

/// An awareness level, or a path to a custom YAML awareness file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Awareness {
    Level(AwarenessLevel),
    Custom(PathBuf),
}

impl Default for Awareness {
    fn default() -> Self {
        Awareness::Level(AwarenessLevel::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AwarenessLevel {
    None,
    Basic,
    Firm,
    Research,
}

/// Initial prompt source: either a literal string or a dimensional spec
/// (`context:topic[:mode]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    Initial(String),
    Dimensional(String),
}

/// Input contract for starting an experiment. Validation is total: see
/// [`ExperimentConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    pub agent_a_model: String,
    pub agent_b_model: String,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    pub max_turns: u32,

    pub initial_prompt: Option<String>,
    pub dimensions: Option<String>,

    pub temperature: Option<f32>,
    pub temperature_a: Option<f32>,
    pub temperature_b: Option<f32>,

    #[serde(default = "default_max_parallel")]
    pub max_parallel: u32,
    pub convergence_threshold: Option<f64>,
    #[serde(default)]
    pub convergence_action: Option<ConvergenceAction>,
    #[serde(default)]
    pub convergence_profile: ConvergenceProfile,
    #[serde(default)]
    pub first_speaker: Option<FirstSpeaker>,

    #[serde(default)]
    pub awareness_a: Awareness,
    #[serde(default)]
    pub awareness_b: Awareness,

    #[serde(default)]
    pub choose_names: bool,
    #[serde(default = "default_allow_truncation")]
    pub allow_truncation: bool,
    pub think_budget: Option<u32>,
}

fn default_repetitions() -> u32 {
    1
}

fn default_max_parallel() -> u32 {
    1
}

fn default_allow_truncation() -> bool {
    true
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("agent_a_model must not be empty")]
    EmptyAgentAModel,
    #[error("agent_b_model must not be empty")]
    EmptyAgentBModel,
    #[error("repetitions must be >= 1")]
    RepetitionsTooLow,
    #[error("max_turns must be >= 1")]
    MaxTurnsTooLow,
    #[error("max_parallel must be >= 1")]
    MaxParallelTooLow,
    #[error("temperature must be in [0, 2]")]
    TemperatureOutOfRange,
    #[error("convergence_threshold must be in [0, 1]")]
    ConvergenceThresholdOutOfRange,
    #[error("exactly one of initial_prompt or dimensions must be set")]
    AmbiguousPromptSource,
}

impl ExperimentConfig {
    /// Total validation: collects every problem rather than
    /// short-circuiting on the first one found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(ConfigError::EmptyName);
        }
        if self.agent_a_model.trim().is_empty() {
            errors.push(ConfigError::EmptyAgentAModel);
        }
        if self.agent_b_model.trim().is_empty() {
            errors.push(ConfigError::EmptyAgentBModel);
        }
        if self.repetitions < 1 {
            errors.push(ConfigError::RepetitionsTooLow);
        }
        if self.max_turns < 1 {
            errors.push(ConfigError::MaxTurnsTooLow);
        }
        if self.max_parallel < 1 {
            errors.push(ConfigError::MaxParallelTooLow);
        }
        for t in [self.temperature, self.temperature_a, self.temperature_b]
            .into_iter()
            .flatten()
        {
            if !(0.0..=2.0).contains(&t) {
                errors.push(ConfigError::TemperatureOutOfRange);
                break;
            }
        }
        if let Some(c) = self.convergence_threshold {
            if !(0.0..=1.0).contains(&c) {
                errors.push(ConfigError::ConvergenceThresholdOutOfRange);
            }
        }
        if self.initial_prompt.is_some() == self.dimensions.is_some() {
            errors.push(ConfigError::AmbiguousPromptSource);
        }

        errors
    }

    pub fn prompt_source(&self) -> Option<PromptSource> {
        if let Some(p) = &self.initial_prompt {
            Some(PromptSource::Initial(p.clone()))
        } else {
            self.dimensions.clone().map(PromptSource::Dimensional)
        }
    }

    pub fn temperature_for(&self, agent_id: AgentId) -> Option<f32> {
        match agent_id {
            AgentId::AgentA => self.temperature_a.or(self.temperature),
            AgentId::AgentB => self.temperature_b.or(self.temperature),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Created,
    Running,
    Completed,
    Failed,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub config: ExperimentConfig,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExperimentStatus,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

impl Experiment {
    pub fn new(id: impl Into<String>, config: ExperimentConfig) -> Self {
        let total = config.repetitions;
        Self {
            id: id.into(),
            config,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: ExperimentStatus::Created,
            total,
            completed: 0,
            failed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_collects_every_error() {
        let config = ExperimentConfig {
            name: String::new(),
            agent_a_model: String::new(),
            agent_b_model: "local:test".into(),
            repetitions: 0,
            max_turns: 0,
            initial_prompt: Some("hi".into()),
            dimensions: Some("x:y".into()),
            temperature: Some(5.0),
            temperature_a: None,
            temperature_b: None,
            max_parallel: 0,
            convergence_threshold: Some(2.0),
            convergence_action: None,
            convergence_profile: ConvergenceProfile::Balanced,
            first_speaker: None,
            awareness_a: Awareness::default(),
            awareness_b: Awareness::default(),
            choose_names: false,
            allow_truncation: true,
            think_budget: None,
        };

        let errors = config.validate();
        assert!(errors.contains(&ConfigError::EmptyName));
        assert!(errors.contains(&ConfigError::EmptyAgentAModel));
        assert!(errors.contains(&ConfigError::RepetitionsTooLow));
        assert!(errors.contains(&ConfigError::MaxTurnsTooLow));
        assert!(errors.contains(&ConfigError::MaxParallelTooLow));
        assert!(errors.contains(&ConfigError::TemperatureOutOfRange));
        assert!(errors.contains(&ConfigError::ConvergenceThresholdOutOfRange));
        assert!(errors.contains(&ConfigError::AmbiguousPromptSource));
    }

    #[test]
    fn valid_config_has_no_errors() {
        let config = ExperimentConfig {
            name: "exp".into(),
            agent_a_model: "local:test".into(),
            agent_b_model: "local:test".into(),
            repetitions: 1,
            max_turns: 3,
            initial_prompt: Some("Test".into()),
            dimensions: None,
            temperature: None,
            temperature_a: None,
            temperature_b: None,
            max_parallel: 1,
            convergence_threshold: None,
            convergence_action: None,
            convergence_profile: ConvergenceProfile::Balanced,
            first_speaker: None,
            awareness_a: Awareness::default(),
            awareness_b: Awareness::default(),
            choose_names: false,
            allow_truncation: true,
            think_budget: None,
        };
        assert!(config.validate().is_empty());
    }
}
