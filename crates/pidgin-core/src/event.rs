//! The event taxonomy emitted by one conversation's [`crate::event_bus::EventBus`].
//!
//! Mirrors the wrapper/tagged-variant split the parent lineage uses for its
//! own session events (an outer envelope with `sequence`/`timestamp`, an
//! inner `#[serde(tag = ...)]` enum for the variant-specific fields) but
//! flattened into one JSON object per line, matching the JSONL contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AgentId, TerminationReason};
use pidgin_provider::Usage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventKind {
    ConversationStart,
    SystemPrompt {
        agent_id: AgentId,
        content: String,
    },
    TurnStart {
        turn: u32,
    },
    MessageRequest {
        agent_id: AgentId,
        turn: u32,
    },
    MessageChunk {
        agent_id: AgentId,
        content: String,
    },
    MessageComplete {
        agent_id: AgentId,
        content: String,
        usage: Option<Usage>,
    },
    TurnComplete {
        turn: u32,
        convergence_score: f64,
    },
    ThinkingComplete {
        agent_id: AgentId,
        content: String,
    },
    APIError {
        agent_id: AgentId,
        error: String,
    },
    ProviderTimeout {
        agent_id: AgentId,
    },
    ContextTruncation {
        agent_id: AgentId,
        original_count: usize,
        kept_count: usize,
        dropped: usize,
    },
    RateLimited {
        agent_id: AgentId,
        attempt: usize,
        max_attempts: usize,
        delay_ms: u64,
    },
    InterruptRequest {
        resume: bool,
    },
    ConversationPaused,
    ConversationResumed,
    ConversationEnd {
        reason: TerminationReason,
        turn_count: u32,
        final_convergence: Option<f64>,
    },
    ConversationBranched {
        parent_conversation_id: String,
        branch_point_turn: u32,
    },
    ExperimentStart {
        experiment_id: String,
    },
    ExperimentEnd {
        experiment_id: String,
    },
}

impl EventKind {
    /// The tag value this variant serializes as, for log messages and the
    /// manifest's per-conversation summary.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::ConversationStart => "ConversationStart",
            EventKind::SystemPrompt { .. } => "SystemPrompt",
            EventKind::TurnStart { .. } => "TurnStart",
            EventKind::MessageRequest { .. } => "MessageRequest",
            EventKind::MessageChunk { .. } => "MessageChunk",
            EventKind::MessageComplete { .. } => "MessageComplete",
            EventKind::TurnComplete { .. } => "TurnComplete",
            EventKind::ThinkingComplete { .. } => "ThinkingComplete",
            EventKind::APIError { .. } => "APIError",
            EventKind::ProviderTimeout { .. } => "ProviderTimeout",
            EventKind::ContextTruncation { .. } => "ContextTruncation",
            EventKind::RateLimited { .. } => "RateLimited",
            EventKind::InterruptRequest { .. } => "InterruptRequest",
            EventKind::ConversationPaused => "ConversationPaused",
            EventKind::ConversationResumed => "ConversationResumed",
            EventKind::ConversationEnd { .. } => "ConversationEnd",
            EventKind::ConversationBranched { .. } => "ConversationBranched",
            EventKind::ExperimentStart { .. } => "ExperimentStart",
            EventKind::ExperimentEnd { .. } => "ExperimentEnd",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_flattened_with_event_type_tag() {
        let event = Event {
            conversation_id: "conv_abc".into(),
            timestamp: Utc::now(),
            sequence: 0,
            kind: EventKind::TurnStart { turn: 1 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "TurnStart");
        assert_eq!(json["turn"], 1);
        assert_eq!(json["conversation_id"], "conv_abc");
    }
}
