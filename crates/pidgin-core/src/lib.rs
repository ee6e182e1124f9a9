//! Experiment data model, event taxonomy, context management, convergence
//! scoring, awareness profiles and the per-conversation conductor.

pub mod awareness;
pub mod conductor;
pub mod context;
pub mod convergence;
pub mod event;
pub mod event_bus;
pub mod jsonl;
pub mod model;

pub use conductor::{AgentRuntime, AwarenessSource, Conductor, ConductorConfig};
pub use event::{Event, EventKind};
pub use event_bus::{EventBus, EventObserver};
pub use model::{
    Agent, AgentId, Conversation, ConversationStatus, ConvergenceAction, ConvergenceProfile,
    Experiment, ExperimentConfig, ExperimentStatus, Message, MessageRole, TerminationReason,
};
