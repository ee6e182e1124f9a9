//! The per-conversation state machine: prompt construction, turn
//! alternation, streaming aggregation, convergence checking, termination.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pidgin_provider::retry::{with_stream_retry, RetryNotice};
use pidgin_provider::{ChunkKind, Provider, ProviderMessage, Role as ProviderRole};

use crate::awareness::CustomAwareness;
use crate::context::enforce_context_window;
use crate::convergence::score_turn;
use crate::event::EventKind;
use crate::event_bus::EventBus;
use crate::model::{
    Agent, AgentId, Conversation, ConversationStatus, ConvergenceAction, ConvergenceProfile,
    Message, MessageRole, TerminationReason,
};

/// A resolved system prompt source for one agent: either the text itself
/// (already substituted for built-in levels) or a custom per-turn YAML
/// override, pinned to the prompt that applies at turn 1.
pub enum AwarenessSource {
    Text(String),
    Custom(CustomAwareness),
}

impl AwarenessSource {
    /// Resolve the system prompt that applies at `turn`. Built-in levels are
    /// turn-invariant; a custom awareness looks up `turn`'s entry (falling
    /// back to `"*"`).
    fn resolve_for_turn(&self, turn: u32) -> String {
        match self {
            AwarenessSource::Text(t) => t.clone(),
            AwarenessSource::Custom(c) => c.prompt_for_turn(turn).unwrap_or("").to_string(),
        }
    }
}

pub struct AgentRuntime {
    pub agent: Agent,
    pub provider: Arc<dyn Provider>,
    pub awareness: AwarenessSource,
}

pub struct ConductorConfig {
    pub max_turns: u32,
    pub convergence_threshold: Option<f64>,
    pub convergence_action: ConvergenceAction,
    pub convergence_profile: ConvergenceProfile,
    pub allow_truncation: bool,
    pub first_speaker: AgentId,
    /// Context window budget in estimated tokens. A concrete per-model
    /// registry is an external collaborator; callers supply a reasonable
    /// default when the registry isn't consulted.
    pub context_limit: f64,
    /// When set, a one-shot name-choosing instruction is appended to each
    /// agent's system prompt and the Conductor extracts a matching token
    /// from that agent's first message as its chosen name for this
    /// conversation.
    pub choose_names: bool,
}

const NAME_INSTRUCTION: &str = "Before anything else, choose a short name for yourself (2 to 8 characters) and state it in quotes at the very start of your first message, e.g. \"Nova\". Then respond normally.";

pub struct Conductor {
    conversation_id: String,
    experiment_id: String,
    bus: Arc<EventBus>,
    a: AgentRuntime,
    b: AgentRuntime,
    config: ConductorConfig,
}

enum StreamOutcome {
    Completed {
        content: String,
        thinking: String,
        usage: Option<pidgin_provider::Usage>,
    },
    Fatal(String),
}

impl Conductor {
    pub fn new(
        conversation_id: impl Into<String>,
        experiment_id: impl Into<String>,
        bus: Arc<EventBus>,
        a: AgentRuntime,
        b: AgentRuntime,
        config: ConductorConfig,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            experiment_id: experiment_id.into(),
            bus,
            a,
            b,
            config,
        }
    }

    fn runtime_for(&self, id: AgentId) -> &AgentRuntime {
        match id {
            AgentId::AgentA => &self.a,
            AgentId::AgentB => &self.b,
        }
    }

    /// Run a fresh conversation from an initial prompt.
    pub async fn run(self, initial_prompt: String, stop: CancellationToken) -> Conversation {
        let mut messages = Vec::new();
        self.bus.emit(EventKind::ConversationStart).await;

        for agent_id in [AgentId::AgentA, AgentId::AgentB] {
            let mut prompt = self.runtime_for(agent_id).awareness.resolve_for_turn(1);
            if self.config.choose_names {
                prompt = if prompt.is_empty() {
                    NAME_INSTRUCTION.to_string()
                } else {
                    format!("{prompt}\n\n{NAME_INSTRUCTION}")
                };
            }
            if !prompt.is_empty() {
                self.bus
                    .emit(EventKind::SystemPrompt {
                        agent_id,
                        content: prompt.clone(),
                    })
                    .await;
                messages.push(Message::new(MessageRole::System, prompt, Some(agent_id)));
            }
        }

        messages.push(Message::new(MessageRole::User, initial_prompt, None));

        self.run_turns(messages, 0, stop).await
    }

    /// Run a conversation branched from a parent's history, already
    /// truncated to `2 * branch_point_turn` messages by the caller.
    pub async fn run_branched(
        self,
        parent_conversation_id: impl Into<String>,
        branch_point_turn: u32,
        seed_messages: Vec<Message>,
        stop: CancellationToken,
    ) -> Conversation {
        self.bus
            .emit(EventKind::ConversationBranched {
                parent_conversation_id: parent_conversation_id.into(),
                branch_point_turn,
            })
            .await;
        self.run_turns(seed_messages, branch_point_turn, stop).await
    }

    async fn run_turns(
        self,
        mut messages: Vec<Message>,
        start_turn: u32,
        stop: CancellationToken,
    ) -> Conversation {
        let mut convergence_history = Vec::new();
        let mut turn_count = start_turn;
        let mut termination = TerminationReason::MaxTurnsReached;
        let mut chosen_names: std::collections::HashMap<AgentId, String> =
            std::collections::HashMap::new();

        // What each agent's active system prompt is, so a custom awareness's
        // per-turn override is only re-emitted when it actually changes.
        let mut active_system_prompt: std::collections::HashMap<AgentId, Option<String>> =
            std::collections::HashMap::new();
        for agent_id in [AgentId::AgentA, AgentId::AgentB] {
            let existing = messages
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::System && m.agent_id == Some(agent_id))
                .map(|m| m.content.clone());
            active_system_prompt.insert(agent_id, existing);
        }

        'turns: for n in (start_turn + 1)..=self.config.max_turns {
            self.bus.emit(EventKind::TurnStart { turn: n }).await;

            for agent_id in [AgentId::AgentA, AgentId::AgentB] {
                let desired = self.runtime_for(agent_id).awareness.resolve_for_turn(n);
                let desired = if desired.is_empty() { None } else { Some(desired) };
                if active_system_prompt.get(&agent_id) != Some(&desired) {
                    if let Some(text) = &desired {
                        self.bus
                            .emit(EventKind::SystemPrompt {
                                agent_id,
                                content: text.clone(),
                            })
                            .await;
                        messages.push(Message::new(MessageRole::System, text.clone(), Some(agent_id)));
                    }
                    active_system_prompt.insert(agent_id, desired);
                }
            }

            let mut this_turn_content: std::collections::HashMap<AgentId, String> =
                std::collections::HashMap::new();
            // Captured before this turn's messages are appended below, so it's
            // genuinely agent B's message from the prior turn, not the one
            // about to be produced this turn.
            let previous_of_b = previous_message_from(&messages, AgentId::AgentB, n);

            for speaker in [self.config.first_speaker, self.config.first_speaker.other()] {
                let outcome = self.call_agent(speaker, &messages, n).await;
                match outcome {
                    StreamOutcome::Completed {
                        content,
                        thinking,
                        usage,
                    } => {
                        if !thinking.is_empty() {
                            self.bus
                                .emit(EventKind::ThinkingComplete {
                                    agent_id: speaker,
                                    content: thinking,
                                })
                                .await;
                        }
                        self.bus
                            .emit(EventKind::MessageComplete {
                                agent_id: speaker,
                                content: content.clone(),
                                usage,
                            })
                            .await;
                        if self.config.choose_names
                            && n == start_turn + 1
                            && !chosen_names.contains_key(&speaker)
                        {
                            if let Some(name) = extract_chosen_name(&content) {
                                chosen_names.insert(speaker, name);
                            }
                        }
                        this_turn_content.insert(speaker, content.clone());
                        messages.push(Message::new(
                            MessageRole::Assistant,
                            content,
                            Some(speaker),
                        ));
                    }
                    StreamOutcome::Fatal(error) => {
                        self.bus
                            .emit(EventKind::APIError {
                                agent_id: speaker,
                                error,
                            })
                            .await;
                        termination = TerminationReason::ProviderFatal;
                        turn_count = n - 1;
                        break 'turns;
                    }
                }
            }

            turn_count = n;

            let content_a = this_turn_content.get(&AgentId::AgentA).cloned().unwrap_or_default();
            let content_b = this_turn_content.get(&AgentId::AgentB).cloned().unwrap_or_default();
            let score = score_turn(
                &content_a,
                &content_b,
                previous_of_b.as_deref(),
                self.config.convergence_profile,
            );
            convergence_history.push(score);
            self.bus
                .emit(EventKind::TurnComplete {
                    turn: n,
                    convergence_score: score,
                })
                .await;

            if stop.is_cancelled() {
                termination = TerminationReason::Interrupted;
                break 'turns;
            }

            if let Some(threshold) = self.config.convergence_threshold {
                if score >= threshold {
                    match self.config.convergence_action {
                        ConvergenceAction::Stop => {
                            termination = TerminationReason::HighConvergence;
                            break 'turns;
                        }
                        ConvergenceAction::Pause => {
                            self.bus.emit(EventKind::ConversationPaused).await;
                            termination = TerminationReason::PausedIndefinite;
                            break 'turns;
                        }
                        ConvergenceAction::Notify => {}
                    }
                }
            }

            if n == self.config.max_turns {
                termination = TerminationReason::MaxTurnsReached;
            }
        }

        let final_convergence = convergence_history.last().copied();
        self.bus
            .emit(EventKind::ConversationEnd {
                reason: termination,
                turn_count,
                final_convergence,
            })
            .await;

        let status = match termination {
            TerminationReason::MaxTurnsReached
            | TerminationReason::HighConvergence
            | TerminationReason::PausedIndefinite => ConversationStatus::Completed,
            TerminationReason::ProviderFatal => ConversationStatus::Failed,
            TerminationReason::Interrupted => ConversationStatus::Interrupted,
        };

        let mut agent_a = self.a.agent.clone();
        let mut agent_b = self.b.agent.clone();
        agent_a.chosen_name = chosen_names.get(&AgentId::AgentA).cloned();
        agent_b.chosen_name = chosen_names.get(&AgentId::AgentB).cloned();

        Conversation {
            id: self.conversation_id.clone(),
            experiment_id: self.experiment_id.clone(),
            agents: [agent_a, agent_b],
            messages,
            turn_count,
            status,
            convergence_history,
        }
    }

    async fn call_agent(&self, speaker: AgentId, messages: &[Message], turn: u32) -> StreamOutcome {
        let provider_view = build_provider_view(messages, speaker);
        let runtime = self.runtime_for(speaker);
        let (truncated, truncation) = enforce_context_window(
            messages,
            self.config.context_limit,
            runtime.provider.model_family(),
            self.config.allow_truncation,
        );
        if let Some(outcome) = truncation {
            self.bus
                .emit(EventKind::ContextTruncation {
                    agent_id: speaker,
                    original_count: outcome.original_count,
                    kept_count: outcome.kept_count,
                    dropped: outcome.dropped,
                })
                .await;
        }
        let provider_view = if truncated.len() != messages.len() {
            build_provider_view(&truncated, speaker)
        } else {
            provider_view
        };

        self.bus
            .emit(EventKind::MessageRequest {
                agent_id: speaker,
                turn,
            })
            .await;

        let temperature = runtime.agent.temperature;
        let thinking = runtime.agent.thinking_enabled;
        let provider = runtime.provider.clone();

        let stream_result = with_stream_retry(
            || {
                let provider = provider.clone();
                let provider_view = provider_view.clone();
                async move { provider.stream(&provider_view, temperature, thinking).await }
            },
            |notice: RetryNotice| {
                tracing::warn!(
                    attempt = notice.attempt,
                    max_attempts = notice.max_attempts,
                    delay_ms = notice.delay.as_millis() as u64,
                    error = %notice.error,
                    "retrying provider call"
                );
            },
        )
        .await;

        let mut stream = match stream_result {
            Ok(s) => s,
            Err(err) => return StreamOutcome::Fatal(err.redacted()),
        };

        let mut content = String::new();
        let mut thinking_content = String::new();
        let mut usage = None;

        use futures::StreamExt;
        loop {
            match stream.next().await {
                Some(Ok(chunk)) => match chunk.kind {
                    ChunkKind::Response => {
                        content.push_str(&chunk.content);
                        self.bus
                            .emit(EventKind::MessageChunk {
                                agent_id: speaker,
                                content: chunk.content,
                            })
                            .await;
                    }
                    ChunkKind::Thinking => thinking_content.push_str(&chunk.content),
                    ChunkKind::RetryNotice => {}
                },
                Some(Err(err)) => {
                    // A mid-stream failure after content was already forwarded
                    // is final, per the streaming robustness contract.
                    return StreamOutcome::Fatal(err.redacted());
                }
                None => break,
            }
        }
        usage = usage.or_else(|| runtime.provider.last_usage());

        StreamOutcome::Completed {
            content,
            thinking: thinking_content,
            usage,
        }
    }
}

/// Rewrite message roles for replay to `speaker`: its own previous messages
/// become `assistant`, the other's become `user`, system messages stay
/// system, and the seed message (no agent_id) is a `user` turn.
fn build_provider_view(messages: &[Message], speaker: AgentId) -> Vec<ProviderMessage> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                MessageRole::System => ProviderRole::System,
                _ => match m.agent_id {
                    Some(id) if id == speaker => ProviderRole::Assistant,
                    _ => ProviderRole::User,
                },
            };
            ProviderMessage::new(role, m.content.clone())
        })
        .collect()
}

/// Extract a 2-8 character chosen-name token from an agent's first message,
/// per the name-choosing instruction in [`NAME_INSTRUCTION`]: a quoted word
/// near the start of the response.
fn extract_chosen_name(content: &str) -> Option<String> {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex::Regex::new(r#"["'“]([A-Za-z][A-Za-z0-9_-]{1,7})["'”]"#).unwrap()
    });
    re.captures(content.trim_start())
        .map(|c| c[1].to_string())
}

/// `agent_id`'s message from the turn immediately before `turn`, for the
/// convergence calculator's mimicry component. Caller must invoke this
/// before appending `turn`'s own messages, or it returns the current turn's
/// message instead of the prior one.
fn previous_message_from(messages: &[Message], agent_id: AgentId, turn: u32) -> Option<String> {
    if turn <= 1 {
        return None;
    }
    messages
        .iter()
        .rev()
        .find(|m| m.agent_id == Some(agent_id) && m.role == MessageRole::Assistant)
        .map(|m| m.content.clone())
}
