//! The experiment manifest: the canonical on-disk experiment state, updated
//! at every significant event and finalized at experiment end.
//!
//! A single writer per experiment (this process) is sufficient; writes are
//! atomic via write-temp-then-rename, mirroring the manifest observer's
//! approach in the parent lineage's session store persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pidgin_core::event::{Event, EventKind};
use pidgin_core::event_bus::EventObserver;
use pidgin_core::model::{ConversationStatus, ExperimentConfig, ExperimentStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationManifestEntry {
    pub status: ConversationStatus,
    pub jsonl: String,
    pub turns_completed: u32,
    pub last_line: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversationManifestEntry {
    pub fn new(jsonl: impl Into<String>) -> Self {
        Self {
            status: ConversationStatus::Created,
            jsonl: jsonl.into(),
            turns_completed: 0,
            last_line: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExperimentStatus,
    pub configuration: ExperimentConfig,
    pub total_conversations: u32,
    pub completed_conversations: u32,
    pub failed_conversations: u32,
    pub conversations: HashMap<String, ConversationManifestEntry>,
}

impl Manifest {
    pub fn new(experiment_id: impl Into<String>, config: ExperimentConfig) -> Self {
        let total = config.repetitions;
        Self {
            experiment_id: experiment_id.into(),
            name: config.name.clone(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: ExperimentStatus::Created,
            configuration: config,
            total_conversations: total,
            completed_conversations: 0,
            failed_conversations: 0,
            conversations: HashMap::new(),
        }
    }

    /// Write this manifest to `path` atomically: write to a sibling temp
    /// file, then rename over the destination.
    pub fn write_atomic(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)
    }

    /// Read a manifest, retrying once on parse error to tolerate a
    /// partial-write window from a concurrent writer.
    pub fn read(path: &Path) -> std::io::Result<Manifest> {
        for attempt in 0..2 {
            let raw = std::fs::read_to_string(path)?;
            match serde_json::from_str(&raw) {
                Ok(manifest) => return Ok(manifest),
                Err(_) if attempt == 0 => continue,
                Err(err) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
                }
            }
        }
        unreachable!()
    }
}

/// Subscribes to one conversation's [`pidgin_core::event_bus::EventBus`] and
/// keeps the shared in-memory manifest (and its on-disk copy) current.
pub struct ManifestObserver {
    conversation_id: String,
    manifest: Arc<Mutex<Manifest>>,
    path: PathBuf,
}

impl ManifestObserver {
    pub fn new(conversation_id: impl Into<String>, manifest: Arc<Mutex<Manifest>>, path: PathBuf) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            manifest,
            path,
        }
    }

    fn flush(&self) {
        let manifest = self.manifest.lock();
        if let Err(err) = manifest.write_atomic(&self.path) {
            tracing::warn!(error = %err, "failed to write manifest");
        }
    }
}

#[async_trait]
impl EventObserver for ManifestObserver {
    async fn on_event(&self, event: &Event) {
        {
            let mut manifest = self.manifest.lock();
            let entry = manifest
                .conversations
                .entry(self.conversation_id.clone())
                .or_insert_with(|| ConversationManifestEntry::new(format!("{}.jsonl", self.conversation_id)));
            entry.last_line += 1;

            match &event.kind {
                EventKind::ConversationStart => entry.status = ConversationStatus::Running,
                EventKind::TurnComplete { turn, .. } => entry.turns_completed = *turn,
                EventKind::ConversationEnd { reason, .. } => {
                    entry.status = match reason {
                        pidgin_core::model::TerminationReason::MaxTurnsReached
                        | pidgin_core::model::TerminationReason::HighConvergence
                        | pidgin_core::model::TerminationReason::PausedIndefinite => {
                            ConversationStatus::Completed
                        }
                        pidgin_core::model::TerminationReason::ProviderFatal => {
                            ConversationStatus::Failed
                        }
                        pidgin_core::model::TerminationReason::Interrupted => {
                            ConversationStatus::Interrupted
                        }
                    };
                    match entry.status {
                        ConversationStatus::Completed => manifest.completed_conversations += 1,
                        ConversationStatus::Failed => manifest.failed_conversations += 1,
                        _ => {}
                    }
                }
                EventKind::APIError { error, .. } => entry.error = Some(error.clone()),
                _ => {}
            }
        }
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidgin_core::model::ConvergenceProfile;

    fn config() -> ExperimentConfig {
        ExperimentConfig {
            name: "exp".into(),
            agent_a_model: "local:test".into(),
            agent_b_model: "local:test".into(),
            repetitions: 1,
            max_turns: 3,
            initial_prompt: Some("hi".into()),
            dimensions: None,
            temperature: None,
            temperature_a: None,
            temperature_b: None,
            max_parallel: 1,
            convergence_threshold: None,
            convergence_action: None,
            convergence_profile: ConvergenceProfile::Balanced,
            first_speaker: None,
            awareness_a: Default::default(),
            awareness_b: Default::default(),
            choose_names: false,
            allow_truncation: true,
            think_budget: None,
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = Manifest::new("exp_1", config());
        manifest.write_atomic(&path).unwrap();

        let read_back = Manifest::read(&path).unwrap();
        assert_eq!(read_back.experiment_id, "exp_1");
        assert_eq!(read_back.status, ExperimentStatus::Created);
    }

    #[tokio::test]
    async fn observer_tracks_conversation_status_transitions() {
        let manifest = Arc::new(Mutex::new(Manifest::new("exp_1", config())));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let observer = ManifestObserver::new("conv_1", manifest.clone(), path);

        observer
            .on_event(&Event {
                conversation_id: "conv_1".into(),
                timestamp: Utc::now(),
                sequence: 0,
                kind: EventKind::ConversationStart,
            })
            .await;
        observer
            .on_event(&Event {
                conversation_id: "conv_1".into(),
                timestamp: Utc::now(),
                sequence: 1,
                kind: EventKind::ConversationEnd {
                    reason: pidgin_core::model::TerminationReason::MaxTurnsReached,
                    turn_count: 3,
                    final_convergence: Some(0.5),
                },
            })
            .await;

        let manifest = manifest.lock();
        let entry = manifest.conversations.get("conv_1").unwrap();
        assert_eq!(entry.status, ConversationStatus::Completed);
        assert_eq!(manifest.completed_conversations, 1);
    }
}
