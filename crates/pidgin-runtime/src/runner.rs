//! The parallel runner: fans an experiment out into `max_parallel`
//! concurrently in-flight conversations, gated by a counting semaphore and
//! staggered to avoid a thundering herd of connection opens.
//!
//! Grounded on the parent lineage's `DelegationOrchestrator`
//! (`Arc<Semaphore>` + `acquire_owned()` + per-task `tokio::spawn` + a
//! join-handle map), scoped down from cross-session delegation to one
//! experiment's repetitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use pidgin_core::conductor::{AgentRuntime, AwarenessSource, Conductor, ConductorConfig};
use pidgin_core::event_bus::EventBus;
use pidgin_core::jsonl::JsonlSink;
use pidgin_core::model::{
    Agent, AgentId, ConvergenceAction, ExperimentConfig, ExperimentStatus, FirstSpeaker,
    PromptSource,
};
use pidgin_provider::providers::{
    AnthropicProvider, GoogleProvider, OllamaProvider, OpenAIProvider, OpenRouterProvider,
    SilentProvider, TestProvider,
};
use pidgin_provider::Provider;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::manifest::{Manifest, ManifestObserver};

const STAGGER: Duration = Duration::from_secs(2);
const GRACE_WINDOW: Duration = Duration::from_secs(10);

/// Instantiate a [`Provider`] from a `vendor:model` identifier. Credentials
/// are read from the vendor's environment variable at call time; preflight
/// (see [`crate::daemon`]) has already verified they're present.
pub fn build_provider(model_id: &str) -> anyhow::Result<Arc<dyn Provider>> {
    let (vendor, model) = model_id
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("model id '{model_id}' must be 'vendor:model'"))?;

    let provider: Arc<dyn Provider> = match vendor {
        "anthropic" => {
            let key = std::env::var("ANTHROPIC_API_KEY")?;
            Arc::new(AnthropicProvider::new(key, model.to_string()))
        }
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY")?;
            Arc::new(OpenAIProvider::new(key, model.to_string()))
        }
        "openrouter" => {
            let key = std::env::var("OPENROUTER_API_KEY")?;
            Arc::new(OpenRouterProvider::new(key, model.to_string()))
        }
        "google" => {
            let key = std::env::var("GOOGLE_API_KEY")?;
            Arc::new(GoogleProvider::new(key, model.to_string()))
        }
        "ollama" => Arc::new(OllamaProvider::new(model.to_string())),
        "silent" => Arc::new(SilentProvider),
        "local" => Arc::new(TestProvider::new(model)),
        other => anyhow::bail!("unknown provider vendor '{other}'"),
    };
    Ok(provider)
}

fn required_env_for(model_id: &str) -> Option<&'static str> {
    match model_id.split_once(':').map(|(vendor, _)| vendor) {
        Some("anthropic") => Some("ANTHROPIC_API_KEY"),
        Some("openai") => Some("OPENAI_API_KEY"),
        Some("openrouter") => Some("OPENROUTER_API_KEY"),
        Some("google") => Some("GOOGLE_API_KEY"),
        _ => None,
    }
}

/// Credential variables this config needs, for the daemon's preflight check.
pub fn required_credentials(config: &ExperimentConfig) -> Vec<&'static str> {
    [
        required_env_for(&config.agent_a_model),
        required_env_for(&config.agent_b_model),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| {
            let c = rng.gen_range(0..36);
            std::char::from_digit(c, 36).unwrap()
        })
        .collect()
}

fn resolve_awareness(
    awareness: &pidgin_core::model::Awareness,
    other_display_name: &str,
) -> anyhow::Result<AwarenessSource> {
    use pidgin_core::model::Awareness;
    match awareness {
        Awareness::Level(level) => Ok(AwarenessSource::Text(pidgin_core::awareness::render_level(
            *level,
            other_display_name,
        ))),
        Awareness::Custom(path) => Ok(AwarenessSource::Custom(
            pidgin_core::awareness::CustomAwareness::load(path)?,
        )),
    }
}

/// Resolve which agent speaks first for a given 0-based repetition index.
/// Non-random settings alternate per repetition for fairness across
/// repeated runs; `random` ignores the index and coin-flips every time.
fn resolve_first_speaker(first_speaker: Option<FirstSpeaker>, repetition: u32) -> AgentId {
    let base = match first_speaker {
        Some(FirstSpeaker::AgentA) | None => AgentId::AgentA,
        Some(FirstSpeaker::AgentB) => AgentId::AgentB,
        Some(FirstSpeaker::Random) => {
            return if rand::thread_rng().gen_bool(0.5) {
                AgentId::AgentA
            } else {
                AgentId::AgentB
            }
        }
    };
    if repetition % 2 == 1 {
        base.other()
    } else {
        base
    }
}

/// Resolve the seed text handed to the Conductor. Dimensional prompt *text
/// generation* is an external collaborator (see spec Non-goals); here a
/// dimensional spec is passed straight through as literal text, standing in
/// for that collaborator until one is wired up.
fn resolve_initial_prompt(source: &PromptSource) -> String {
    match source {
        PromptSource::Initial(text) => text.clone(),
        PromptSource::Dimensional(spec) => spec.clone(),
    }
}

pub struct Runner {
    experiments_root: PathBuf,
}

impl Runner {
    pub fn new(experiments_root: PathBuf) -> Self {
        Self { experiments_root }
    }

    /// Run every repetition of `config`, gated by `config.max_parallel`,
    /// until all conversations settle or `stop` is cancelled.
    pub async fn run(&self, experiment_id: &str, config: ExperimentConfig, stop: CancellationToken) {
        let experiment_dir = self.experiments_root.join(experiment_id);
        let _ = std::fs::create_dir_all(&experiment_dir);

        let manifest = Arc::new(SyncMutex::new(Manifest::new(experiment_id, config.clone())));
        manifest.lock().status = ExperimentStatus::Running;
        manifest.lock().started_at = Some(chrono::Utc::now());
        let manifest_path = experiment_dir.join("manifest.json");
        let _ = manifest.lock().write_atomic(&manifest_path);

        let semaphore = Arc::new(Semaphore::new(config.max_parallel as usize));
        let mut handles = Vec::new();

        for repetition in 0..config.repetitions {
            if stop.is_cancelled() {
                break;
            }

            let semaphore = semaphore.clone();
            let manifest = manifest.clone();
            let manifest_path = manifest_path.clone();
            let experiment_dir = experiment_dir.clone();
            let experiment_id = experiment_id.to_string();
            let config = config.clone();
            let stop = stop.clone();

            let handle = tokio::spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                if stop.is_cancelled() {
                    return;
                }

                let conversation_id = format!("conv_{}", random_suffix());

                let result = run_one_conversation(
                    &experiment_id,
                    &conversation_id,
                    &config,
                    repetition,
                    ConversationSinks {
                        manifest: manifest.clone(),
                        manifest_path: manifest_path.clone(),
                        experiment_dir: experiment_dir.clone(),
                    },
                    stop,
                )
                .await;

                if let Err(err) = result {
                    let mut manifest = manifest.lock();
                    manifest.failed_conversations += 1;
                    tracing::warn!(conversation_id, error = %err, "conversation failed to run");
                }

                drop(permit);
            });
            handles.push(handle);

            tokio::time::sleep(STAGGER).await;
        }

        let settle = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        if stop.is_cancelled() {
            let _ = tokio::time::timeout(GRACE_WINDOW, settle).await;
        } else {
            settle.await;
        }

        let mut manifest = manifest.lock();
        manifest.status = if stop.is_cancelled() {
            ExperimentStatus::Interrupted
        } else if manifest.failed_conversations > 0 && manifest.completed_conversations == 0 {
            ExperimentStatus::Failed
        } else {
            ExperimentStatus::Completed
        };
        manifest.completed_at = Some(chrono::Utc::now());
        let _ = manifest.write_atomic(&manifest_path);
    }
}

/// Where a conversation's events are persisted: the experiment's JSONL
/// directory and the shared manifest it reports status transitions into.
struct ConversationSinks {
    manifest: Arc<SyncMutex<Manifest>>,
    manifest_path: PathBuf,
    experiment_dir: PathBuf,
}

async fn run_one_conversation(
    experiment_id: &str,
    conversation_id: &str,
    config: &ExperimentConfig,
    repetition: u32,
    sinks: ConversationSinks,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let bus = Arc::new(EventBus::new(conversation_id));

    let sink = JsonlSink::open(&sinks.experiment_dir, conversation_id).await?;
    bus.add_observer(Arc::new(sink));
    bus.add_observer(Arc::new(ManifestObserver::new(
        conversation_id,
        sinks.manifest,
        sinks.manifest_path,
    )));

    let agent_a_name = "Agent A".to_string();
    let agent_b_name = "Agent B".to_string();

    let agent_a = Agent {
        id: AgentId::AgentA,
        model_id: config.agent_a_model.clone(),
        display_name: agent_a_name.clone(),
        temperature: config.temperature_for(AgentId::AgentA),
        thinking_enabled: config.think_budget.is_some(),
        thinking_budget: config.think_budget,
        chosen_name: None,
    };
    let agent_b = Agent {
        id: AgentId::AgentB,
        model_id: config.agent_b_model.clone(),
        display_name: agent_b_name.clone(),
        temperature: config.temperature_for(AgentId::AgentB),
        thinking_enabled: config.think_budget.is_some(),
        thinking_budget: config.think_budget,
        chosen_name: None,
    };

    let runtime_a = AgentRuntime {
        provider: build_provider(&agent_a.model_id)?,
        awareness: resolve_awareness(&config.awareness_a, &agent_b_name)?,
        agent: agent_a,
    };
    let runtime_b = AgentRuntime {
        provider: build_provider(&agent_b.model_id)?,
        awareness: resolve_awareness(&config.awareness_b, &agent_a_name)?,
        agent: agent_b,
    };

    let conductor_config = ConductorConfig {
        max_turns: config.max_turns,
        convergence_threshold: config.convergence_threshold,
        convergence_action: config.convergence_action.unwrap_or(ConvergenceAction::Notify),
        convergence_profile: config.convergence_profile,
        allow_truncation: config.allow_truncation,
        first_speaker: resolve_first_speaker(config.first_speaker, repetition),
        context_limit: 100_000.0,
        choose_names: config.choose_names,
    };

    let conductor = Conductor::new(
        conversation_id,
        experiment_id,
        bus,
        runtime_a,
        runtime_b,
        conductor_config,
    );

    let prompt_source = config
        .prompt_source()
        .ok_or_else(|| anyhow::anyhow!("config has neither initial_prompt nor dimensions"))?;
    let initial_prompt = resolve_initial_prompt(&prompt_source);

    let _conversation = conductor.run(initial_prompt, stop).await;
    Ok(())
}

/// The set of PID-like handles currently tracked, exposed for `stop-all`
/// style scans over an experiments root (daemon-facing helper).
pub fn list_experiment_dirs(experiments_root: &std::path::Path) -> std::io::Result<HashMap<String, PathBuf>> {
    let mut out = HashMap::new();
    if !experiments_root.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(experiments_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let name = entry.file_name().to_string_lossy().to_string();
            out.insert(name, entry.path());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidgin_core::model::ConvergenceProfile;

    fn config(repetitions: u32, max_parallel: u32) -> ExperimentConfig {
        ExperimentConfig {
            name: "exp".into(),
            agent_a_model: "local:test".into(),
            agent_b_model: "local:test".into(),
            repetitions,
            max_turns: 2,
            initial_prompt: Some("Hello".into()),
            dimensions: None,
            temperature: None,
            temperature_a: None,
            temperature_b: None,
            max_parallel,
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

    #[tokio::test]
    async fn runs_all_repetitions_and_marks_experiment_completed() {
        tokio::time::pause();
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(dir.path().to_path_buf());
        let stop = CancellationToken::new();

        runner.run("exp_1", config(3, 2), stop).await;

        let manifest_path = dir.path().join("exp_1").join("manifest.json");
        let manifest = Manifest::read(&manifest_path).unwrap();
        assert_eq!(manifest.status, ExperimentStatus::Completed);
        assert_eq!(manifest.conversations.len(), 3);
        assert_eq!(manifest.completed_conversations, 3);
    }

    #[tokio::test]
    async fn stop_before_launch_marks_experiment_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(dir.path().to_path_buf());
        let stop = CancellationToken::new();
        stop.cancel();

        runner.run("exp_2", config(3, 1), stop).await;

        let manifest_path = dir.path().join("exp_2").join("manifest.json");
        let manifest = Manifest::read(&manifest_path).unwrap();
        assert_eq!(manifest.status, ExperimentStatus::Interrupted);
        assert_eq!(manifest.conversations.len(), 0);
    }

    #[test]
    fn first_speaker_alternates_per_repetition_when_non_random() {
        assert_eq!(resolve_first_speaker(Some(FirstSpeaker::AgentA), 0), AgentId::AgentA);
        assert_eq!(resolve_first_speaker(Some(FirstSpeaker::AgentA), 1), AgentId::AgentB);
        assert_eq!(resolve_first_speaker(Some(FirstSpeaker::AgentA), 2), AgentId::AgentA);
        assert_eq!(resolve_first_speaker(Some(FirstSpeaker::AgentB), 0), AgentId::AgentB);
        assert_eq!(resolve_first_speaker(Some(FirstSpeaker::AgentB), 1), AgentId::AgentA);
        assert_eq!(resolve_first_speaker(None, 1), AgentId::AgentB);
    }

    #[test]
    fn required_credentials_maps_vendor_prefix_to_env_var() {
        let cfg = config(1, 1);
        let mut cfg = cfg;
        cfg.agent_a_model = "anthropic:claude-3".into();
        cfg.agent_b_model = "local:test".into();
        let creds = required_credentials(&cfg);
        assert_eq!(creds, vec!["ANTHROPIC_API_KEY"]);
    }
}
