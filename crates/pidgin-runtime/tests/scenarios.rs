//! End-to-end scenarios exercising the real Parallel Runner against the
//! local deterministic test provider, per the testable-properties scenario
//! list: basic sequential, parallel fan-out, early convergence, and
//! provider-failure isolation.

use std::collections::HashSet;
use std::path::Path;

use pidgin_core::model::{ConvergenceAction, ConvergenceProfile, ExperimentConfig, ExperimentStatus};
use pidgin_runtime::manifest::Manifest;
use pidgin_runtime::runner::Runner;
use tokio_util::sync::CancellationToken;

fn base_config(agent_a_model: &str, agent_b_model: &str, repetitions: u32, max_parallel: u32, max_turns: u32) -> ExperimentConfig {
    ExperimentConfig {
        name: "scenario".into(),
        agent_a_model: agent_a_model.into(),
        agent_b_model: agent_b_model.into(),
        repetitions,
        max_turns,
        initial_prompt: Some("Test".into()),
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

/// Every line in a JSONL file, parsed as a JSON value.
fn read_jsonl_lines(path: &Path) -> Vec<serde_json::Value> {
    let contents = std::fs::read_to_string(path).unwrap();
    contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn conversation_jsonl_files(experiment_dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(experiment_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
        .collect()
}

#[tokio::test]
async fn scenario_basic_sequential() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::new(dir.path().to_path_buf());

    runner
        .run(
            "exp_basic",
            base_config("local:test", "local:test", 1, 1, 3),
            CancellationToken::new(),
        )
        .await;

    let experiment_dir = dir.path().join("exp_basic");
    let manifest = Manifest::read(&experiment_dir.join("manifest.json")).unwrap();
    assert_eq!(manifest.status, ExperimentStatus::Completed);

    let files = conversation_jsonl_files(&experiment_dir);
    assert_eq!(files.len(), 1);

    let lines = read_jsonl_lines(&files[0]);
    assert_eq!(lines[0]["event_type"], "ConversationStart");
    assert_eq!(lines.last().unwrap()["event_type"], "ConversationEnd");
    assert_eq!(lines.last().unwrap()["reason"], "max_turns_reached");

    let turn_completes = lines
        .iter()
        .filter(|l| l["event_type"] == "TurnComplete")
        .count();
    assert_eq!(turn_completes, 3);

    let sequences: Vec<u64> = lines.iter().map(|l| l["sequence"].as_u64().unwrap()).collect();
    let expected: Vec<u64> = (0..sequences.len() as u64).collect();
    assert_eq!(sequences, expected, "sequence numbers must be strictly increasing from 0");
}

#[tokio::test]
async fn scenario_parallel_fan_out_produces_isolated_non_interleaved_logs() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::new(dir.path().to_path_buf());

    runner
        .run(
            "exp_parallel",
            base_config("local:test", "local:test", 4, 2, 2),
            CancellationToken::new(),
        )
        .await;

    let experiment_dir = dir.path().join("exp_parallel");
    let manifest = Manifest::read(&experiment_dir.join("manifest.json")).unwrap();
    assert_eq!(manifest.status, ExperimentStatus::Completed);
    assert_eq!(manifest.completed_conversations, 4);

    let files = conversation_jsonl_files(&experiment_dir);
    assert_eq!(files.len(), 4, "each repetition gets its own jsonl file");

    let mut seen_ids = HashSet::new();
    for file in &files {
        let lines = read_jsonl_lines(file);
        assert_eq!(lines[0]["event_type"], "ConversationStart");
        assert_eq!(lines.last().unwrap()["event_type"], "ConversationEnd");

        // No event from another conversation leaked into this file.
        let conv_id = lines[0]["conversation_id"].as_str().unwrap().to_string();
        assert!(lines.iter().all(|l| l["conversation_id"] == conv_id));
        seen_ids.insert(conv_id);

        let sequences: Vec<u64> = lines.iter().map(|l| l["sequence"].as_u64().unwrap()).collect();
        let expected: Vec<u64> = (0..sequences.len() as u64).collect();
        assert_eq!(sequences, expected);
    }
    assert_eq!(seen_ids.len(), 4, "all four conversation ids are distinct");
}

#[tokio::test]
async fn scenario_early_convergence_stops_before_max_turns() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::new(dir.path().to_path_buf());

    let mut config = base_config("local:test", "local:test", 1, 1, 10);
    config.convergence_threshold = Some(0.5);
    config.convergence_action = Some(ConvergenceAction::Stop);

    runner
        .run("exp_converge", config, CancellationToken::new())
        .await;

    let experiment_dir = dir.path().join("exp_converge");
    let files = conversation_jsonl_files(&experiment_dir);
    let lines = read_jsonl_lines(&files[0]);
    assert_eq!(lines.last().unwrap()["event_type"], "ConversationEnd");
    assert_eq!(lines.last().unwrap()["reason"], "high_convergence");
    assert!(lines.last().unwrap()["turn_count"].as_u64().unwrap() < 10);
}

#[tokio::test]
async fn scenario_provider_failure_does_not_cancel_sibling_conversations() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::new(dir.path().to_path_buf());

    runner
        .run(
            "exp_fail",
            base_config("local:fail-auth", "local:test", 2, 2, 5),
            CancellationToken::new(),
        )
        .await;

    let experiment_dir = dir.path().join("exp_fail");
    let manifest = Manifest::read(&experiment_dir.join("manifest.json")).unwrap();
    assert_eq!(manifest.failed_conversations, 2);
    assert_eq!(manifest.completed_conversations, 0);
    assert_eq!(
        manifest.completed_conversations + manifest.failed_conversations,
        manifest.total_conversations
    );

    // Both conversations independently ran to a terminal ConversationEnd
    // rather than one failure leaving the other stuck mid-flight.
    let files = conversation_jsonl_files(&experiment_dir);
    assert_eq!(files.len(), 2);
    for file in &files {
        let lines = read_jsonl_lines(file);
        assert_eq!(lines.last().unwrap()["event_type"], "ConversationEnd");
        assert_eq!(lines.last().unwrap()["reason"], "provider_fatal");
    }
}
