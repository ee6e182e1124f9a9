//! The experiment daemon: detaches the experiment from the invoking
//! terminal via a real Unix double-fork so a CLI client can disconnect and
//! later reattach.
//!
//! Grounded directly on the original `ExperimentDaemon` (`os.fork()` x2,
//! `setsid()`, `chdir("/")`, `umask(0)`, stdio redirected to a log file, PID
//! file write, `SIGTERM`/`SIGINT`/`SIGHUP` handlers) and on the parent
//! lineage's `acp::shutdown::signal()` for the async-side signal wait used
//! once we're back in a tokio runtime post-fork.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use pidgin_core::model::{ExperimentConfig, ExperimentStatus};

use crate::manifest::Manifest;
use crate::runner::{required_credentials, Runner};

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("configuration is invalid: {0:?}")]
    InvalidConfig(Vec<pidgin_core::model::ConfigError>),
    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),
    #[error("an experiment named '{0}' is already active")]
    NameCollision(String),
}

/// Validate config, required credentials, and name uniqueness before the
/// process forks. Must run in the CLI process — any failure here is a
/// structured, user-visible error rather than a daemon crash.
pub fn preflight(
    experiments_root: &Path,
    config: &ExperimentConfig,
) -> Result<(), PreflightError> {
    let errors = config.validate();
    if !errors.is_empty() {
        return Err(PreflightError::InvalidConfig(errors));
    }

    for var in required_credentials(config) {
        if std::env::var(var).is_err() {
            return Err(PreflightError::MissingCredential(var));
        }
    }

    let active_dir = experiments_root.join("active");
    if active_dir.exists() {
        for entry in std::fs::read_dir(&active_dir).into_iter().flatten().flatten() {
            let Some(stem) = entry.path().file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            let manifest_path = experiments_root.join(&stem).join("manifest.json");
            if let Ok(manifest) = Manifest::read(&manifest_path) {
                if manifest.name == config.name && pid_file_is_live(&entry.path()) {
                    return Err(PreflightError::NameCollision(config.name.clone()));
                }
            }
        }
    }

    Ok(())
}

fn pid_file_is_live(pid_path: &Path) -> bool {
    let Ok(raw) = std::fs::read_to_string(pid_path) else {
        return false;
    };
    let Ok(pid) = raw.trim().parse::<i32>() else {
        return false;
    };
    process_is_alive(pid)
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
    false
}

/// Double-fork and detach from the controlling terminal. Must be called
/// before any tokio runtime starts — forking a multi-threaded async runtime
/// is unsafe, since only the forking thread survives into the child.
///
/// Returns `true` in the grandchild (the process that should proceed to run
/// the experiment); the parent and the intermediate child both `exit(0)`
/// inside this call and never return.
#[cfg(unix)]
pub fn daemonize(pid_path: &Path, log_path: &Path) -> std::io::Result<()> {
    use nix::unistd::{fork, ForkResult};

    // First fork: detach from the shell's process group.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(err) => return Err(std::io::Error::from_raw_os_error(err as i32)),
    }

    nix::unistd::chdir("/")?;
    nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    nix::sys::stat::umask(nix::sys::stat::Mode::empty());

    // Second fork: prevent reacquiring a controlling terminal.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(err) => return Err(std::io::Error::from_raw_os_error(err as i32)),
    }

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    redirect_stdio(&log_file)?;

    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(pid_path, format!("{}", std::process::id()))?;

    Ok(())
}

#[cfg(unix)]
fn redirect_stdio(log_file: &std::fs::File) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;
    let log_fd = log_file.as_raw_fd();
    nix::unistd::dup2(log_fd, 1).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    nix::unistd::dup2(log_fd, 2).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;

    let devnull = std::fs::File::open("/dev/null")?;
    nix::unistd::dup2(devnull.as_raw_fd(), 0)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    Ok(())
}

/// Wait for `SIGTERM` or `SIGINT`; `SIGHUP` is ignored for the daemon's
/// lifetime. Call after the tokio runtime is up (post-fork).
pub async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).unwrap();
        let mut hup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()).unwrap();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = term.recv() => {
                    tracing::info!("received SIGTERM, requesting stop");
                    return;
                }
                _ = hup.recv() => {
                    tracing::info!("ignoring SIGHUP");
                    continue;
                }
                _ = &mut ctrl_c => {
                    tracing::info!("received SIGINT, requesting stop");
                    return;
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Run one experiment end-to-end inside the (already daemonized, if
/// applicable) process: run the conversations, then perform exit cleanup.
pub async fn run_experiment(
    experiments_root: PathBuf,
    pid_path: Option<PathBuf>,
    experiment_id: String,
    config: ExperimentConfig,
) {
    let stop = CancellationToken::new();
    let stop_for_signal = stop.clone();
    let signal_task = tokio::spawn(async move {
        wait_for_stop_signal().await;
        stop_for_signal.cancel();
    });

    let runner = Runner::new(experiments_root.clone());
    runner.run(&experiment_id, config, stop.clone()).await;

    signal_task.abort();
    exit_cleanup(&experiments_root, &experiment_id, pid_path.as_deref());
}

/// On any exit path: if the manifest is still `running`, mark it (and every
/// still-running conversation) `failed`, then remove the PID file.
fn exit_cleanup(experiments_root: &Path, experiment_id: &str, pid_path: Option<&Path>) {
    let manifest_path = experiments_root.join(experiment_id).join("manifest.json");
    if let Ok(mut manifest) = Manifest::read(&manifest_path) {
        if manifest.status == ExperimentStatus::Running {
            manifest.status = ExperimentStatus::Failed;
            for entry in manifest.conversations.values_mut() {
                if entry.status == pidgin_core::model::ConversationStatus::Running
                    || entry.status == pidgin_core::model::ConversationStatus::Created
                {
                    entry.status = pidgin_core::model::ConversationStatus::Failed;
                    entry.error.get_or_insert_with(|| "daemon exited uncleanly".into());
                }
            }
            let _ = manifest.write_atomic(&manifest_path);
        }
    }

    if let Some(pid_path) = pid_path {
        let _ = std::fs::remove_file(pid_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidgin_core::model::ConvergenceProfile;

    fn config(name: &str) -> ExperimentConfig {
        ExperimentConfig {
            name: name.into(),
            agent_a_model: "local:test".into(),
            agent_b_model: "local:test".into(),
            repetitions: 1,
            max_turns: 2,
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
    fn preflight_accepts_valid_local_only_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(preflight(dir.path(), &config("exp")).is_ok());
    }

    #[test]
    fn preflight_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config("exp");
        cfg.max_turns = 0;
        assert!(matches!(
            preflight(dir.path(), &cfg),
            Err(PreflightError::InvalidConfig(_))
        ));
    }

    #[test]
    fn preflight_rejects_missing_credential() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config("exp");
        cfg.agent_a_model = "anthropic:claude-3".into();
        std::env::remove_var("ANTHROPIC_API_KEY");
        assert!(matches!(
            preflight(dir.path(), &cfg),
            Err(PreflightError::MissingCredential("ANTHROPIC_API_KEY"))
        ));
    }

    #[tokio::test]
    async fn exit_cleanup_marks_running_manifest_failed() {
        let dir = tempfile::tempdir().unwrap();
        let experiment_dir = dir.path().join("exp_1");
        std::fs::create_dir_all(&experiment_dir).unwrap();
        let mut manifest = Manifest::new("exp_1", config("exp"));
        manifest.status = ExperimentStatus::Running;
        manifest.write_atomic(&experiment_dir.join("manifest.json")).unwrap();

        exit_cleanup(dir.path(), "exp_1", None);

        let read_back = Manifest::read(&experiment_dir.join("manifest.json")).unwrap();
        assert_eq!(read_back.status, ExperimentStatus::Failed);
    }
}
