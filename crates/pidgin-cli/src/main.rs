//! Command-line entry point: start an experiment (optionally detached),
//! stop one or all running experiments, and report status from the
//! manifest.
//!
//! Deliberately synchronous at the top level — the daemonized `start` path
//! must fork *before* any tokio runtime exists, so the async runtime is
//! constructed only after that decision is made, not via `#[tokio::main]`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use pidgin_runtime::daemon;
use pidgin_runtime::manifest::Manifest;

#[derive(Parser, Debug)]
#[clap(name = "pidgin", about = "Run AI-to-AI conversation experiments")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root directory for experiment output.
    #[arg(long, global = true, default_value = "pidgin_output/experiments")]
    experiments_root: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start an experiment from a TOML config file.
    Start {
        /// Path to the experiment config TOML.
        config: PathBuf,
        /// Run attached to this terminal instead of daemonizing.
        #[arg(long)]
        foreground: bool,
    },
    /// Request a graceful stop of a running experiment (SIGTERM, then SIGKILL after 30s).
    Stop { experiment_id: String },
    /// Stop every experiment with a live PID file.
    StopAll,
    /// Print the manifest status of one experiment, or all of them.
    Status { experiment_id: Option<String> },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start { config, foreground } => {
            cmd_start(&cli.experiments_root, &config, foreground)
        }
        Command::Stop { experiment_id } => cmd_stop(&cli.experiments_root, &experiment_id),
        Command::StopAll => cmd_stop_all(&cli.experiments_root),
        Command::Status { experiment_id } => {
            cmd_status(&cli.experiments_root, experiment_id.as_deref())
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

fn random_id(prefix: &str) -> String {
    format!("{prefix}_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

fn cmd_start(experiments_root: &Path, config_path: &Path, foreground: bool) -> Result<()> {
    let config = pidgin_runtime::load_config(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    daemon::preflight(experiments_root, &config).map_err(|e| anyhow::anyhow!(e))?;

    let experiment_id = random_id("exp");
    let experiments_root = experiments_root.to_path_buf();
    std::fs::create_dir_all(&experiments_root)?;

    if foreground {
        init_tracing();
        println!("Starting experiment {experiment_id} in the foreground");
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(daemon::run_experiment(
            experiments_root,
            None,
            experiment_id,
            config,
        ));
        return Ok(());
    }

    let pid_path = experiments_root
        .join("active")
        .join(format!("{experiment_id}.pid"));
    let log_path = experiments_root
        .join("logs")
        .join(format!("{experiment_id}.log"));

    #[cfg(unix)]
    {
        daemon::daemonize(&pid_path, &log_path)?;
    }
    #[cfg(not(unix))]
    {
        let _ = log_path;
        bail!("daemonized start is only supported on Unix; pass --foreground elsewhere");
    }

    init_tracing();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(daemon::run_experiment(
        experiments_root,
        Some(pid_path),
        experiment_id,
        config,
    ));
    Ok(())
}

fn read_pid(pid_path: &Path) -> Result<i32> {
    let raw = std::fs::read_to_string(pid_path)
        .with_context(|| format!("reading PID file {}", pid_path.display()))?;
    raw.trim()
        .parse()
        .with_context(|| format!("PID file {} does not contain an integer", pid_path.display()))
}

#[cfg(unix)]
fn send_signal(pid: i32, signal: nix::sys::signal::Signal) -> Result<()> {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal)
        .map_err(|e| anyhow::anyhow!("failed to signal pid {pid}: {e}"))
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

fn stop_one(pid_path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let pid = read_pid(pid_path)?;
        send_signal(pid, nix::sys::signal::Signal::SIGTERM)?;

        let deadline = std::time::Instant::now() + Duration::from_secs(30);
        while std::time::Instant::now() < deadline {
            if !process_alive(pid) {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(200));
        }

        if process_alive(pid) {
            send_signal(pid, nix::sys::signal::Signal::SIGKILL)?;
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = pid_path;
        bail!("stop is only supported on Unix");
    }
}

fn cmd_stop(experiments_root: &Path, experiment_id: &str) -> Result<()> {
    let pid_path = experiments_root
        .join("active")
        .join(format!("{experiment_id}.pid"));
    if !pid_path.exists() {
        bail!("no active PID file for experiment '{experiment_id}'");
    }
    stop_one(&pid_path)?;
    println!("Stopped experiment {experiment_id}");
    Ok(())
}

fn cmd_stop_all(experiments_root: &Path) -> Result<()> {
    let active_dir = experiments_root.join("active");
    if !active_dir.exists() {
        println!("No active experiments.");
        return Ok(());
    }
    for entry in std::fs::read_dir(&active_dir)? {
        let entry = entry?;
        if entry.path().extension().and_then(|e| e.to_str()) == Some("pid") {
            match stop_one(&entry.path()) {
                Ok(()) => println!("Stopped {}", entry.path().display()),
                Err(err) => eprintln!("Failed to stop {}: {err}", entry.path().display()),
            }
        }
    }
    Ok(())
}

fn print_manifest_summary(manifest: &Manifest) {
    println!(
        "{}  {}  status={:?}  completed={}/{}  failed={}",
        manifest.experiment_id,
        manifest.name,
        manifest.status,
        manifest.completed_conversations,
        manifest.total_conversations,
        manifest.failed_conversations,
    );
}

fn cmd_status(experiments_root: &Path, experiment_id: Option<&str>) -> Result<()> {
    if let Some(id) = experiment_id {
        let manifest_path = experiments_root.join(id).join("manifest.json");
        let manifest = Manifest::read(&manifest_path)
            .with_context(|| format!("reading manifest for '{id}'"))?;
        print_manifest_summary(&manifest);
        return Ok(());
    }

    if !experiments_root.exists() {
        println!("No experiments found under {}", experiments_root.display());
        return Ok(());
    }

    for entry in std::fs::read_dir(experiments_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if matches!(entry.file_name().to_str(), Some("active") | Some("logs")) {
            continue;
        }
        let manifest_path = entry.path().join("manifest.json");
        if let Ok(manifest) = Manifest::read(&manifest_path) {
            print_manifest_summary(&manifest);
        }
    }
    Ok(())
}
