//! A best-effort, fixed-size live snapshot for a dashboard polling at 2Hz.
//!
//! Layout: `[4 bytes version LE][4 bytes unix-seconds timestamp LE][payload
//! JSON, zero-terminated, padded with NULs to fill the region]`. There's no
//! real shared-memory segment here (the parent lineage doesn't either, for
//! its own live-state file) — a plain file at a well-known path plays the
//! same role and is simpler to reason about across the double-fork, at the
//! cost of a read() syscall instead of an mmap() hit. Noted in DESIGN.md.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REGION_SIZE: usize = 8192;
pub const VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LiveSnapshot {
    pub status: String,
    pub agent_a_model: String,
    pub agent_b_model: String,
    pub total: u32,
    pub completed: u32,
    pub current_turn: u32,
    pub recent_convergence: Vec<f64>,
    pub recent_messages: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SharedStateError {
    #[error("snapshot payload does not fit in an {REGION_SIZE}-byte region")]
    PayloadTooLarge,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("region too short to contain a header")]
    Truncated,
    #[error("unsupported SharedState version {found}, expected {VERSION}")]
    VersionMismatch { found: u32 },
}

pub struct SharedState {
    path: PathBuf,
}

impl SharedState {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn write(&self, snapshot: &LiveSnapshot) -> Result<(), SharedStateError> {
        let payload = serde_json::to_vec(snapshot)?;
        if payload.len() + HEADER_LEN + 1 > REGION_SIZE {
            return Err(SharedStateError::PayloadTooLarge);
        }

        let mut buf = vec![0u8; REGION_SIZE];
        buf[0..4].copy_from_slice(&VERSION.to_le_bytes());
        let now = chrono::Utc::now().timestamp() as u32;
        buf[4..8].copy_from_slice(&now.to_le_bytes());
        buf[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(&payload);
        // Remaining bytes are already NUL from the zeroed Vec.

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &buf)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn read(&self) -> Result<LiveSnapshot, SharedStateError> {
        let buf = std::fs::read(&self.path)?;
        read_region(&buf)
    }

    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_region(buf: &[u8]) -> Result<LiveSnapshot, SharedStateError> {
    if buf.len() < HEADER_LEN {
        return Err(SharedStateError::Truncated);
    }
    let version = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if version != VERSION {
        return Err(SharedStateError::VersionMismatch { found: version });
    }
    let payload = &buf[HEADER_LEN..];
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    let snapshot = serde_json::from_slice(&payload[..end])?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = SharedState::new(dir.path().join("exp_1.shm"));
        let snapshot = LiveSnapshot {
            status: "running".into(),
            agent_a_model: "anthropic:claude-3".into(),
            agent_b_model: "openai:gpt-4".into(),
            total: 10,
            completed: 3,
            current_turn: 7,
            recent_convergence: vec![0.1, 0.2],
            recent_messages: vec!["hello".into()],
        };
        state.write(&snapshot).unwrap();

        let read_back = state.read().unwrap();
        assert_eq!(read_back.status, "running");
        assert_eq!(read_back.completed, 3);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut buf = vec![0u8; REGION_SIZE];
        buf[0..4].copy_from_slice(&99u32.to_le_bytes());
        let err = read_region(&buf).unwrap_err();
        assert!(matches!(err, SharedStateError::VersionMismatch { found: 99 }));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = SharedState::new(dir.path().join("exp_1.shm"));
        let snapshot = LiveSnapshot {
            recent_messages: vec!["x".repeat(REGION_SIZE); 10],
            ..Default::default()
        };
        assert!(matches!(
            state.write(&snapshot),
            Err(SharedStateError::PayloadTooLarge)
        ));
    }
}
