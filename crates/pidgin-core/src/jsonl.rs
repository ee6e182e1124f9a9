//! JSONL sink: an [`EventObserver`] that appends every event to
//! `{experiment_dir}/{conversation_id}.jsonl`, one JSON object per line,
//! flushing on every write and fsyncing on `ConversationEnd`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::event::{Event, EventKind};
use crate::event_bus::EventObserver;

pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// Opens (creating if absent, truncating a stale partial file) the
    /// per-conversation log at `{dir}/{conversation_id}.jsonl`.
    pub async fn open(dir: &Path, conversation_id: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{conversation_id}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventObserver for JsonlSink {
    async fn on_event(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(l) => l,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize event for jsonl sink");
                return;
            }
        };
        let mut file = self.file.lock().await;
        if let Err(err) = file.write_all(line.as_bytes()).await {
            tracing::error!(error = %err, path = %self.path.display(), "jsonl write failed");
            return;
        }
        if let Err(err) = file.write_all(b"\n").await {
            tracing::error!(error = %err, path = %self.path.display(), "jsonl write failed");
            return;
        }
        if let Err(err) = file.flush().await {
            tracing::error!(error = %err, path = %self.path.display(), "jsonl flush failed");
            return;
        }
        if matches!(event.kind, EventKind::ConversationEnd { .. }) {
            if let Err(err) = file.sync_all().await {
                tracing::error!(error = %err, path = %self.path.display(), "jsonl fsync failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use std::sync::Arc;

    #[tokio::test]
    async fn appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(JsonlSink::open(dir.path(), "conv_test").await.unwrap());
        let bus = EventBus::new("conv_test");
        bus.add_observer(sink.clone());

        bus.emit(EventKind::ConversationStart).await;
        bus.emit(EventKind::TurnStart { turn: 1 }).await;

        let contents = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "ConversationStart");
        assert_eq!(first["sequence"], 0);
    }
}
