//! Append-only run journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL), one file per run at
//! `<runs_dir>/<run_id>/events.jsonl`, so a run can be inspected with any
//! text tool while it is still in progress.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Event, EventType};
use crate::error::PipelineError;

/// File-based run journal using JSONL format
#[derive(Debug, Clone)]
pub struct RunJournal {
    run_id: Uuid,

    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,
}

impl RunJournal {
    /// Create or open the journal for a run under `base_dir`
    pub async fn open(base_dir: &Path, run_id: Uuid) -> Result<Self, PipelineError> {
        let run_dir = base_dir.join(run_id.to_string());
        fs::create_dir_all(&run_dir).await?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self {
            run_id,
            run_dir,
            events_path,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<(), PipelineError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>, PipelineError> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path).await?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)?;
            events.push(event);
        }

        Ok(events)
    }

    /// Get the last event of a specific type
    pub async fn last_event_of_type(
        &self,
        event_type: EventType,
    ) -> Result<Option<Event>, PipelineError> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }

    /// List all run IDs under `base_dir`
    pub async fn list_runs(base_dir: &Path) -> Result<Vec<Uuid>, PipelineError> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        runs.sort();
        Ok(runs)
    }
}

/// Short content fingerprint (first 16 hex chars of SHA256)
pub fn digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StageStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_event_append_and_replay() {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let journal = RunJournal::open(temp.path(), run_id).await.unwrap();

        let started = Event::new(
            run_id,
            None,
            EventType::RunStarted,
            "Run started".to_string(),
            StageStatus::Running,
        );
        let stage = Event::new(
            run_id,
            Some("generate_goal".to_string()),
            EventType::StageStarted,
            "Stage started".to_string(),
            StageStatus::Running,
        )
        .with_attempt(1);

        journal.append(&started).await.unwrap();
        journal.append(&stage).await.unwrap();

        let events = journal.replay().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::RunStarted);
        assert_eq!(events[1].stage.as_deref(), Some("generate_goal"));

        let last = journal
            .last_event_of_type(EventType::StageStarted)
            .await
            .unwrap();
        assert!(last.is_some());
    }

    #[tokio::test]
    async fn test_list_runs() {
        let temp = TempDir::new().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        RunJournal::open(temp.path(), a).await.unwrap();
        RunJournal::open(temp.path(), b).await.unwrap();
        std::fs::create_dir_all(temp.path().join("not-a-run")).unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(RunJournal::list_runs(temp.path()).await.unwrap(), expected);

        let missing = temp.path().join("absent");
        assert!(RunJournal::list_runs(&missing).await.unwrap().is_empty());
    }

    #[test]
    fn test_digest_consistency() {
        let a = digest(b"topic: octopus");
        assert_eq!(a, digest(b"topic: octopus"));
        assert_ne!(a, digest(b"topic: squid"));
        assert_eq!(a.len(), 16);
    }
}
