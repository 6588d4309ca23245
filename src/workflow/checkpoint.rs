//! Workflow checkpoints: enough progress on disk to resume after a crash.
//!
//! One JSON document per labelled workflow under `<workspace>/checkpoints/`.
//! The checkpoint is rewritten after every state change and deleted once the
//! workflow reaches `done`; failed checkpoints stay behind for `resume`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{read_document, sanitize_name, write_document};
use crate::util::now_ms;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub result: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailure {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub workflow_id: String,
    pub pattern: String,
    /// Step names in request order; resume only adopts a checkpoint whose
    /// sequence matches exactly.
    pub steps: Vec<String>,
    pub completed: HashMap<String, StepOutcome>,
    pub failed: HashMap<String, StepFailure>,
    pub status: CheckpointStatus,
    pub started_at: i64,
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(workflow_id: impl Into<String>, pattern: &str, steps: Vec<String>) -> Self {
        let now = now_ms();
        Self {
            workflow_id: workflow_id.into(),
            pattern: pattern.to_string(),
            steps,
            completed: HashMap::new(),
            failed: HashMap::new(),
            status: CheckpointStatus::InProgress,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn mark_completed(&mut self, name: &str, result: String, duration_ms: u64) {
        self.failed.remove(name);
        self.completed.insert(
            name.to_string(),
            StepOutcome {
                result,
                duration_ms,
            },
        );
        self.updated_at = now_ms();
    }

    pub fn mark_failed(&mut self, name: &str, error: String) {
        self.failed.insert(name.to_string(), StepFailure { error });
        self.updated_at = now_ms();
    }

    pub fn all_steps_completed(&self) -> bool {
        self.steps.iter().all(|s| self.completed.contains_key(s))
    }

    pub fn set_status(&mut self, status: CheckpointStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }
}

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            dir: workspace.checkpoints_dir(),
        }
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir
            .join(format!("workflow-{}.json", sanitize_name(label)))
    }

    pub async fn load(&self, label: &str) -> Option<Checkpoint> {
        read_document(&self.path_for(label)).await
    }

    pub async fn save(&self, label: &str, checkpoint: &Checkpoint) -> Result<()> {
        write_document(&self.path_for(label), checkpoint).await
    }

    pub async fn delete(&self, label: &str) {
        let _ = tokio::fs::remove_file(self.path_for(label)).await;
    }
}
