//! Persistent task queue: priority FIFO with claim/complete/fail/retry.
//!
//! The queue document keeps tasks in insertion order; claim order is derived
//! by sorting pending tasks on priority rank, then age. Failure handling is
//! bounded: a claimed task that fails goes back to pending until its retry
//! budget is spent, after which it parks in `failed` for manual retry.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{HiveError, Result};
use crate::storage::DocumentStore;
use crate::tools::ToolResponse;
use crate::util::{now_ms, short_id};
use crate::workspace::Workspace;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_CLEAR_HOURS: f64 = 24.0;
const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// Claim ordering rank; lower claims first.
    fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub priority: Priority,
    pub status: TaskStatus,
    pub retries: u32,
    pub max_retries: u32,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDoc {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum QueueAction {
    Add {
        task: String,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        priority: Priority,
        #[serde(default)]
        max_retries: Option<u32>,
        #[serde(default)]
        tags: Option<Vec<String>>,
    },
    Claim {},
    Complete {
        id: String,
        #[serde(default)]
        result: Value,
    },
    Fail {
        id: String,
        #[serde(default)]
        error: Option<String>,
    },
    Retry {
        id: String,
    },
    List {
        #[serde(default)]
        status: Option<TaskStatus>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Clear {
        #[serde(default)]
        older_than_hours: Option<f64>,
    },
    Stats {},
}

pub struct TaskQueue {
    store: DocumentStore,
    path: PathBuf,
}

impl TaskQueue {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            store: DocumentStore::new(),
            path: workspace.task_queue_path(),
        }
    }

    pub async fn execute(&self, call_id: &str, args: Value) -> ToolResponse {
        debug!(call_id, "queue action");
        let action: QueueAction = match serde_json::from_value(args) {
            Ok(action) => action,
            Err(e) => {
                return ToolResponse::from_result(Err(HiveError::Validation(e.to_string())));
            }
        };

        let result = match action {
            QueueAction::Add {
                task,
                data,
                priority,
                max_retries,
                tags,
            } => {
                self.add(
                    &task,
                    data,
                    priority,
                    max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                    tags,
                )
                .await
            }
            QueueAction::Claim {} => self.claim().await,
            QueueAction::Complete { id, result } => self.complete(&id, result).await,
            QueueAction::Fail { id, error } => {
                self.fail(&id, error.as_deref().unwrap_or("unknown error")).await
            }
            QueueAction::Retry { id } => self.retry(&id).await,
            QueueAction::List { status, limit } => {
                self.list(status, limit.unwrap_or(DEFAULT_LIST_LIMIT)).await
            }
            QueueAction::Clear { older_than_hours } => {
                self.clear(older_than_hours.unwrap_or(DEFAULT_CLEAR_HOURS))
                    .await
            }
            QueueAction::Stats {} => self.stats().await,
        };
        ToolResponse::from_result(result)
    }

    pub async fn add(
        &self,
        description: &str,
        data: Value,
        priority: Priority,
        max_retries: u32,
        tags: Option<Vec<String>>,
    ) -> Result<Value> {
        let now = now_ms();
        let task = Task {
            id: short_id(),
            task: description.to_string(),
            data,
            priority,
            status: TaskStatus::Pending,
            retries: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            claimed_at: None,
            completed_at: None,
            result: None,
            error: None,
            tags,
        };
        let id = task.id.clone();

        self.store
            .update::<QueueDoc, _, _>(&self.path, move |doc| {
                doc.tasks.push(task);
                json!({"status": "added", "id": id})
            })
            .await
    }

    /// Claim the highest-priority, oldest pending task.
    pub async fn claim(&self) -> Result<Value> {
        self.store
            .update::<QueueDoc, _, _>(&self.path, |doc| {
                let next = doc
                    .tasks
                    .iter_mut()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .min_by_key(|t| (t.priority.rank(), t.created_at));

                let Some(task) = next else {
                    return json!({"status": "empty"});
                };

                let now = now_ms();
                task.status = TaskStatus::Claimed;
                task.claimed_at = Some(now);
                task.updated_at = now;

                json!({
                    "status": "claimed",
                    "id": task.id,
                    "task": task.task,
                    "data": task.data,
                    "priority": task.priority,
                    "retries": task.retries,
                })
            })
            .await
    }

    pub async fn complete(&self, id: &str, result: Value) -> Result<Value> {
        let id = id.to_string();
        self.store
            .update::<QueueDoc, _, _>(&self.path, move |doc| {
                let Some(task) = doc
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == id && t.status == TaskStatus::Claimed)
                else {
                    return json!({"status": "not_found", "id": id});
                };

                let now = now_ms();
                task.status = TaskStatus::Done;
                task.completed_at = Some(now);
                task.updated_at = now;
                task.result = Some(result);

                json!({"status": "done", "id": id})
            })
            .await
    }

    /// Fail a claimed task. The retry budget is checked after incrementing,
    /// so max_retries=0 fails on the first failure.
    pub async fn fail(&self, id: &str, error: &str) -> Result<Value> {
        let id = id.to_string();
        let error = error.to_string();
        self.store
            .update::<QueueDoc, _, _>(&self.path, move |doc| {
                let Some(task) = doc
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == id && t.status == TaskStatus::Claimed)
                else {
                    return json!({"status": "not_found", "id": id});
                };

                let now = now_ms();
                task.retries += 1;
                task.updated_at = now;
                task.error = Some(error);

                if task.retries >= task.max_retries {
                    task.status = TaskStatus::Failed;
                    json!({"status": "failed", "id": id, "retries": task.retries})
                } else {
                    task.status = TaskStatus::Pending;
                    task.claimed_at = None;
                    json!({"status": "retrying", "id": id, "retries": task.retries})
                }
            })
            .await
    }

    /// Requeue a failed task manually. The retry counter is kept so the
    /// history of attempts stays visible.
    pub async fn retry(&self, id: &str) -> Result<Value> {
        let id = id.to_string();
        self.store
            .update::<QueueDoc, _, _>(&self.path, move |doc| {
                let Some(task) = doc
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == id && t.status == TaskStatus::Failed)
                else {
                    return json!({"status": "not_found", "id": id});
                };

                task.status = TaskStatus::Pending;
                task.error = None;
                task.claimed_at = None;
                task.updated_at = now_ms();

                json!({"status": "requeued", "id": id, "retries": task.retries})
            })
            .await
    }

    pub async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Value> {
        let doc: QueueDoc = self.store.load(&self.path).await;

        let mut tasks: Vec<&Task> = doc
            .tasks
            .iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .collect();
        tasks.sort_by_key(|t| std::cmp::Reverse(t.updated_at));
        tasks.truncate(limit);

        let rendered: Vec<Value> = tasks
            .iter()
            .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
            .collect();
        Ok(json!({"status": "ok", "count": rendered.len(), "tasks": rendered}))
    }

    /// Drop terminal tasks older than the cutoff. Pending and claimed tasks
    /// are always retained.
    pub async fn clear(&self, older_than_hours: f64) -> Result<Value> {
        let cutoff = now_ms() - (older_than_hours * 3_600_000.0) as i64;
        self.store
            .update::<QueueDoc, _, _>(&self.path, move |doc| {
                let before = doc.tasks.len();
                doc.tasks
                    .retain(|t| !t.status.is_terminal() || t.updated_at >= cutoff);
                json!({"status": "cleared", "removed": before - doc.tasks.len()})
            })
            .await
    }

    pub async fn stats(&self) -> Result<Value> {
        let doc: QueueDoc = self.store.load(&self.path).await;
        let count = |status: TaskStatus| doc.tasks.iter().filter(|t| t.status == status).count();

        Ok(json!({
            "status": "ok",
            "total": doc.tasks.len(),
            "pending": count(TaskStatus::Pending),
            "claimed": count(TaskStatus::Claimed),
            "done": count(TaskStatus::Done),
            "failed": count(TaskStatus::Failed),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_queue() -> (TempDir, TaskQueue) {
        let dir = TempDir::new().unwrap();
        let queue = TaskQueue::new(&Workspace::new(dir.path()));
        (dir, queue)
    }

    async fn add_simple(queue: &TaskQueue, name: &str, priority: Priority) -> String {
        let result = queue
            .add(name, Value::Null, priority, DEFAULT_MAX_RETRIES, None)
            .await
            .unwrap();
        result["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_priority_claim_order() {
        let (_dir, queue) = temp_queue();
        add_simple(&queue, "low", Priority::Low).await;
        add_simple(&queue, "high", Priority::High).await;
        add_simple(&queue, "normal", Priority::Normal).await;

        let first = queue.claim().await.unwrap();
        let second = queue.claim().await.unwrap();
        let third = queue.claim().await.unwrap();
        assert_eq!(first["task"], "high");
        assert_eq!(second["task"], "normal");
        assert_eq!(third["task"], "low");

        let empty = queue.claim().await.unwrap();
        assert_eq!(empty["status"], "empty");
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let (_dir, queue) = temp_queue();
        // created_at is milliseconds; space the adds out so order is stable.
        add_simple(&queue, "first", Priority::Normal).await;
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        add_simple(&queue, "second", Priority::Normal).await;

        let claimed = queue.claim().await.unwrap();
        assert_eq!(claimed["task"], "first");
    }

    #[tokio::test]
    async fn test_complete_sets_result() {
        let (_dir, queue) = temp_queue();
        add_simple(&queue, "job", Priority::Normal).await;

        let claimed = queue.claim().await.unwrap();
        let id = claimed["id"].as_str().unwrap();
        let done = queue.complete(id, json!({"rows": 10})).await.unwrap();
        assert_eq!(done["status"], "done");

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats["done"], 1);
        assert_eq!(stats["pending"], 0);
    }

    #[tokio::test]
    async fn test_retry_policy_exhaustion() {
        let (_dir, queue) = temp_queue();
        let result = queue
            .add("flaky", Value::Null, Priority::Normal, 2, None)
            .await
            .unwrap();
        let id = result["id"].as_str().unwrap().to_string();

        queue.claim().await.unwrap();
        let first_fail = queue.fail(&id, "err").await.unwrap();
        assert_eq!(first_fail["status"], "retrying");
        assert_eq!(first_fail["retries"], 1);

        queue.claim().await.unwrap();
        let second_fail = queue.fail(&id, "err").await.unwrap();
        assert_eq!(second_fail["status"], "failed");
        assert_eq!(second_fail["retries"], 2);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats["pending"], 0);
        assert_eq!(stats["failed"], 1);
    }

    #[tokio::test]
    async fn test_zero_max_retries_fails_immediately() {
        let (_dir, queue) = temp_queue();
        let result = queue
            .add("one-shot", Value::Null, Priority::Normal, 0, None)
            .await
            .unwrap();
        let id = result["id"].as_str().unwrap().to_string();

        queue.claim().await.unwrap();
        let failed = queue.fail(&id, "boom").await.unwrap();
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["retries"], 1);
    }

    #[tokio::test]
    async fn test_manual_retry_keeps_counter() {
        let (_dir, queue) = temp_queue();
        let result = queue
            .add("job", Value::Null, Priority::Normal, 1, None)
            .await
            .unwrap();
        let id = result["id"].as_str().unwrap().to_string();

        queue.claim().await.unwrap();
        queue.fail(&id, "boom").await.unwrap();

        let requeued = queue.retry(&id).await.unwrap();
        assert_eq!(requeued["status"], "requeued");
        assert_eq!(requeued["retries"], 1);

        let claimed = queue.claim().await.unwrap();
        assert_eq!(claimed["id"].as_str().unwrap(), id);
        assert_eq!(claimed["retries"], 1);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let (_dir, queue) = temp_queue();
        assert_eq!(
            queue.complete("nope", Value::Null).await.unwrap()["status"],
            "not_found"
        );
        assert_eq!(queue.fail("nope", "e").await.unwrap()["status"], "not_found");
        assert_eq!(queue.retry("nope").await.unwrap()["status"], "not_found");
    }

    #[tokio::test]
    async fn test_clear_retains_active_tasks() {
        let (_dir, queue) = temp_queue();
        add_simple(&queue, "keep-pending", Priority::Normal).await;
        add_simple(&queue, "done-old", Priority::Normal).await;

        let claimed = queue.claim().await.unwrap();
        queue
            .complete(claimed["id"].as_str().unwrap(), Value::Null)
            .await
            .unwrap();

        // Cutoff in the future relative to every updated_at: terminal tasks go,
        // pending stays.
        let result = queue.clear(-1.0).await.unwrap();
        assert_eq!(result["removed"], 1);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["pending"], 1);
    }

    #[tokio::test]
    async fn test_state_machine_closure() {
        let (_dir, queue) = temp_queue();
        let result = queue
            .add("churn", Value::Null, Priority::High, 1, None)
            .await
            .unwrap();
        let id = result["id"].as_str().unwrap().to_string();

        // Walk add -> claim -> fail(terminal) -> retry -> claim -> complete;
        // every stop is one of the four defined states.
        queue.claim().await.unwrap();
        queue.fail(&id, "e1").await.unwrap();
        queue.retry(&id).await.unwrap();
        queue.claim().await.unwrap();
        queue.complete(&id, json!("ok")).await.unwrap();

        let listed = queue.list(None, 10).await.unwrap();
        let status = listed["tasks"][0]["status"].as_str().unwrap();
        assert!(["pending", "claimed", "done", "failed"].contains(&status));
        assert_eq!(status, "done");
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let (_dir, queue) = temp_queue();
        add_simple(&queue, "a", Priority::Normal).await;
        add_simple(&queue, "b", Priority::Normal).await;
        queue.claim().await.unwrap();

        let pending = queue.list(Some(TaskStatus::Pending), 10).await.unwrap();
        assert_eq!(pending["count"], 1);
        let claimed = queue.list(Some(TaskStatus::Claimed), 10).await.unwrap();
        assert_eq!(claimed["count"], 1);
    }
}
