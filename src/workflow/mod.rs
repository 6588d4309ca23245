//! Workflow engine: sub-agent fan-out under three execution patterns.
//!
//! Given a list of steps, the engine spawns one child session per step and
//! drives them sequentially, all at once, or by dependency graph. Progress is
//! checkpointed after every state change so a crashed workflow can resume
//! without re-spawning completed steps. Admission is guarded by spawn-depth
//! and fan-out limits from config.

pub mod checkpoint;
pub mod step;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::HiveConfig;
use crate::error::{HiveError, Result};
use crate::gateway::Gateway;
use crate::registry::SubagentRegistry;
use crate::tools::ToolResponse;
use crate::workspace::Workspace;

pub use checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore, StepFailure, StepOutcome};
pub use step::WorkflowStep;

use step::{StepResult, StepRunner};

/// Engine-level faults are recorded under this name in the checkpoint's
/// failed map, keeping them distinct from any real step.
const WORKFLOW_SENTINEL: &str = "_workflow";

const DEFAULT_LABEL: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Sequential,
    Parallel,
    Dag,
}

impl Pattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Dag => "dag",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    pub pattern: Pattern,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub pass_context: bool,
    #[serde(default)]
    pub merge: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub resume: bool,
}

pub struct WorkflowEngine {
    config: Arc<HiveConfig>,
    gateway: Arc<dyn Gateway>,
    registry: Arc<SubagentRegistry>,
    checkpoints: CheckpointStore,
    caller_session_key: String,
    poll_interval: Duration,
}

impl WorkflowEngine {
    pub fn new(
        config: Arc<HiveConfig>,
        gateway: Arc<dyn Gateway>,
        registry: Arc<SubagentRegistry>,
        workspace: &Workspace,
        caller_session_key: impl Into<String>,
    ) -> Self {
        let poll_interval = Duration::from_millis(config.workflow.poll_interval_ms);
        Self {
            config,
            gateway,
            registry,
            checkpoints: CheckpointStore::new(workspace),
            caller_session_key: caller_session_key.into(),
            poll_interval,
        }
    }

    /// Override the history polling cadence (tests use milliseconds).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn execute(&self, call_id: &str, args: Value) -> ToolResponse {
        let request: WorkflowRequest = match serde_json::from_value(args) {
            Ok(request) => request,
            Err(e) => {
                return ToolResponse::from_result(Err(HiveError::Validation(e.to_string())));
            }
        };
        info!(call_id, pattern = request.pattern.as_str(), steps = request.steps.len(), "Workflow requested");
        ToolResponse::from_result(self.run(request).await)
    }

    pub async fn run(&self, request: WorkflowRequest) -> Result<Value> {
        self.validate(&request)?;
        let caller_depth = self.admit(&request)?;

        let label = request.label.clone().unwrap_or_else(|| DEFAULT_LABEL.to_string());
        let mut checkpoint = self.open_checkpoint(&request, &label).await;

        let outcome = self
            .run_pattern(&request, caller_depth, &label, &mut checkpoint)
            .await;
        if let Err(e) = outcome {
            // Engine fault outside any step: park it under the sentinel so
            // the checkpoint stays resumable.
            warn!(label = %label, error = %e, "Workflow engine fault");
            checkpoint.mark_failed(WORKFLOW_SENTINEL, e.to_string());
            checkpoint.set_status(CheckpointStatus::Failed);
            let _ = self.checkpoints.save(&label, &checkpoint).await;
        }

        if checkpoint.status == CheckpointStatus::Done {
            self.checkpoints.delete(&label).await;
        }

        Ok(self.assemble(&request, &label, &checkpoint))
    }

    fn validate(&self, request: &WorkflowRequest) -> Result<()> {
        if request.steps.is_empty() {
            return Err(HiveError::Validation(
                "workflow requires at least one step".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for step in &request.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(HiveError::Validation(format!(
                    "duplicate step name \"{}\"",
                    step.name
                )));
            }
        }

        if request.pattern == Pattern::Dag {
            for step in &request.steps {
                for dep in &step.depends_on {
                    if !seen.contains(dep.as_str()) {
                        return Err(HiveError::Validation(format!(
                            "step \"{}\" depends on unknown step \"{}\"",
                            step.name, dep
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Depth and fan-out guards. Returns the caller's current depth.
    fn admit(&self, request: &WorkflowRequest) -> Result<u32> {
        let caller_depth = self.registry.depth_of(&self.caller_session_key);
        let limits = &self.config.workflow;

        if caller_depth >= limits.max_spawn_depth {
            return Err(HiveError::Forbidden(format!(
                "spawn depth {} is at the limit of {}",
                caller_depth, limits.max_spawn_depth
            )));
        }
        if request.pattern == Pattern::Parallel
            && request.steps.len() > limits.max_children_per_agent
        {
            return Err(HiveError::Forbidden(format!(
                "parallel workflow of {} steps exceeds the fan-out limit of {}",
                request.steps.len(),
                limits.max_children_per_agent
            )));
        }
        Ok(caller_depth)
    }

    /// Adopt a matching checkpoint when resuming, otherwise start fresh.
    async fn open_checkpoint(&self, request: &WorkflowRequest, label: &str) -> Checkpoint {
        let step_names: Vec<String> = request.steps.iter().map(|s| s.name.clone()).collect();

        if request.resume
            && let Some(mut existing) = self.checkpoints.load(label).await
            && existing.steps == step_names
        {
            info!(label, completed = existing.completed.len(), "Resuming workflow from checkpoint");
            existing.failed.clear();
            existing.set_status(CheckpointStatus::InProgress);
            return existing;
        }

        Checkpoint::new(Uuid::new_v4().to_string(), request.pattern.as_str(), step_names)
    }

    async fn run_pattern(
        &self,
        request: &WorkflowRequest,
        caller_depth: u32,
        label: &str,
        checkpoint: &mut Checkpoint,
    ) -> Result<()> {
        let runner = StepRunner {
            gateway: self.gateway.as_ref(),
            registry: self.registry.as_ref(),
            config: self.config.as_ref(),
            caller_session_key: &self.caller_session_key,
            caller_depth,
            poll_interval: self.poll_interval,
        };

        match request.pattern {
            Pattern::Sequential => {
                self.run_sequential(request, &runner, label, checkpoint).await
            }
            Pattern::Parallel => self.run_parallel(request, &runner, label, checkpoint).await,
            Pattern::Dag => self.run_dag(request, &runner, label, checkpoint).await,
        }
    }

    /// Steps in order; the first failure stops the workflow.
    async fn run_sequential(
        &self,
        request: &WorkflowRequest,
        runner: &StepRunner<'_>,
        label: &str,
        checkpoint: &mut Checkpoint,
    ) -> Result<()> {
        for step in &request.steps {
            if checkpoint.completed.contains_key(&step.name) {
                continue;
            }

            let context_text = if request.pass_context {
                completed_sections(&request.steps, &checkpoint.completed)
            } else {
                String::new()
            };

            match runner.run(step, &context_text).await {
                StepResult::Completed(outcome) => {
                    checkpoint.mark_completed(&step.name, outcome.result, outcome.duration_ms);
                    self.checkpoints.save(label, checkpoint).await?;
                }
                StepResult::Failed(error) => {
                    checkpoint.mark_failed(&step.name, error);
                    checkpoint.set_status(CheckpointStatus::Failed);
                    self.checkpoints.save(label, checkpoint).await?;
                    return Ok(());
                }
            }
        }

        checkpoint.set_status(CheckpointStatus::Done);
        self.checkpoints.save(label, checkpoint).await
    }

    /// Everything at once; one step failing does not interrupt its siblings.
    async fn run_parallel(
        &self,
        request: &WorkflowRequest,
        runner: &StepRunner<'_>,
        label: &str,
        checkpoint: &mut Checkpoint,
    ) -> Result<()> {
        let pending: Vec<&WorkflowStep> = request
            .steps
            .iter()
            .filter(|s| !checkpoint.completed.contains_key(&s.name))
            .collect();

        let futures = pending.into_iter().map(|step| {
            let runner = &runner;
            async move { (step.name.clone(), runner.run(step, "").await) }
        });

        for (name, result) in join_all(futures).await {
            match result {
                StepResult::Completed(outcome) => {
                    checkpoint.mark_completed(&name, outcome.result, outcome.duration_ms);
                }
                StepResult::Failed(error) => checkpoint.mark_failed(&name, error),
            }
            self.checkpoints.save(label, checkpoint).await?;
        }

        let status = if checkpoint.failed.is_empty() {
            CheckpointStatus::Done
        } else {
            CheckpointStatus::Failed
        };
        checkpoint.set_status(status);
        self.checkpoints.save(label, checkpoint).await
    }

    /// Dependency rounds: run every ready step, settle, repeat. A failed
    /// dependency strands its dependents, which is reported as failure.
    async fn run_dag(
        &self,
        request: &WorkflowRequest,
        runner: &StepRunner<'_>,
        label: &str,
        checkpoint: &mut Checkpoint,
    ) -> Result<()> {
        for _round in 0..request.steps.len() {
            let ready: Vec<&WorkflowStep> = request
                .steps
                .iter()
                .filter(|s| {
                    !checkpoint.completed.contains_key(&s.name)
                        && !checkpoint.failed.contains_key(&s.name)
                        && s.depends_on
                            .iter()
                            .all(|dep| checkpoint.completed.contains_key(dep))
                })
                .collect();
            if ready.is_empty() {
                break;
            }

            // Contexts are snapshotted before launch so the batch sees a
            // consistent view of completed dependencies.
            let batch: Vec<(&WorkflowStep, String)> = ready
                .into_iter()
                .map(|step| {
                    let context_text = if request.pass_context {
                        dependency_sections(step, &checkpoint.completed)
                    } else {
                        String::new()
                    };
                    (step, context_text)
                })
                .collect();

            let futures = batch.into_iter().map(|(step, context_text)| {
                let runner = &runner;
                async move { (step.name.clone(), runner.run(step, &context_text).await) }
            });

            for (name, result) in join_all(futures).await {
                match result {
                    StepResult::Completed(outcome) => {
                        checkpoint.mark_completed(&name, outcome.result, outcome.duration_ms);
                    }
                    StepResult::Failed(error) => checkpoint.mark_failed(&name, error),
                }
            }
            self.checkpoints.save(label, checkpoint).await?;
        }

        let status = if checkpoint.all_steps_completed() && checkpoint.failed.is_empty() {
            CheckpointStatus::Done
        } else {
            CheckpointStatus::Failed
        };
        checkpoint.set_status(status);
        self.checkpoints.save(label, checkpoint).await
    }

    fn assemble(&self, request: &WorkflowRequest, label: &str, checkpoint: &Checkpoint) -> Value {
        let total_duration_ms: u64 = checkpoint
            .completed
            .values()
            .map(|o| o.duration_ms)
            .sum();

        let results = if request.merge.as_deref() == Some("merge") {
            let mut merged = Map::new();
            for (name, outcome) in &checkpoint.completed {
                merged.insert(name.clone(), json!(outcome.result));
            }
            Value::Object(merged)
        } else {
            let sections: Vec<String> = request
                .steps
                .iter()
                .filter_map(|s| {
                    checkpoint
                        .completed
                        .get(&s.name)
                        .map(|o| format!("## {}\n\n{}", s.name, o.result))
                })
                .collect();
            json!(sections.join("\n\n---\n\n"))
        };

        let status = match checkpoint.status {
            CheckpointStatus::Done => "done",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::InProgress => "in_progress",
        };

        let mut out = json!({
            "status": status,
            "pattern": request.pattern.as_str(),
            "stepsCompleted": checkpoint.completed.len(),
            "stepsFailed": checkpoint.failed.len(),
            "totalSteps": request.steps.len(),
            "totalDurationMs": total_duration_ms,
            "results": results,
        });
        if !checkpoint.failed.is_empty() {
            let failures: Map<String, Value> = checkpoint
                .failed
                .iter()
                .map(|(name, failure)| (name.clone(), json!(failure.error)))
                .collect();
            out["failures"] = Value::Object(failures);
        }
        if checkpoint.status != CheckpointStatus::Done {
            out["checkpoint"] = json!(self.checkpoints.path_for(label).display().to_string());
        }
        out
    }
}

/// `### <name>` sections for every completed step, in request order.
fn completed_sections(
    steps: &[WorkflowStep],
    completed: &HashMap<String, StepOutcome>,
) -> String {
    steps
        .iter()
        .filter_map(|s| {
            completed
                .get(&s.name)
                .map(|o| format!("### {}\n{}", s.name, o.result))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Context for a DAG step: sections for its dependencies only.
fn dependency_sections(step: &WorkflowStep, completed: &HashMap<String, StepOutcome>) -> String {
    step.depends_on
        .iter()
        .filter_map(|dep| {
            completed
                .get(dep)
                .map(|o| format!("### {}\n{}", dep, o.result))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            name: name.to_string(),
            task: format!("run {name}"),
            model: None,
            thinking: None,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            timeout_seconds: None,
        }
    }

    #[test]
    fn test_dependency_sections_only_include_deps() {
        let mut completed = HashMap::new();
        completed.insert(
            "a".to_string(),
            StepOutcome {
                result: "a-ok".to_string(),
                duration_ms: 1,
            },
        );
        completed.insert(
            "b".to_string(),
            StepOutcome {
                result: "b-ok".to_string(),
                duration_ms: 1,
            },
        );

        let text = dependency_sections(&step("c", &["a"]), &completed);
        assert_eq!(text, "### a\na-ok");
    }

    #[test]
    fn test_completed_sections_follow_step_order() {
        let steps = vec![step("first", &[]), step("second", &[])];
        let mut completed = HashMap::new();
        for name in ["second", "first"] {
            completed.insert(
                name.to_string(),
                StepOutcome {
                    result: format!("{name}-ok"),
                    duration_ms: 1,
                },
            );
        }

        let text = completed_sections(&steps, &completed);
        assert!(text.starts_with("### first\nfirst-ok"));
        assert!(text.contains("### second\nsecond-ok"));
    }
}
