//! Single workflow step execution against the gateway.
//!
//! A step gets a fresh child session, a spawn-depth patch, an optional model
//! patch, and one `agent` call. Completion is detected by polling the child
//! session's history until the last assistant message carries content, or the
//! step deadline passes. Step failures come back as messages, not errors;
//! the pattern executors fold them into the checkpoint.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::HiveConfig;
use crate::gateway::{AgentSpawn, Gateway, GatewayClient};
use crate::registry::{RunRecord, SubagentRegistry};
use crate::workflow::checkpoint::StepOutcome;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub name: String,
    pub task: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

pub(crate) enum StepResult {
    Completed(StepOutcome),
    Failed(String),
}

pub(crate) struct StepRunner<'a> {
    pub gateway: &'a dyn Gateway,
    pub registry: &'a SubagentRegistry,
    pub config: &'a HiveConfig,
    pub caller_session_key: &'a str,
    pub caller_depth: u32,
    pub poll_interval: Duration,
}

impl StepRunner<'_> {
    pub async fn run(&self, step: &WorkflowStep, context_text: &str) -> StepResult {
        let started = Instant::now();
        let child_key = format!(
            "agent:{}:workflow:{}",
            self.config.agent.id,
            Uuid::new_v4()
        );
        let child_depth = self.caller_depth + 1;
        let timeout_secs = step
            .timeout_seconds
            .unwrap_or(self.config.workflow.default_step_timeout_secs);
        let client = GatewayClient::new(self.gateway);

        debug!(step = %step.name, session = %child_key, "Spawning workflow step");

        if let Err(e) = client.patch_spawn_depth(&child_key, child_depth).await {
            return StepResult::Failed(format!(
                "Step \"{}\" could not set spawn depth: {}",
                step.name, e
            ));
        }

        let model = step
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model());
        if let Err(e) = client.patch_model(&child_key, &model).await {
            warn!(step = %step.name, error = %e, "Model patch failed, continuing with session default");
        }

        let spawn = AgentSpawn {
            message: full_task(&step.task, context_text),
            session_key: child_key.clone(),
            idempotency_key: Uuid::new_v4().to_string(),
            extra_system_prompt: None,
            thinking: step.thinking.clone(),
            timeout_secs,
            label: step.name.clone(),
            spawned_by: self.caller_session_key.to_string(),
        };
        let run_id = match client.spawn_agent(&spawn).await {
            Ok(run_id) => run_id,
            Err(e) => {
                return StepResult::Failed(format!(
                    "Step \"{}\" failed to spawn: {}",
                    step.name, e
                ));
            }
        };

        self.registry.register_run(
            self.caller_session_key,
            RunRecord {
                run_id: run_id.clone(),
                child_session_key: child_key.clone(),
                label: step.name.clone(),
                depth: child_depth,
            },
        );

        let result = self
            .await_reply(&step.name, &child_key, timeout_secs)
            .await;
        self.registry.release_run(self.caller_session_key, &run_id);

        match result {
            Some(reply) => StepResult::Completed(StepOutcome {
                result: reply,
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            None => StepResult::Failed(format!(
                "Step \"{}\" timed out after {}s with no result",
                step.name, timeout_secs
            )),
        }
    }

    /// Poll session history until an assistant reply shows up or the step
    /// deadline passes. Transient poll errors are swallowed; only the
    /// deadline ends the wait.
    async fn await_reply(
        &self,
        step_name: &str,
        session_key: &str,
        timeout_secs: u64,
    ) -> Option<String> {
        let client = GatewayClient::new(self.gateway);
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);

        loop {
            match client.last_assistant_reply(session_key).await {
                Ok(Some(reply)) => return Some(reply),
                Ok(None) => {}
                Err(e) => {
                    debug!(step = step_name, error = %e, "History poll failed, retrying");
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn full_task(task: &str, context_text: &str) -> String {
    if context_text.is_empty() {
        task.to_string()
    } else {
        format!(
            "## Context from prior workflow steps\n\n{}\n\n---\n\n## Your task\n\n{}",
            context_text, task
        )
    }
}
