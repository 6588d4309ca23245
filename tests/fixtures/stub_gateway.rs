//! Scripted gateway stub for exercising workflows without a host process.
//!
//! Each step label can be given a canned assistant reply; the reply becomes
//! visible through `sessions.history` once the step's `agent` call lands.
//! Labels can also be told to refuse spawning. Every call is recorded for
//! assertions.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use hivekit::error::{HiveError, Result};
use hivekit::gateway::Gateway;

#[derive(Default)]
pub struct StubGateway {
    replies: Mutex<HashMap<String, String>>,
    fail_spawns: Mutex<HashSet<String>>,
    sessions: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the assistant reply for a step label.
    pub fn reply(&self, label: &str, reply: &str) {
        self.replies.lock().insert(label.to_string(), reply.to_string());
    }

    /// Refuse the `agent` call for a step label.
    pub fn fail_spawn(&self, label: &str) {
        self.fail_spawns.lock().insert(label.to_string());
    }

    pub fn allow_spawn(&self, label: &str) {
        self.fail_spawns.lock().remove(label);
    }

    /// Parameters of every recorded call to `method`, in call order.
    pub fn calls_for(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    /// Messages sent to spawned agents, keyed by step label.
    pub fn agent_messages(&self) -> HashMap<String, String> {
        self.calls_for("agent")
            .into_iter()
            .map(|params| {
                (
                    params["label"].as_str().unwrap_or_default().to_string(),
                    params["message"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl Gateway for StubGateway {
    async fn call(&self, method: &str, params: Value, _timeout_ms: u64) -> Result<Value> {
        self.calls.lock().push((method.to_string(), params.clone()));

        match method {
            "sessions.patch" => Ok(json!({})),
            "agent" => {
                let label = params["label"].as_str().unwrap_or_default().to_string();
                if self.fail_spawns.lock().contains(&label) {
                    return Err(HiveError::Transport(format!("spawn refused for {label}")));
                }
                let session_key = params["sessionKey"].as_str().unwrap_or_default();
                if let Some(reply) = self.replies.lock().get(&label) {
                    self.sessions
                        .lock()
                        .insert(session_key.to_string(), reply.clone());
                }
                Ok(json!({"runId": format!("run-{label}")}))
            }
            "sessions.history" => {
                let key = params["key"].as_str().unwrap_or_default();
                let messages = match self.sessions.lock().get(key) {
                    Some(reply) => json!([{"role": "assistant", "content": reply}]),
                    None => json!([]),
                };
                Ok(json!({"messages": messages}))
            }
            other => Err(HiveError::Transport(format!("unknown method {other}"))),
        }
    }
}
