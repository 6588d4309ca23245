//! Outbound RPC shim for the process that owns agent sessions.
//!
//! Everything behind the gateway is opaque. The core calls named methods
//! with typed parameters and a per-call deadline and decodes the JSON it
//! gets back. Implementations wrap whatever transport the host provides;
//! tests plug in a scripted stub.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{HiveError, Result};

pub const PATCH_TIMEOUT_MS: u64 = 10_000;

/// Extra headroom on `agent` calls beyond the step's own deadline.
pub const AGENT_CALL_GRACE_MS: u64 = 30_000;

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Invoke a named method and return the decoded result.
    async fn call(&self, method: &str, params: Value, timeout_ms: u64) -> Result<Value>;
}

/// Parameters for spawning one sub-agent run.
#[derive(Debug, Clone)]
pub struct AgentSpawn {
    pub message: String,
    pub session_key: String,
    pub idempotency_key: String,
    pub extra_system_prompt: Option<String>,
    pub thinking: Option<String>,
    pub timeout_secs: u64,
    pub label: String,
    pub spawned_by: String,
}

/// Typed wrappers over the raw `call` surface.
pub struct GatewayClient<'a> {
    gateway: &'a dyn Gateway,
}

impl<'a> GatewayClient<'a> {
    pub fn new(gateway: &'a dyn Gateway) -> Self {
        Self { gateway }
    }

    pub async fn patch_spawn_depth(&self, session_key: &str, depth: u32) -> Result<Value> {
        self.gateway
            .call(
                "sessions.patch",
                json!({"key": session_key, "spawnDepth": depth}),
                PATCH_TIMEOUT_MS,
            )
            .await
    }

    pub async fn patch_model(&self, session_key: &str, model: &str) -> Result<Value> {
        self.gateway
            .call(
                "sessions.patch",
                json!({"key": session_key, "model": model}),
                PATCH_TIMEOUT_MS,
            )
            .await
    }

    /// `"off"` maps to a null level, clearing any configured thinking.
    pub async fn patch_thinking(&self, session_key: &str, level: &str) -> Result<Value> {
        let thinking_level = if level == "off" {
            Value::Null
        } else {
            json!(level)
        };
        self.gateway
            .call(
                "sessions.patch",
                json!({"key": session_key, "thinkingLevel": thinking_level}),
                PATCH_TIMEOUT_MS,
            )
            .await
    }

    /// Spawn a sub-agent run. Returns the gateway's run id.
    pub async fn spawn_agent(&self, spawn: &AgentSpawn) -> Result<String> {
        let params = json!({
            "message": spawn.message,
            "sessionKey": spawn.session_key,
            "idempotencyKey": spawn.idempotency_key,
            "deliver": false,
            "lane": "subagent",
            "extraSystemPrompt": spawn.extra_system_prompt,
            "thinking": spawn.thinking,
            "timeout": spawn.timeout_secs,
            "label": spawn.label,
            "spawnedBy": spawn.spawned_by,
        });
        let timeout_ms = spawn.timeout_secs * 1000 + AGENT_CALL_GRACE_MS;

        let result = self.gateway.call("agent", params, timeout_ms).await?;
        result
            .get("runId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HiveError::Transport("agent call returned no runId".to_string()))
    }

    /// Last assistant reply in a session's recent history, if any. The
    /// gateway may put the text under `content` or `text`.
    pub async fn last_assistant_reply(&self, session_key: &str) -> Result<Option<String>> {
        let result = self
            .gateway
            .call(
                "sessions.history",
                json!({"key": session_key, "limit": 5}),
                PATCH_TIMEOUT_MS,
            )
            .await?;

        let reply = result
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| {
                messages
                    .iter()
                    .rev()
                    .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
            })
            .and_then(|m| {
                m.get("content")
                    .and_then(Value::as_str)
                    .or_else(|| m.get("text").and_then(Value::as_str))
            })
            .map(str::to_string)
            .filter(|text| !text.trim().is_empty());

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingGateway {
        calls: Mutex<Vec<(String, Value)>>,
        reply: Value,
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn call(&self, method: &str, params: Value, _timeout_ms: u64) -> Result<Value> {
            self.calls.lock().push((method.to_string(), params));
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_thinking_off_maps_to_null() {
        let gateway = RecordingGateway {
            calls: Mutex::new(Vec::new()),
            reply: json!({}),
        };
        GatewayClient::new(&gateway)
            .patch_thinking("agent:main:main", "off")
            .await
            .unwrap();

        let calls = gateway.calls.lock();
        assert_eq!(calls[0].0, "sessions.patch");
        assert!(calls[0].1["thinkingLevel"].is_null());
    }

    #[tokio::test]
    async fn test_last_assistant_reply_content_then_text() {
        let gateway = RecordingGateway {
            calls: Mutex::new(Vec::new()),
            reply: json!({"messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "text": "done via text"},
            ]}),
        };
        let reply = GatewayClient::new(&gateway)
            .last_assistant_reply("agent:main:workflow:x")
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("done via text"));
    }

    #[tokio::test]
    async fn test_empty_assistant_reply_is_none() {
        let gateway = RecordingGateway {
            calls: Mutex::new(Vec::new()),
            reply: json!({"messages": [{"role": "assistant", "content": "  "}]}),
        };
        let reply = GatewayClient::new(&gateway)
            .last_assistant_reply("agent:main:workflow:x")
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_spawn_agent_requires_run_id() {
        let gateway = RecordingGateway {
            calls: Mutex::new(Vec::new()),
            reply: json!({}),
        };
        let spawn = AgentSpawn {
            message: "task".to_string(),
            session_key: "agent:main:workflow:x".to_string(),
            idempotency_key: "k".to_string(),
            extra_system_prompt: None,
            thinking: None,
            timeout_secs: 600,
            label: "step".to_string(),
            spawned_by: "agent:main:main".to_string(),
        };
        let err = GatewayClient::new(&gateway).spawn_agent(&spawn).await;
        assert!(err.is_err());
    }
}
