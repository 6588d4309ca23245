//! Session templates: named model/thinking presets applied through the
//! gateway.
//!
//! Templates live in the config snapshot. Applying one patches the target
//! session's model (fatal on failure) and thinking level (best effort). A
//! template's system prompt is not injected here; it is picked up at spawn
//! time by whoever creates the session.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::config::HiveConfig;
use crate::error::{HiveError, Result};
use crate::gateway::{Gateway, GatewayClient};
use crate::tools::ToolResponse;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum TemplateAction {
    List {},
    Apply {
        template: String,
        #[serde(default)]
        session_key: Option<String>,
    },
}

pub struct TemplateApplicator {
    config: Arc<HiveConfig>,
    gateway: Arc<dyn Gateway>,
    /// Session patched when the caller names no target.
    caller_session_key: String,
}

impl TemplateApplicator {
    pub fn new(
        config: Arc<HiveConfig>,
        gateway: Arc<dyn Gateway>,
        caller_session_key: impl Into<String>,
    ) -> Self {
        Self {
            config,
            gateway,
            caller_session_key: caller_session_key.into(),
        }
    }

    pub async fn execute(&self, _call_id: &str, args: Value) -> ToolResponse {
        let action: TemplateAction = match serde_json::from_value(args) {
            Ok(action) => action,
            Err(e) => {
                return ToolResponse::from_result(Err(HiveError::Validation(e.to_string())));
            }
        };

        let result = match action {
            TemplateAction::List {} => self.list(),
            TemplateAction::Apply {
                template,
                session_key,
            } => self.apply(&template, session_key.as_deref()).await,
        };
        ToolResponse::from_result(result)
    }

    pub fn list(&self) -> Result<Value> {
        let mut templates: Vec<Value> = self
            .config
            .session
            .templates
            .iter()
            .map(|(name, template)| {
                json!({
                    "name": name,
                    "model": template.model,
                    "thinking": template.thinking,
                    "description": template.description,
                    "hasSystemPrompt": template.system_prompt.is_some(),
                })
            })
            .collect();
        templates.sort_by_key(|t| t["name"].as_str().unwrap_or_default().to_string());

        Ok(json!({"status": "ok", "templates": templates}))
    }

    pub async fn apply(&self, name: &str, session_key: Option<&str>) -> Result<Value> {
        let Some(template) = self.config.session.templates.get(name) else {
            return Ok(json!({"status": "not_found", "template": name}));
        };

        let target = session_key.unwrap_or(&self.caller_session_key);
        let client = GatewayClient::new(self.gateway.as_ref());
        let mut applied = Vec::new();

        if let Some(model) = &template.model {
            client
                .patch_model(target, model)
                .await
                .map_err(|e| HiveError::Transport(format!("model patch failed: {e}")))?;
            applied.push(format!("model={model}"));
        }

        if let Some(thinking) = &template.thinking {
            match client.patch_thinking(target, thinking).await {
                Ok(_) => applied.push(format!("thinking={thinking}")),
                Err(e) => {
                    warn!(template = name, error = %e, "Thinking patch failed, continuing");
                }
            }
        }

        let mut result = json!({
            "status": "applied",
            "template": name,
            "session": target,
            "applied": applied,
        });
        if template.system_prompt.is_some() {
            result["note"] =
                json!("template has a system prompt; it is injected when a session is spawned");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionTemplate;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct ScriptedGateway {
        calls: Mutex<Vec<(String, Value)>>,
        fail_thinking: bool,
        fail_model: bool,
    }

    #[async_trait]
    impl Gateway for ScriptedGateway {
        async fn call(&self, method: &str, params: Value, _timeout_ms: u64) -> Result<Value> {
            let is_thinking = params.get("thinkingLevel").is_some();
            let is_model = params.get("model").is_some();
            self.calls.lock().push((method.to_string(), params));
            if (is_thinking && self.fail_thinking) || (is_model && self.fail_model) {
                return Err(HiveError::Transport("patch refused".to_string()));
            }
            Ok(json!({}))
        }
    }

    fn applicator(gateway: Arc<ScriptedGateway>) -> TemplateApplicator {
        let mut config = HiveConfig::default();
        config.session.templates.insert(
            "deep".to_string(),
            SessionTemplate {
                model: Some("anthropic/claude-3-5-sonnet".to_string()),
                thinking: Some("high".to_string()),
                description: Some("slow and careful".to_string()),
                system_prompt: Some("Be thorough.".to_string()),
            },
        );
        TemplateApplicator::new(Arc::new(config), gateway, "agent:main:main")
    }

    fn gateway(fail_model: bool, fail_thinking: bool) -> Arc<ScriptedGateway> {
        Arc::new(ScriptedGateway {
            calls: Mutex::new(Vec::new()),
            fail_thinking,
            fail_model,
        })
    }

    #[tokio::test]
    async fn test_list_reports_system_prompt_flag() {
        let applicator = applicator(gateway(false, false));
        let listed = applicator.list().unwrap();
        let templates = listed["templates"].as_array().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0]["name"], "deep");
        assert_eq!(templates[0]["hasSystemPrompt"], true);
    }

    #[tokio::test]
    async fn test_apply_patches_model_and_thinking() {
        let gw = gateway(false, false);
        let applicator = applicator(Arc::clone(&gw));

        let result = applicator.apply("deep", None).await.unwrap();
        assert_eq!(result["status"], "applied");
        assert_eq!(result["session"], "agent:main:main");
        assert_eq!(
            result["applied"],
            json!(["model=anthropic/claude-3-5-sonnet", "thinking=high"])
        );
        assert!(result["note"].as_str().unwrap().contains("system prompt"));
        assert_eq!(gw.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_thinking_failure_is_non_fatal() {
        let applicator = applicator(gateway(false, true));
        let result = applicator.apply("deep", Some("agent:main:other")).await.unwrap();
        assert_eq!(result["status"], "applied");
        assert_eq!(result["applied"], json!(["model=anthropic/claude-3-5-sonnet"]));
    }

    #[tokio::test]
    async fn test_model_failure_is_fatal() {
        let applicator = applicator(gateway(true, false));
        let err = applicator.apply("deep", None).await.unwrap_err();
        assert_eq!(err.code(), "transport");
    }

    #[tokio::test]
    async fn test_unknown_template() {
        let applicator = applicator(gateway(false, false));
        let result = applicator.apply("missing", None).await.unwrap();
        assert_eq!(result["status"], "not_found");
    }
}
