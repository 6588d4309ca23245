//! Configuration snapshot loaded once at startup.
//!
//! Read from `<workspace>/hivekit.toml`; a missing file yields defaults.
//! The snapshot is immutable after load and shared by reference.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{HiveError, Result};
use crate::tools::custom::CustomToolConfig;

pub const DEFAULT_PROVIDER: &str = "anthropic";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    pub agent: AgentConfig,
    pub workflow: WorkflowConfig,
    pub session: SessionConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identifier of the agent this process acts as.
    pub id: String,
    pub provider: String,
    pub model: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: "main".to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// How deep agent-spawns-agent chains may nest.
    pub max_spawn_depth: u32,
    /// Fan-out ceiling checked at admission for parallel workflows.
    pub max_children_per_agent: usize,
    pub poll_interval_ms: u64,
    pub default_step_timeout_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_spawn_depth: 1,
            max_children_per_agent: 5,
            poll_interval_ms: 3000,
            default_step_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub templates: HashMap<String, SessionTemplate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTemplate {
    pub model: Option<String>,
    pub thinking: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub custom: Vec<CustomToolConfig>,
}

impl HiveConfig {
    pub async fn load(workspace_root: &Path) -> Result<Self> {
        let config_path = workspace_root.join("hivekit.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the snapshot for values that would wedge the runtime.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.agent.id.is_empty() {
            errors.push("agent.id must not be empty");
        }
        if self.agent.model.is_empty() {
            errors.push("agent.model must not be empty");
        }
        if self.workflow.max_children_per_agent == 0 {
            errors.push("workflow.max_children_per_agent must be greater than 0");
        }
        if self.workflow.poll_interval_ms == 0 {
            errors.push("workflow.poll_interval_ms must be greater than 0");
        }
        if self.workflow.default_step_timeout_secs == 0 {
            errors.push("workflow.default_step_timeout_secs must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HiveError::Config(errors.join("; ")))
        }
    }

    /// `"<provider>/<model>"` used when a workflow step names no model.
    pub fn default_model(&self) -> String {
        format!("{}/{}", self.agent.provider, self.agent.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HiveConfig::default();
        assert_eq!(config.workflow.max_spawn_depth, 1);
        assert_eq!(config.workflow.max_children_per_agent, 5);
        assert_eq!(config.default_model(), "anthropic/claude-3-5-sonnet");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_fanout() {
        let mut config = HiveConfig::default();
        config.workflow.max_children_per_agent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: HiveConfig = toml::from_str(
            r#"
            [workflow]
            max_spawn_depth = 2

            [session.templates.researcher]
            model = "anthropic/claude-3-5-sonnet"
            thinking = "high"
            description = "Deep research sessions"
            "#,
        )
        .unwrap();

        assert_eq!(config.workflow.max_spawn_depth, 2);
        assert_eq!(config.workflow.max_children_per_agent, 5);
        let template = config.session.templates.get("researcher").unwrap();
        assert_eq!(template.thinking.as_deref(), Some("high"));
        assert!(template.system_prompt.is_none());
    }
}
