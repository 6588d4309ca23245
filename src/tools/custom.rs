//! User-defined tools dispatched to an HTTP endpoint or a local script.
//!
//! Which mode runs is decided by the config: `endpoint` wins over `script`.
//! Raw output is normalized so callers always see JSON: parsable output is
//! returned verbatim, anything else is wrapped as `{status: "ok", output}`.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{HiveError, Result};
use crate::tools::ToolResponse;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_CAPTURED_OUTPUT: usize = 1024 * 1024;
const HTTP_ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomToolConfig {
    pub name: String,
    pub description: String,
    pub label: Option<String>,
    /// HTTP mode target; takes precedence when both modes are configured.
    pub endpoint: Option<String>,
    /// Script mode command line, split on whitespace.
    pub script: Option<String>,
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub parameters: HashMap<String, ParamSpec>,
    pub timeout_seconds: Option<u64>,
}

/// One registered user-defined tool.
pub struct CustomTool {
    config: CustomToolConfig,
    client: reqwest::Client,
}

impl CustomTool {
    pub fn new(config: CustomToolConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn label(&self) -> Option<&str> {
        self.config.label.as_deref()
    }

    /// JSON-schema object derived from the declarative parameter table.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for (name, spec) in &self.config.parameters {
            let mut prop = Map::new();
            prop.insert("type".to_string(), json!(spec.param_type.as_str()));
            if let Some(description) = &spec.description {
                prop.insert("description".to_string(), json!(description));
            }
            if let Some(default) = &spec.default {
                prop.insert("default".to_string(), default.clone());
            }
            properties.insert(name.clone(), Value::Object(prop));
            if spec.required {
                required.push(name.clone());
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub async fn execute(&self, call_id: &str, args: Value) -> ToolResponse {
        debug!(tool = %self.config.name, call_id, "Executing custom tool");
        ToolResponse::from_result(self.run(args).await)
    }

    async fn run(&self, args: Value) -> Result<Value> {
        let mut params = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(HiveError::Validation(format!(
                    "tool parameters must be an object, got {}",
                    type_name(&other)
                )));
            }
        };
        self.apply_defaults(&mut params)?;

        let raw = if self.config.endpoint.is_some() {
            self.run_http(&params).await?
        } else if self.config.script.is_some() {
            self.run_script(&params).await?
        } else {
            return Err(HiveError::Validation(format!(
                "tool \"{}\" has no endpoint or script",
                self.config.name
            )));
        };

        Ok(normalize_output(&raw))
    }

    /// Fill declared defaults for absent optional parameters, then check that
    /// every required parameter arrived.
    fn apply_defaults(&self, params: &mut Map<String, Value>) -> Result<()> {
        for (name, spec) in &self.config.parameters {
            if !params.contains_key(name)
                && let Some(default) = &spec.default
            {
                params.insert(name.clone(), default.clone());
            }
        }
        for (name, spec) in &self.config.parameters {
            if spec.required && !params.contains_key(name) {
                return Err(HiveError::Validation(format!(
                    "missing required parameter \"{}\"",
                    name
                )));
            }
        }
        Ok(())
    }

    async fn run_http(&self, params: &Map<String, Value>) -> Result<String> {
        let endpoint = self.config.endpoint.as_deref().unwrap_or_default();
        let method = self
            .config
            .method
            .as_deref()
            .unwrap_or("POST")
            .to_uppercase();
        let deadline = Duration::from_secs(self.timeout_secs());

        let request = if method == "GET" {
            let pairs: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| (k.clone(), value_as_arg(v)))
                .collect();
            self.client.get(endpoint).query(&pairs)
        } else {
            let http_method = reqwest::Method::from_bytes(method.as_bytes())
                .map_err(|_| HiveError::Validation(format!("invalid HTTP method \"{method}\"")))?;
            self.client
                .request(http_method, endpoint)
                .body(serde_json::to_string(params)?)
        };

        // User headers override the defaults; insert replaces, so the
        // configured Content-Type wins over ours.
        let mut headers = reqwest::header::HeaderMap::new();
        if method != "GET" {
            headers.insert(
                reqwest::header::CONTENT_TYPE,
                reqwest::header::HeaderValue::from_static("application/json"),
            );
        }
        for (key, value) in &self.config.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes());
            let header_value = reqwest::header::HeaderValue::from_str(value);
            match (name, header_value) {
                (Ok(name), Ok(header_value)) => {
                    headers.insert(name, header_value);
                }
                _ => debug!(tool = %self.config.name, header = %key, "Skipping invalid header"),
            }
        }

        let response = request
            .headers(headers)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HiveError::Timeout(format!(
                        "tool \"{}\" timed out after {}s",
                        self.config.name,
                        self.timeout_secs()
                    ))
                } else {
                    HiveError::Tool(format!("request to {endpoint} failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = body.chars().take(HTTP_ERROR_BODY_LIMIT).collect();
            return Err(HiveError::Tool(format!(
                "HTTP {} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                snippet
            )));
        }
        Ok(body)
    }

    async fn run_script(&self, params: &Map<String, Value>) -> Result<String> {
        let script = self.config.script.as_deref().unwrap_or_default();
        let mut tokens = script.split_whitespace();
        let program = tokens
            .next()
            .ok_or_else(|| HiveError::Validation("script command is empty".to_string()))?;

        let mut command = Command::new(program);
        command.args(tokens);

        // Parameters ride both ways: argv for scripts that parse flags, env
        // for scripts that prefer TOOL_PARAM_* lookups.
        for (key, value) in params {
            if value.is_null() {
                continue;
            }
            let rendered = value_as_arg(value);
            command.arg(format!("--{key}={rendered}"));
            command.env(format!("TOOL_PARAM_{}", key.to_uppercase()), rendered);
        }

        command.stdin(Stdio::null());
        let deadline = Duration::from_secs(self.timeout_secs());
        let output = timeout(deadline, command.output())
            .await
            .map_err(|_| {
                HiveError::Timeout(format!(
                    "tool \"{}\" timed out after {}s",
                    self.config.name,
                    self.timeout_secs()
                ))
            })?
            .map_err(|e| HiveError::Tool(format!("failed to run \"{program}\": {e}")))?;

        let stdout = capped_lossy(&output.stdout);
        let stderr = capped_lossy(&output.stderr);

        if stdout.trim().is_empty() && !stderr.trim().is_empty() {
            Ok(stderr)
        } else if stdout.trim().is_empty() {
            Ok("(no output)".to_string())
        } else {
            Ok(stdout)
        }
    }

    fn timeout_secs(&self) -> u64 {
        self.config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

/// JSON output passes through untouched; plain text gets wrapped.
fn normalize_output(raw: &str) -> Value {
    let trimmed = raw.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(_) => json!({"status": "ok", "output": trimmed}),
    }
}

fn value_as_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn capped_lossy(bytes: &[u8]) -> String {
    let slice = if bytes.len() > MAX_CAPTURED_OUTPUT {
        &bytes[..MAX_CAPTURED_OUTPUT]
    } else {
        bytes
    };
    String::from_utf8_lossy(slice).to_string()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
