use thiserror::Error;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool execution failed: {0}")]
    Tool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HiveError {
    /// Stable discriminant used when the error is encoded into a tool result.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Storage(_) | Self::Io(_) => "storage",
            Self::Config(_) | Self::Toml(_) => "config",
            Self::Tool(_) => "tool",
            Self::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, HiveError>;
