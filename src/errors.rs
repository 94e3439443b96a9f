use serde_json::Value;
use thiserror::Error;

/// Failure returned by a user-supplied tool or resource handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Descriptor rejected while it was being finalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{kind} {field} cannot be empty")]
    EmptyField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("handler must be provided for {kind} '{key}'")]
    MissingHandler { kind: &'static str, key: String },
    #[error("input schema for tool '{name}' must be a JSON object of type \"object\"")]
    InvalidInputSchema { name: String },
}

impl ValidationError {
    pub fn empty(kind: &'static str, field: &'static str) -> Self {
        Self::EmptyField { kind, field }
    }

    pub fn missing_handler(kind: &'static str, key: impl Into<String>) -> Self {
        Self::MissingHandler {
            kind,
            key: key.into(),
        }
    }
}

/// Lookup or invocation failure inside the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Resource not found: {uri}")]
    ResourceNotFound { uri: String },
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },
    #[error("invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },
    #[error("error reading resource: {message}")]
    ResourceHandler { uri: String, message: String },
    #[error("error reading resource from template: {message}")]
    TemplateHandler { uri: String, message: String },
    #[error("error calling tool '{name}': {message}")]
    ToolHandler { name: String, message: String },
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ResourceNotFound { .. } | Self::ToolNotFound { .. }
        )
    }
}

/// Client-side transport failure.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Server process not running")]
    NotRunning,
    #[error("failed to spawn server process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to capture child {stream}")]
    MissingPipe { stream: &'static str },
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("server closed its output stream{}", format_stderr_suffix(.stderr))]
    Closed { stderr: String },
    #[error("malformed response line: {0}")]
    Malformed(String),
    #[error("expected response id {expected}, got {actual}")]
    UnexpectedResponse { expected: u64, actual: Value },
    #[error("server error [{code}]: {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<Value>,
    },
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

fn format_stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {trimmed}")
    }
}
