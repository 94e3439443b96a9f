//! Line framing for JSON-RPC 2.0 messages
//!
//! Every message travels as one UTF-8 JSON object terminated by `\n`. Decoding
//! never panics: malformed input becomes a [`ParseFailure`] that the caller
//! turns into a protocol error.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

pub const JSON_RPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const NOT_INITIALIZED: i32 = -32002;
pub const ALREADY_INITIALIZED: i32 = -32003;
pub const UNSUPPORTED_PROTOCOL_VERSION: i32 = -32004;

/// Routing identifier for a request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Initialized,
    Ping,
    ToolsList,
    ToolsCall,
    ResourcesList,
    ResourcesRead,
    ResourceTemplatesList,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Initialize => "initialize",
            Self::Initialized => "notifications/initialized",
            Self::Ping => "ping",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::ResourcesList => "resources/list",
            Self::ResourcesRead => "resources/read",
            Self::ResourceTemplatesList => "resources/templates/list",
            Self::Other(name) => name,
        }
    }

    /// Methods a server answers before the handshake has completed.
    pub fn allowed_before_initialized(&self) -> bool {
        matches!(self, Self::Initialize | Self::Initialized | Self::Ping)
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        match name {
            "initialize" => Self::Initialize,
            "notifications/initialized" => Self::Initialized,
            "ping" => Self::Ping,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "resources/list" => Self::ResourcesList,
            "resources/read" => Self::ResourcesRead,
            "resources/templates/list" => Self::ResourceTemplatesList,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from(name.as_str()))
    }
}

fn default_version() -> String {
    JSON_RPC_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl Request {
    pub fn new(id: u64, method: Method, params: Option<Map<String, Value>>) -> Self {
        Self {
            jsonrpc: default_version(),
            id: Some(Value::from(id)),
            method,
            params,
        }
    }

    pub fn notification(method: Method) -> Self {
        Self {
            jsonrpc: default_version(),
            id: None,
            method,
            params: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|params| params.get(key))
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response envelope. Constructors guarantee exactly one of `result`/`error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    pub fn error_with_data(
        id: Option<Value>,
        code: i32,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: default_version(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    /// The line is not JSON at all.
    #[error("Invalid JSON: {0}")]
    Malformed(String),
    /// Valid JSON that is not a usable request.
    #[error("Invalid Request: {reason}")]
    Invalid { id: Option<Value>, reason: String },
}

impl ParseFailure {
    pub fn id(&self) -> Option<Value> {
        match self {
            Self::Malformed(_) => None,
            Self::Invalid { id, .. } => id.clone(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Malformed(_) => PARSE_ERROR,
            Self::Invalid { .. } => INVALID_REQUEST,
        }
    }

    pub fn into_response(self) -> Response {
        Response::error(self.id(), self.code(), self.to_string())
    }
}

pub fn decode(line: &str) -> Result<Request, ParseFailure> {
    let payload: Value =
        serde_json::from_str(line).map_err(|err| ParseFailure::Malformed(err.to_string()))?;

    let Some(object) = payload.as_object() else {
        return Err(ParseFailure::Invalid {
            id: None,
            reason: "message must be a JSON object".to_string(),
        });
    };

    let id = object.get("id").filter(|id| !id.is_null()).cloned();
    let invalid = |reason: &str| ParseFailure::Invalid {
        id: id.clone(),
        reason: reason.to_string(),
    };

    match object.get("jsonrpc") {
        None => {}
        Some(Value::String(version)) if version == JSON_RPC_VERSION => {}
        Some(_) => return Err(invalid("jsonrpc must be \"2.0\"")),
    }
    if !object.get("method").is_some_and(Value::is_string) {
        return Err(invalid("method must be a string"));
    }
    if object
        .get("params")
        .is_some_and(|params| !params.is_object() && !params.is_null())
    {
        return Err(invalid("params must be an object"));
    }

    serde_json::from_value(payload).map_err(|err| invalid(&err.to_string()))
}

pub fn decode_response(line: &str) -> Result<Response, serde_json::Error> {
    serde_json::from_str(line)
}

/// Serialize one message as a single line, without the trailing newline.
pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
