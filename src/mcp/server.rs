//! The server side of the protocol engine
//!
//! Owns the registry and the handshake state, routes decoded requests and runs
//! the line-oriented serve loop. One request is fully handled before the next
//! line is read.

use std::{
    any::Any,
    io::{self, BufRead, Write},
    panic::{self, AssertUnwindSafe},
};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::{RegistryError, ValidationError};
use crate::logging::redact_audit_params;
use crate::mcp::codec::{
    self, Method, ParseFailure, Request, Response, ALREADY_INITIALIZED, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, NOT_INITIALIZED,
    UNSUPPORTED_PROTOCOL_VERSION,
};
use crate::registry::{
    resources::{ResourceBuilder, ResourceInfo},
    templates::ResourceTemplateBuilder,
    tools::{ToolArguments, ToolBuilder, ToolInfo},
    Registry,
};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    initialized: bool,
    supported_protocol_versions: Vec<String>,
}

impl SessionState {
    pub fn new(supported_protocol_versions: Vec<String>) -> Self {
        Self {
            initialized: false,
            supported_protocol_versions,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn supported_protocol_versions(&self) -> &[String] {
        &self.supported_protocol_versions
    }

    fn supports(&self, version: &str) -> bool {
        self.supported_protocol_versions
            .iter()
            .any(|supported| supported == version)
    }

    fn mark_initialized(&mut self) {
        self.initialized = true;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(vec![PROTOCOL_VERSION.to_string()])
    }
}

pub struct Server {
    name: String,
    version: String,
    registry: Registry,
    session: SessionState,
    page_size: Option<usize>,
}

impl Server {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            registry: Registry::new(),
            session: SessionState::default(),
            page_size: None,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.name.clone())
            .with_version(config.version.clone())
            .with_protocol_versions(config.protocol_versions.clone())
            .with_page_size(config.page_size)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_protocol_versions(mut self, versions: Vec<String>) -> Self {
        self.session = SessionState::new(versions);
        self
    }

    pub fn with_page_size(mut self, page_size: Option<usize>) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_initialized()
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn tool(&mut self, builder: ToolBuilder) -> Result<&mut Self, ValidationError> {
        self.registry.add_tool(builder.build()?);
        Ok(self)
    }

    pub fn resource(&mut self, builder: ResourceBuilder) -> Result<&mut Self, ValidationError> {
        self.registry.add_resource(builder.build()?);
        Ok(self)
    }

    pub fn resource_template(
        &mut self,
        builder: ResourceTemplateBuilder,
    ) -> Result<&mut Self, ValidationError> {
        self.registry.add_resource_template(builder.build()?);
        Ok(self)
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.registry.list_tools(None, None).tools
    }

    /// Call a tool in-process and keep only the first text item of its result.
    pub fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
    ) -> Result<Option<String>, RegistryError> {
        let result = self.registry.call_tool(name, arguments)?;
        Ok(result.first_text().map(str::to_string))
    }

    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        self.registry.list_resources(None, None).resources
    }

    pub fn read_resource(&self, uri: &str) -> Result<Option<String>, RegistryError> {
        let result = self.registry.read_resource(uri)?;
        Ok(result.first_text().map(str::to_string))
    }

    /// Serve on this process's stdin/stdout until stdin closes.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            server = %self.name,
            version = %self.version,
            tools = self.registry.tool_count(),
            resources = self.registry.resource_count(),
            resource_templates = self.registry.resource_template_count(),
            "server starting"
        );
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.serve(stdin.lock(), stdout.lock())
    }

    pub fn serve<R: BufRead, W: Write>(&mut self, mut reader: R, mut writer: W) -> io::Result<()> {
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            if reader.read_until(b'\n', &mut buffer)? == 0 {
                break;
            }

            let response = match std::str::from_utf8(&buffer) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.handle_line(line.trim_end()),
                Err(err) => Some(ParseFailure::Malformed(err.to_string()).into_response()),
            };

            if let Some(response) = response {
                write_response(&mut writer, &response)?;
            }
        }

        info!(server = %self.name, "input closed, server stopping");
        Ok(())
    }

    /// Decode and dispatch one line. `None` means nothing is written back.
    pub fn handle_line(&mut self, line: &str) -> Option<Response> {
        let request = match codec::decode(line) {
            Ok(request) => request,
            Err(failure) => {
                warn!(error = %failure, "rejected malformed message");
                return Some(failure.into_response());
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle_request(&request)));
        let response = outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!(method = %request.method, error = %message, "request handler panicked");
            Some(Response::error(request.id.clone(), INTERNAL_ERROR, message))
        });

        let outcome = match &response {
            Some(response) if response.is_error() => "failure",
            Some(_) => "success",
            None => "no-response",
        };
        info!(
            method = %request.method,
            params = %redact_audit_params(request.params.as_ref()),
            outcome,
            "mcp action audited"
        );

        // A repeated `notifications/initialized` is answered even without an id.
        if request.is_notification() && request.method != Method::Initialized {
            return None;
        }
        response
    }

    pub fn handle_request(&mut self, request: &Request) -> Option<Response> {
        let id = request.id.clone();

        if !self.session.is_initialized() && !request.method.allowed_before_initialized() {
            return Some(Response::error(id, NOT_INITIALIZED, "Server not initialized"));
        }

        let response = match &request.method {
            Method::Initialize => self.handle_initialize(request),
            Method::Initialized => return self.handle_initialized(request),
            Method::Ping => Response::success(id, json!({})),
            Method::ToolsList => success(
                id,
                &self
                    .registry
                    .list_tools(request.param_str("cursor"), self.page_size),
            ),
            Method::ToolsCall => self.handle_call_tool(request),
            Method::ResourcesList => success(
                id,
                &self
                    .registry
                    .list_resources(request.param_str("cursor"), self.page_size),
            ),
            Method::ResourcesRead => self.handle_read_resource(request),
            Method::ResourceTemplatesList => success(
                id,
                &self
                    .registry
                    .list_resource_templates(request.param_str("cursor"), self.page_size),
            ),
            Method::Other(name) => {
                Response::error(id, METHOD_NOT_FOUND, format!("Unknown method: {name}"))
            }
        };
        Some(response)
    }

    fn handle_initialize(&self, request: &Request) -> Response {
        let id = request.id.clone();
        if self.session.is_initialized() {
            return Response::error(id, ALREADY_INITIALIZED, "Server already initialized");
        }

        let requested = request.param_str("protocolVersion");
        let Some(version) = requested.filter(|version| self.session.supports(version)) else {
            debug!(requested = ?requested, "protocol version rejected");
            return Response::error_with_data(
                id,
                UNSUPPORTED_PROTOCOL_VERSION,
                "Unsupported protocol version",
                Some(json!({
                    "supported": self.session.supported_protocol_versions(),
                    "requested": requested,
                })),
            );
        };

        Response::success(
            id,
            json!({
                "protocolVersion": version,
                "capabilities": capabilities(),
                "serverInfo": {
                    "name": self.name,
                    "version": self.version,
                }
            }),
        )
    }

    fn handle_initialized(&mut self, request: &Request) -> Option<Response> {
        if self.session.is_initialized() {
            return Some(Response::error(
                request.id.clone(),
                ALREADY_INITIALIZED,
                "Server already initialized",
            ));
        }

        self.session.mark_initialized();
        info!(server = %self.name, "session initialized");
        None
    }

    fn handle_call_tool(&self, request: &Request) -> Response {
        let id = request.id.clone();
        let Some(name) = request.param_str("name") else {
            return Response::error(id, INVALID_PARAMS, "tools/call requires a string 'name'");
        };

        let arguments = match request.param("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(arguments)) => arguments.clone(),
            Some(_) => {
                return Response::error(id, INVALID_PARAMS, "tools/call 'arguments' must be an object")
            }
        };

        match self.registry.call_tool(name, &arguments) {
            Ok(result) => success(id, &result),
            Err(err) => Response::error(id, INVALID_REQUEST, err.to_string()),
        }
    }

    fn handle_read_resource(&self, request: &Request) -> Response {
        let id = request.id.clone();
        let Some(uri) = request.param_str("uri") else {
            return Response::error(id, INVALID_PARAMS, "resources/read requires a string 'uri'");
        };

        match self.registry.read_resource(uri) {
            Ok(result) => success(id, &result),
            Err(err) if err.is_not_found() => Response::error_with_data(
                id,
                INVALID_REQUEST,
                "Resource not found",
                Some(json!({ "uri": uri })),
            ),
            Err(err) => Response::error(id, INVALID_REQUEST, err.to_string()),
        }
    }
}

fn capabilities() -> Value {
    json!({
        "logging": {},
        "prompts": { "listChanged": false },
        "resources": { "subscribe": false, "listChanged": false },
        "tools": { "listChanged": false }
    })
}

fn success<T: Serialize>(id: Option<Value>, payload: &T) -> Response {
    match serde_json::to_value(payload) {
        Ok(result) => Response::success(id, result),
        Err(err) => Response::error(id, INTERNAL_ERROR, err.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn write_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    let line = match codec::encode(response) {
        Ok(line) => line,
        Err(err) => codec::encode(&Response::error(
            Some(response.id.clone()),
            INTERNAL_ERROR,
            err.to_string(),
        ))?,
    };
    writeln!(writer, "{line}")?;
    writer.flush()
}
