//! Callable tools and their results

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::{HandlerError, RegistryError, ValidationError};

pub type ToolArguments = Map<String, Value>;

/// Invoked with the `arguments` object of a `tools/call` request.
pub trait ToolHandler: Send + Sync {
    fn call(&self, arguments: &ToolArguments) -> Result<Value, HandlerError>;
}

impl<F> ToolHandler for F
where
    F: Fn(&ToolArguments) -> Result<Value, HandlerError> + Send + Sync,
{
    fn call(&self, arguments: &ToolArguments) -> Result<Value, HandlerError> {
        self(arguments)
    }
}

#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    input_schema: Value,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Check `arguments` against the schema's `required` list, then run the handler.
    pub fn invoke(&self, arguments: &ToolArguments) -> Result<CallToolResult, RegistryError> {
        let missing: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|key| !arguments.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(RegistryError::InvalidArguments {
                name: self.name.clone(),
                reason: format!("missing required arguments: {}", missing.join(", ")),
            });
        }

        self.handler
            .call(arguments)
            .map(CallToolResult::from_output)
            .map_err(|err| RegistryError::ToolHandler {
                name: self.name.clone(),
                message: err.to_string(),
            })
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

/// Public shape of a tool in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Strings become a single text item; objects are also kept as structured content.
    pub fn from_output(output: Value) -> Self {
        match output {
            Value::String(text) => Self {
                content: vec![Content::Text { text }],
                structured_content: None,
                is_error: false,
            },
            Value::Object(_) => Self {
                content: vec![Content::Text {
                    text: output.to_string(),
                }],
                structured_content: Some(output),
                is_error: false,
            },
            other => Self {
                content: vec![Content::Text {
                    text: other.to_string(),
                }],
                structured_content: None,
                is_error: false,
            },
        }
    }

    pub fn first_text(&self) -> Option<&str> {
        self.content.first().and_then(|content| match content {
            Content::Text { text } => Some(text.as_str()),
            Content::Unsupported => None,
        })
    }
}

pub fn default_input_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub struct ToolBuilder {
    name: String,
    description: String,
    input_schema: Value,
    handler: Option<Arc<dyn ToolHandler>>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: default_input_schema(),
            handler: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn handler<F>(self, handler: F) -> Self
    where
        F: Fn(&ToolArguments) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.with_handler(handler)
    }

    pub fn with_handler(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<ToolDescriptor, ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::empty("tool", "name"));
        }
        let Some(handler) = self.handler else {
            return Err(ValidationError::missing_handler("tool", self.name));
        };
        let is_object_schema = self
            .input_schema
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind == "object");
        if !is_object_schema {
            return Err(ValidationError::InvalidInputSchema { name: self.name });
        }

        Ok(ToolDescriptor {
            name: self.name,
            description: self.description,
            input_schema: self.input_schema,
            handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greet_tool() -> ToolDescriptor {
        ToolBuilder::new("greet")
            .description("Say hello")
            .input_schema(json!({
                "type": "object",
                "properties": { "name": { "type": "string" } },
                "required": ["name"]
            }))
            .handler(|args: &ToolArguments| {
                let name = args
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or("name must be a string")?;
                Ok(Value::from(format!("Hello, {name}!")))
            })
            .build()
            .expect("valid tool")
    }

    #[test]
    fn invoke_wraps_text_output() {
        let args = json!({ "name": "Ada" }).as_object().cloned().expect("object");
        let result = greet_tool().invoke(&args).expect("call");

        assert_eq!(result.first_text(), Some("Hello, Ada!"));
        assert_eq!(
            serde_json::to_value(&result).expect("serialize"),
            json!({
                "content": [{ "type": "text", "text": "Hello, Ada!" }],
                "isError": false
            })
        );
    }

    #[test]
    fn missing_required_argument_is_bad_arguments() {
        let error = greet_tool()
            .invoke(&ToolArguments::new())
            .expect_err("missing name");
        assert!(matches!(error, RegistryError::InvalidArguments { .. }));
        assert!(error.to_string().contains("name"));
    }

    #[test]
    fn handler_failure_carries_message() {
        let args = json!({ "name": 5 }).as_object().cloned().expect("object");
        let error = greet_tool().invoke(&args).expect_err("bad type");
        assert_eq!(
            error.to_string(),
            "error calling tool 'greet': name must be a string"
        );
    }

    #[test]
    fn object_output_is_kept_as_structured_content() {
        let result = CallToolResult::from_output(json!({ "sum": 3 }));
        assert_eq!(result.structured_content, Some(json!({ "sum": 3 })));
        assert_eq!(result.first_text(), Some(r#"{"sum":3}"#));
    }

    #[test]
    fn schema_must_describe_an_object() {
        let error = ToolBuilder::new("bad")
            .input_schema(json!({ "type": "string" }))
            .handler(|_args: &ToolArguments| Ok(Value::Null))
            .build()
            .expect_err("non-object schema");
        assert!(matches!(error, ValidationError::InvalidInputSchema { .. }));
    }

    #[test]
    fn name_and_handler_are_required() {
        let error = ToolBuilder::new("")
            .handler(|_args: &ToolArguments| Ok(Value::Null))
            .build()
            .expect_err("empty name");
        assert_eq!(error, ValidationError::empty("tool", "name"));

        let error = ToolBuilder::new("noop").build().expect_err("no handler");
        assert!(matches!(error, ValidationError::MissingHandler { .. }));
    }

    #[test]
    fn unknown_content_types_deserialize() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{ "type": "image", "data": "...", "mimeType": "image/png" }]
        }))
        .expect("deserialize");
        assert_eq!(result.content, vec![Content::Unsupported]);
        assert_eq!(result.first_text(), None);
    }
}
