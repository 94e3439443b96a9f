//! Static resources addressed by exact URI

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::errors::{HandlerError, ValidationError};

pub const DEFAULT_MIME_TYPE: &str = "text/plain";

/// Produces the text of a resource on every read.
pub trait ResourceHandler: Send + Sync {
    fn read(&self) -> Result<String, HandlerError>;
}

impl<F> ResourceHandler for F
where
    F: Fn() -> Result<String, HandlerError> + Send + Sync,
{
    fn read(&self) -> Result<String, HandlerError> {
        self()
    }
}

#[derive(Clone)]
pub struct ResourceDescriptor {
    uri: String,
    name: String,
    description: String,
    mime_type: String,
    handler: Arc<dyn ResourceHandler>,
}

impl ResourceDescriptor {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn handler(&self) -> &dyn ResourceHandler {
        self.handler.as_ref()
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            uri: self.uri.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

impl fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// Public shape of a resource in `resources/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
}

pub struct ResourceBuilder {
    uri: String,
    name: String,
    description: String,
    mime_type: String,
    handler: Option<Arc<dyn ResourceHandler>>,
}

impl ResourceBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: String::new(),
            description: String::new(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            handler: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn handler<F>(self, handler: F) -> Self
    where
        F: Fn() -> Result<String, HandlerError> + Send + Sync + 'static,
    {
        self.with_handler(handler)
    }

    pub fn with_handler(mut self, handler: impl ResourceHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<ResourceDescriptor, ValidationError> {
        if self.uri.is_empty() {
            return Err(ValidationError::empty("resource", "uri"));
        }
        let Some(handler) = self.handler else {
            return Err(ValidationError::missing_handler("resource", self.uri));
        };
        if self.name.is_empty() {
            return Err(ValidationError::empty("resource", "name"));
        }

        Ok(ResourceDescriptor {
            uri: self.uri,
            name: self.name,
            description: self.description,
            mime_type: self.mime_type,
            handler,
        })
    }
}
