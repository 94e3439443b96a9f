//! Tool, resource and resource-template registry
//!
//! Entries keep their registration order, which drives both list pagination
//! and template matching. Re-registering a key replaces the entry in place.

pub mod pagination;
pub mod resources;
pub mod templates;
pub mod tools;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{HandlerError, RegistryError, ValidationError};

use pagination::paginate;
use resources::{ResourceBuilder, ResourceDescriptor, ResourceInfo};
use templates::{
    ResourceTemplateBuilder, ResourceTemplateDescriptor, ResourceTemplateInfo, TemplateVariables,
};
use tools::{CallToolResult, ToolArguments, ToolBuilder, ToolDescriptor, ToolInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

impl ReadResourceResult {
    fn single(uri: &str, mime_type: &str, text: String) -> Self {
        Self {
            contents: vec![ResourceContents {
                uri: uri.to_string(),
                mime_type: mime_type.to_string(),
                text,
            }],
        }
    }

    pub fn first_text(&self) -> Option<&str> {
        self.contents.first().map(|content| content.text.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    pub resources: Vec<ResourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourceTemplatesResult {
    pub resource_templates: Vec<ResourceTemplateInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Insertion-ordered entries with a key index for exact lookups.
#[derive(Debug, Clone)]
struct Ordered<T> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for Ordered<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Ordered<T> {
    fn upsert(&mut self, key: &str, entry: T) {
        match self.index.get(key) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).map(|&position| &self.entries[position])
    }

    fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Registry {
    tools: Ordered<ToolDescriptor>,
    resources: Ordered<ResourceDescriptor>,
    templates: Ordered<ResourceTemplateDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tool(&mut self, tool: ToolDescriptor) {
        let name = tool.name().to_string();
        self.tools.upsert(&name, tool);
    }

    pub fn add_resource(&mut self, resource: ResourceDescriptor) {
        let uri = resource.uri().to_string();
        self.resources.upsert(&uri, resource);
    }

    pub fn add_resource_template(&mut self, template: ResourceTemplateDescriptor) {
        let key = template.uri_template().as_str().to_string();
        self.templates.upsert(&key, template);
    }

    /// Validate and store a resource in one step.
    pub fn register_resource<F>(
        &mut self,
        uri: &str,
        name: &str,
        mime_type: &str,
        description: &str,
        handler: F,
    ) -> Result<(), ValidationError>
    where
        F: Fn() -> Result<String, HandlerError> + Send + Sync + 'static,
    {
        let resource = ResourceBuilder::new(uri)
            .name(name)
            .mime_type(mime_type)
            .description(description)
            .handler(handler)
            .build()?;
        self.add_resource(resource);
        Ok(())
    }

    pub fn register_resource_template<F>(
        &mut self,
        uri_template: &str,
        name: &str,
        mime_type: &str,
        description: &str,
        handler: F,
    ) -> Result<(), ValidationError>
    where
        F: Fn(&TemplateVariables) -> Result<String, HandlerError> + Send + Sync + 'static,
    {
        let template = ResourceTemplateBuilder::new(uri_template)
            .name(name)
            .mime_type(mime_type)
            .description(description)
            .handler(handler)
            .build()?;
        self.add_resource_template(template);
        Ok(())
    }

    pub fn register_tool<F>(
        &mut self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: F,
    ) -> Result<(), ValidationError>
    where
        F: Fn(&ToolArguments) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let tool = ToolBuilder::new(name)
            .description(description)
            .input_schema(input_schema)
            .handler(handler)
            .build()?;
        self.add_tool(tool);
        Ok(())
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn resource_template_count(&self) -> usize {
        self.templates.len()
    }

    /// First template, in registration order, whose segments match `uri`.
    pub fn match_template(
        &self,
        uri: &str,
    ) -> Option<(&ResourceTemplateDescriptor, TemplateVariables)> {
        self.templates.iter().find_map(|template| {
            template
                .uri_template()
                .match_uri(uri)
                .map(|variables| (template, variables))
        })
    }

    pub fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, RegistryError> {
        if let Some(resource) = self.resources.get(uri) {
            let text = resource
                .handler()
                .read()
                .map_err(|err| RegistryError::ResourceHandler {
                    uri: uri.to_string(),
                    message: err.to_string(),
                })?;
            return Ok(ReadResourceResult::single(uri, resource.mime_type(), text));
        }

        if let Some((template, variables)) = self.match_template(uri) {
            let text =
                template
                    .handler()
                    .read(&variables)
                    .map_err(|err| RegistryError::TemplateHandler {
                        uri: uri.to_string(),
                        message: err.to_string(),
                    })?;
            return Ok(ReadResourceResult::single(uri, template.mime_type(), text));
        }

        Err(RegistryError::ResourceNotFound {
            uri: uri.to_string(),
        })
    }

    pub fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
    ) -> Result<CallToolResult, RegistryError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RegistryError::ToolNotFound {
                name: name.to_string(),
            })?;
        tool.invoke(arguments)
    }

    pub fn list_tools(&self, cursor: Option<&str>, page_size: Option<usize>) -> ListToolsResult {
        let page = paginate(self.tools.iter().map(ToolDescriptor::info), cursor, page_size);
        ListToolsResult {
            tools: page.items,
            next_cursor: page.next_cursor,
        }
    }

    pub fn list_resources(
        &self,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> ListResourcesResult {
        let page = paginate(
            self.resources.iter().map(ResourceDescriptor::info),
            cursor,
            page_size,
        );
        ListResourcesResult {
            resources: page.items,
            next_cursor: page.next_cursor,
        }
    }

    pub fn list_resource_templates(
        &self,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> ListResourceTemplatesResult {
        let page = paginate(
            self.templates.iter().map(ResourceTemplateDescriptor::info),
            cursor,
            page_size,
        );
        ListResourceTemplatesResult {
            resource_templates: page.items,
            next_cursor: page.next_cursor,
        }
    }
}
