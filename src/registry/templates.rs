//! URI templates with `{name}` path segments
//!
//! Matching is purely segment based: a candidate URI and a template are split
//! on `/`, must have the same number of segments, and every literal segment
//! must be equal. Variable segments bind whatever the candidate holds there.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock},
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{HandlerError, ValidationError};
use crate::registry::resources::DEFAULT_MIME_TYPE;

pub type TemplateVariables = HashMap<String, String>;

/// Produces resource text from the variables bound by a template match.
pub trait TemplateHandler: Send + Sync {
    fn read(&self, variables: &TemplateVariables) -> Result<String, HandlerError>;
}

impl<F> TemplateHandler for F
where
    F: Fn(&TemplateVariables) -> Result<String, HandlerError> + Send + Sync,
{
    fn read(&self, variables: &TemplateVariables) -> Result<String, HandlerError> {
        self(variables)
    }
}

fn variable_segment() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\{([^{}/]+)\}$").expect("variable segment pattern")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::empty("resource template", "uri template"));
        }

        let segments = raw
            .split('/')
            .map(|part| match variable_segment().captures(part) {
                Some(captures) => Segment::Variable(captures[1].to_string()),
                None => Segment::Literal(part.to_string()),
            })
            .collect();

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Bind this template against `uri`, or `None` when it does not match.
    pub fn match_uri(&self, uri: &str) -> Option<TemplateVariables> {
        let parts: Vec<&str> = uri.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut variables = TemplateVariables::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal != part => return None,
                Segment::Literal(_) => {}
                Segment::Variable(name) => {
                    variables.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(variables)
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Clone)]
pub struct ResourceTemplateDescriptor {
    template: UriTemplate,
    name: String,
    description: String,
    mime_type: String,
    handler: Arc<dyn TemplateHandler>,
}

impl ResourceTemplateDescriptor {
    pub fn uri_template(&self) -> &UriTemplate {
        &self.template
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn handler(&self) -> &dyn TemplateHandler {
        self.handler.as_ref()
    }

    pub fn info(&self) -> ResourceTemplateInfo {
        ResourceTemplateInfo {
            uri_template: self.template.as_str().to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

impl fmt::Debug for ResourceTemplateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTemplateDescriptor")
            .field("uri_template", &self.template.raw)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateInfo {
    pub uri_template: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
}

pub struct ResourceTemplateBuilder {
    uri_template: String,
    name: String,
    description: String,
    mime_type: String,
    handler: Option<Arc<dyn TemplateHandler>>,
}

impl ResourceTemplateBuilder {
    pub fn new(uri_template: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
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
        F: Fn(&TemplateVariables) -> Result<String, HandlerError> + Send + Sync + 'static,
    {
        self.with_handler(handler)
    }

    pub fn with_handler(mut self, handler: impl TemplateHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<ResourceTemplateDescriptor, ValidationError> {
        let template = UriTemplate::parse(&self.uri_template)?;
        let Some(handler) = self.handler else {
            return Err(ValidationError::missing_handler(
                "resource template",
                self.uri_template,
            ));
        };
        if self.name.is_empty() {
            return Err(ValidationError::empty("resource template", "name"));
        }

        Ok(ResourceTemplateDescriptor {
            template,
            name: self.name,
            description: self.description,
            mime_type: self.mime_type,
            handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> TemplateVariables {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn binds_every_variable_segment() {
        let template = UriTemplate::parse("/a/{x}/{y}").expect("template");
        assert_eq!(
            template.match_uri("/a/1/2"),
            Some(vars(&[("x", "1"), ("y", "2")]))
        );
        assert_eq!(template.variable_names().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn segment_count_must_match() {
        let template = UriTemplate::parse("/a/{x}/{y}").expect("template");
        assert_eq!(template.match_uri("/a/1"), None);
        assert_eq!(template.match_uri("/a/1/2/3"), None);
    }

    #[test]
    fn literal_segments_must_match_exactly() {
        let template = UriTemplate::parse("/users/{id}/profile").expect("template");
        assert!(template.match_uri("/users/42/profile").is_some());
        assert_eq!(template.match_uri("/users/42/Profile"), None);
        assert_eq!(template.match_uri("/groups/42/profile"), None);
    }

    #[test]
    fn partial_braces_are_literal() {
        let template = UriTemplate::parse("/files/{name}.txt").expect("template");
        assert_eq!(template.variable_names().count(), 0);
        assert!(template.match_uri("/files/{name}.txt").is_some());
        assert_eq!(template.match_uri("/files/report.txt"), None);
    }

    #[test]
    fn variables_bind_empty_segments() {
        let template = UriTemplate::parse("/a/{x}").expect("template");
        assert_eq!(template.match_uri("/a/"), Some(vars(&[("x", "")])));
    }

    #[test]
    fn any_braced_segment_is_a_variable() {
        let template = UriTemplate::parse("/users/{user.id}").expect("template");
        assert_eq!(
            template.match_uri("/users/42"),
            Some(vars(&[("user.id", "42")]))
        );

        let template = UriTemplate::parse("/v/{1}").expect("template");
        assert_eq!(template.match_uri("/v/x"), Some(vars(&[("1", "x")])));
    }

    #[test]
    fn repeated_variable_keeps_last_binding() {
        let template = UriTemplate::parse("/a/{x}/{x}").expect("template");
        assert_eq!(template.match_uri("/a/1/2"), Some(vars(&[("x", "2")])));
    }

    #[test]
    fn empty_braces_are_literal() {
        let template = UriTemplate::parse("/a/{}").expect("template");
        assert_eq!(template.variable_names().count(), 0);
        assert_eq!(template.match_uri("/a/x"), None);
    }

    #[test]
    fn builder_validates_handler_and_name() {
        let error = ResourceTemplateBuilder::new("/a/{x}")
            .name("a")
            .build()
            .expect_err("no handler");
        assert!(matches!(error, ValidationError::MissingHandler { .. }));

        let error = ResourceTemplateBuilder::new("/a/{x}")
            .handler(|_vars: &TemplateVariables| Ok(String::new()))
            .build()
            .expect_err("no name");
        assert_eq!(error, ValidationError::empty("resource template", "name"));

        let error = ResourceTemplateBuilder::new("")
            .name("a")
            .handler(|_vars: &TemplateVariables| Ok(String::new()))
            .build()
            .expect_err("empty template");
        assert!(matches!(error, ValidationError::EmptyField { .. }));
    }

    #[test]
    fn handler_receives_bound_variables() {
        let descriptor = ResourceTemplateBuilder::new("/test/{param1}/{param2}")
            .name("test_template")
            .handler(|vars: &TemplateVariables| {
                Ok(format!("{}, {}", vars["param1"], vars["param2"]))
            })
            .build()
            .expect("valid template");

        let bound = descriptor
            .uri_template()
            .match_uri("/test/value1/value2")
            .expect("match");
        assert_eq!(
            descriptor.handler().read(&bound).expect("read"),
            "value1, value2"
        );
    }
}
