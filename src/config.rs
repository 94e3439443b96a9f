use std::env;

use thiserror::Error;

use crate::mcp::server::PROTOCOL_VERSION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub protocol_versions: Vec<String>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MCP_SERVER_NAME must not be empty")]
    EmptyName,
    #[error("MCP_PROTOCOL_VERSIONS must list at least one version")]
    NoProtocolVersions,
    #[error("MCP_PAGE_SIZE must be a positive integer")]
    InvalidPageSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_versions: vec![PROTOCOL_VERSION.to_string()],
            page_size: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let name = match lookup("MCP_SERVER_NAME") {
            Some(value) => Some(value.trim().to_string())
                .filter(|name| !name.is_empty())
                .ok_or(ConfigError::EmptyName)?,
            None => defaults.name,
        };

        let version = lookup("MCP_SERVER_VERSION")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.version);

        let protocol_versions = match lookup("MCP_PROTOCOL_VERSIONS") {
            Some(value) => {
                let versions = value
                    .split(',')
                    .map(str::trim)
                    .filter(|version| !version.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                if versions.is_empty() {
                    return Err(ConfigError::NoProtocolVersions);
                }
                versions
            }
            None => defaults.protocol_versions,
        };

        let page_size = lookup("MCP_PAGE_SIZE")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| {
                value
                    .parse::<usize>()
                    .ok()
                    .filter(|size| *size > 0)
                    .ok_or(ConfigError::InvalidPageSize)
            })
            .transpose()?;

        Ok(Self {
            name,
            version,
            protocol_versions,
            page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn parse_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).expect("config should parse");
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.protocol_versions, vec![PROTOCOL_VERSION.to_string()]);
        assert_eq!(config.page_size, None);
    }

    #[test]
    fn parses_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("MCP_SERVER_NAME", " notes "),
            ("MCP_SERVER_VERSION", "2.1.0"),
            ("MCP_PROTOCOL_VERSIONS", "2025-03-26, 2024-11-05,"),
            ("MCP_PAGE_SIZE", "25"),
        ]))
        .expect("config should parse");

        assert_eq!(config.name, "notes");
        assert_eq!(config.version, "2.1.0");
        assert_eq!(config.protocol_versions, vec!["2025-03-26", "2024-11-05"]);
        assert_eq!(config.page_size, Some(25));
    }

    #[test]
    fn zero_page_size_fails() {
        let err = ServerConfig::from_lookup(lookup(&[("MCP_PAGE_SIZE", "0")]))
            .expect_err("expected invalid page size");
        assert_eq!(err, ConfigError::InvalidPageSize);

        let err = ServerConfig::from_lookup(lookup(&[("MCP_PAGE_SIZE", "ten")]))
            .expect_err("expected invalid page size");
        assert_eq!(err, ConfigError::InvalidPageSize);
    }

    #[test]
    fn empty_name_and_versions_fail() {
        let err = ServerConfig::from_lookup(lookup(&[("MCP_SERVER_NAME", "  ")]))
            .expect_err("expected empty name error");
        assert_eq!(err, ConfigError::EmptyName);

        let err = ServerConfig::from_lookup(lookup(&[("MCP_PROTOCOL_VERSIONS", " , ")]))
            .expect_err("expected missing versions");
        assert_eq!(err, ConfigError::NoProtocolVersions);
    }
}
