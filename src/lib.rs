pub mod config;
pub mod errors;
pub mod logging;
pub mod mcp;
pub mod registry;

pub use config::{ConfigError, ServerConfig};
pub use errors::{ClientError, HandlerError, RegistryError, ValidationError};
pub use mcp::client::Client;
pub use mcp::server::{Server, PROTOCOL_VERSION};
pub use registry::{
    resources::ResourceBuilder, templates::ResourceTemplateBuilder, tools::ToolBuilder, Registry,
};
