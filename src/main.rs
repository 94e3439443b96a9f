use serde_json::{json, Value};
use stdio_mcp::{
    config::ServerConfig, logging, ResourceBuilder, ResourceTemplateBuilder, Server, ToolBuilder,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = ServerConfig::from_env()?;
    let mut server = Server::from_config(&config);

    server
        .resource(
            ResourceBuilder::new("/status")
                .name("status")
                .description("Liveness of this server")
                .handler(|| Ok("ok".to_string())),
        )?
        .resource_template(
            ResourceTemplateBuilder::new("/echo/{message}")
                .name("echo")
                .description("Returns the message segment of the URI")
                .handler(|variables| {
                    Ok(variables.get("message").cloned().unwrap_or_default())
                }),
        )?
        .tool(
            ToolBuilder::new("echo")
                .description("Echo the given text back")
                .input_schema(json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }))
                .handler(|arguments| {
                    let text = arguments
                        .get("text")
                        .and_then(Value::as_str)
                        .ok_or("text must be a string")?;
                    Ok(Value::String(text.to_string()))
                }),
        )?;

    server.run()?;
    Ok(())
}
