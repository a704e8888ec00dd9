//! Stub tool server speaking MCP over stdio.
//!
//! Logs go to stderr; stdout carries the protocol.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;

use toolhub_mcp::{McpServer, PromptEntry, ResourceEntry, StdioTransport};
use toolhub_tool_runtime::tool::EchoTool;
use toolhub_tool_runtime::{Tool, ToolContext, ToolDefinition, ToolError, ToolRegistry, ToolResult};

#[derive(Parser, Debug)]
#[command(name = "toolhub-echo-server", about = "Stub MCP server for testing")]
struct Args {
    /// Server name, reported by `whoami` and in the handshake
    #[arg(long, default_value = "echo")]
    name: String,
}

struct WhoAmI {
    name: String,
}

#[async_trait]
impl Tool for WhoAmI {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "whoami".to_string(),
            description: "Returns the name of this server.".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        Ok(ToolResult {
            tool_call_id: ctx.call_id.clone(),
            content: self.name.clone(),
            is_error: false,
        })
    }
}

struct Fail;

#[async_trait]
impl Tool for Fail {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "fail".to_string(),
            description: "Always fails.".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed("deliberate failure".to_string()))
    }
}

/// Exits the process mid-request.
struct Crash;

#[async_trait]
impl Tool for Crash {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "crash".to_string(),
            description: "Terminates the server without replying.".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        std::process::exit(3)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut registry = ToolRegistry::new();
    registry.register(EchoTool)?;
    registry.register(WhoAmI {
        name: args.name.clone(),
    })?;
    registry.register(Fail)?;
    registry.register(Crash)?;

    let server_name = args.name.clone();
    let mut server = McpServer::new(registry)
        .with_name(args.name.clone())
        .with_resource(
            ResourceEntry::new("server://info", "info", move |_, _| {
                Ok(format!("{server_name} stub server"))
            })?
            .with_description("Name of this server"),
        )
        .with_resource(
            ResourceEntry::new("greeting://{name}", "greeting", |_, bindings| {
                Ok(format!("Hello, {}!", bindings.get("name").map_or("stranger", String::as_str)))
            })?
            .with_description("A greeting for the given name"),
        )
        .with_prompt(
            PromptEntry::new("greet", |args| {
                Ok(format!(
                    "Write a short greeting for {}.",
                    args.get("name").map_or("someone", String::as_str)
                ))
            })
            .with_description("Greeting prompt")
            .with_argument("name", true),
        );

    let mut transport = StdioTransport::new();
    server.run(&mut transport).await?;
    Ok(())
}
