mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use toolhub_mcp::{ToolSet, UriPattern};

use crate::cli::{CliArgs, Command};
use crate::config::HubConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = CliArgs::parse();

    let mut config = HubConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(secs) = args.connect_timeout_secs {
        config.connect_timeout_secs = secs;
    }
    if let Some(secs) = args.request_timeout_secs {
        config.request_timeout_secs = secs;
    }
    config.prefix_tools |= args.prefix_tools;

    let descriptors = config.descriptors().context("invalid server configuration")?;
    if descriptors.is_empty() {
        warn!("No servers configured");
    }

    let tools = ToolSet::build(descriptors, config.build_options())
        .await
        .context("failed to connect to servers")?;
    info!(operations = tools.len(), "Tool set built");

    let outcome = run_command(&tools, args.command, &config).await;

    for (server, error) in tools.close().await {
        warn!(server = %server, error = %error, "Server did not close cleanly");
    }

    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_command(tools: &ToolSet, command: Command, config: &HubConfig) -> Result<Value> {
    match command {
        Command::Servers => Ok(Value::Array(
            tools
                .servers()
                .filter_map(|name| tools.session(name))
                .map(|session| {
                    let remote = session.server_info();
                    json!({
                        "name": session.name(),
                        "transport": session.descriptor().kind(),
                        "server_name": remote.map(|r| r.server_info.name.clone()),
                        "protocol_version": remote.map(|r| r.protocol_version.clone()),
                    })
                })
                .collect(),
        )),
        Command::Tools { openai } => Ok(Value::Array(
            tools
                .operations()
                .iter()
                .map(|op| {
                    if openai {
                        op.definition().to_openai_function()
                    } else {
                        json!({
                            "name": op.name,
                            "server": op.server,
                            "description": op.description,
                            "input_schema": op.input_schema,
                        })
                    }
                })
                .collect(),
        )),
        Command::Resources => Ok(Value::Array(
            tools
                .resources()
                .iter()
                .map(|r| {
                    json!({
                        "uri": r.uri_pattern.as_str(),
                        "template": !r.uri_pattern.is_concrete(),
                        "name": r.name,
                        "server": r.server,
                        "description": r.description,
                        "mime_type": r.mime_type,
                    })
                })
                .collect(),
        )),
        Command::Prompts => Ok(Value::Array(
            tools
                .prompts()
                .iter()
                .map(|p| {
                    json!({
                        "name": p.name,
                        "server": p.server,
                        "description": p.description,
                        "arguments": p.arguments,
                    })
                })
                .collect(),
        )),
        Command::Call { name, args } => {
            let result = tools
                .route_with_timeout(
                    &name,
                    args,
                    Duration::from_secs(config.request_timeout_secs),
                )
                .await
                .with_context(|| format!("call to '{name}' failed"))?;
            Ok(serde_json::to_value(result)?)
        }
        Command::Read { uri, bindings } => {
            let pattern = UriPattern::parse(&uri)?;
            let bindings: HashMap<String, String> = bindings.into_iter().collect();
            let result = tools
                .read_resource(&pattern, &bindings)
                .await
                .with_context(|| format!("failed to read '{uri}'"))?;
            Ok(serde_json::to_value(result)?)
        }
        Command::Prompt { name, arguments } => {
            let result = tools
                .get_prompt(&name, arguments.into_iter().collect())
                .await
                .with_context(|| format!("failed to render prompt '{name}'"))?;
            Ok(serde_json::to_value(result)?)
        }
    }
}
