use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

/// Inspect and call tools across MCP servers.
///
/// Connects to every server in the config file, merges their operations
/// into one namespace and prints results as JSON.
#[derive(Parser, Debug)]
#[command(name = "toolhub", about = "Inspect and call tools across MCP servers")]
pub struct CliArgs {
    /// Path to config file (default: ~/.config/toolhub/servers.toml)
    #[arg(long, env = "TOOLHUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds allowed for launching a server and its handshake
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// Seconds allowed for each request
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Expose operations as `server.name`
    #[arg(long)]
    pub prefix_tools: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List connected servers
    Servers,
    /// List aggregated operations
    Tools {
        /// Print OpenAI-style function definitions instead
        #[arg(long)]
        openai: bool,
    },
    /// List resources and resource templates
    Resources,
    /// List prompts
    Prompts,
    /// Invoke an operation
    Call {
        name: String,
        /// JSON object of arguments
        #[arg(long, default_value = "{}", value_parser = parse_json_object)]
        args: Value,
    },
    /// Read a resource, expanding `{placeholders}` from --bind
    Read {
        uri: String,
        #[arg(long = "bind", value_parser = parse_key_value)]
        bindings: Vec<(String, String)>,
    },
    /// Render a prompt
    Prompt {
        name: String,
        #[arg(long = "arg", value_parser = parse_key_value)]
        arguments: Vec<(String, String)>,
    },
}

fn parse_json_object(raw: &str) -> Result<Value, String> {
    match serde_json::from_str(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read_bindings() {
        let args = CliArgs::try_parse_from([
            "toolhub",
            "read",
            "table://{table_name}",
            "--bind",
            "table_name=Album",
        ])
        .unwrap();
        match args.command {
            Command::Read { uri, bindings } => {
                assert_eq!(uri, "table://{table_name}");
                assert_eq!(bindings, vec![("table_name".to_string(), "Album".to_string())]);
            }
            other => panic!("expected read, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_call_defaults() {
        let args = CliArgs::try_parse_from(["toolhub", "--prefix-tools", "call", "echo"]).unwrap();
        assert!(args.prefix_tools);
        assert!(matches!(args.command, Command::Call { ref args, .. } if *args == serde_json::json!({})));
    }

    #[test]
    fn test_call_args_must_be_an_object() {
        let args = CliArgs::try_parse_from(["toolhub", "call", "echo", "--args", r#"{"text": "hi"}"#])
            .unwrap();
        assert!(matches!(args.command, Command::Call { ref args, .. } if args["text"] == "hi"));

        for bad in ["[1,2]", r#""x""#, "42", "{not json"] {
            assert!(
                CliArgs::try_parse_from(["toolhub", "call", "echo", "--args", bad]).is_err(),
                "{bad} accepted"
            );
        }
    }
}
