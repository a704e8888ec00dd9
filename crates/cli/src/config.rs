use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use toolhub_mcp::{BuildOptions, ServerDescriptor, ServerEntry, ServersConfig, ToolNaming};

/// Hub configuration loaded from a TOML or JSON file.
///
/// ```toml
/// connect_timeout_secs = 30
///
/// [servers.notion]
/// transport = "stdio"
/// command = "npx"
/// args = ["-y", "@notionhq/notion-mcp-server"]
/// env = { NOTION_TOKEN = "${NOTION_TOKEN}" }
///
/// [servers.db]
/// transport = "streamable_http"
/// url = "http://localhost:8000/mcp"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfig {
    /// Servers in file order. JSON files may call this `mcpServers`.
    #[serde(default, alias = "mcpServers")]
    pub servers: IndexMap<String, ServerEntry>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Expose operations as `server.name`
    #[serde(default)]
    pub prefix_tools: bool,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

impl HubConfig {
    /// Return the default config directory path: ~/.config/toolhub/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("toolhub");
        Ok(config_dir)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("servers.toml"))
    }

    /// Load config from the given path, or the default path.
    ///
    /// A missing default file yields an empty config; a missing explicit
    /// path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    bail!("config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default = Self::default_config_path()?;
                if !default.exists() {
                    debug!(?default, "Config file not found, using defaults");
                    return Ok(Self::default_with_timeouts());
                }
                default
            }
        };

        debug!(?config_path, "Loading config");
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read config: {}", config_path.display()))?;
        Self::parse(&content, &config_path)
            .with_context(|| format!("failed to parse config: {}", config_path.display()))
    }

    /// Parse by file extension: `.json` is JSON, anything else TOML.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(content)?)
        } else {
            Ok(toml::from_str(content)?)
        }
    }

    fn default_with_timeouts() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            ..Self::default()
        }
    }

    /// Descriptors in file order with `${VAR}` references expanded.
    pub fn descriptors(&self) -> Result<Vec<ServerDescriptor>> {
        let servers = ServersConfig {
            servers: self.servers.clone(),
        };
        Ok(servers.descriptors()?)
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_naming(if self.prefix_tools {
                ToolNaming::ServerPrefixed
            } else {
                ToolNaming::Plain
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use toolhub_mcp::TransportSpec;

    #[test]
    fn test_parse_toml() {
        let config = HubConfig::parse(
            r#"
request_timeout_secs = 5

[servers.notion]
transport = "stdio"
command = "npx"
args = ["-y", "@notionhq/notion-mcp-server"]

[servers.db]
transport = "streamable_http"
url = "http://localhost:8000/mcp"
"#,
            Path::new("servers.toml"),
        )
        .unwrap();

        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.request_timeout_secs, 5);
        let names: Vec<_> = config.servers.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["notion", "db"]);

        let options = config.build_options();
        assert_eq!(options.request_timeout, Duration::from_secs(5));
        assert_eq!(options.naming, ToolNaming::Plain);
    }

    #[test]
    fn test_parse_json_mcp_servers() {
        let config = HubConfig::parse(
            r#"{"mcpServers": {"fs": {"command": "mcp-fs", "args": ["/tmp"]}}, "prefix_tools": true}"#,
            Path::new("claude.json"),
        )
        .unwrap();
        let descriptors = config.descriptors().unwrap();
        assert_eq!(descriptors.len(), 1);
        assert!(matches!(
            &descriptors[0].transport,
            TransportSpec::Subprocess { command, .. } if command == "mcp-fs"
        ));
        assert_eq!(config.build_options().naming, ToolNaming::ServerPrefixed);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[servers.echo]\ncommand = \"toolhub-echo-server\"").unwrap();

        let config = HubConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.servers.len(), 1);
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = HubConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_invalid_entry_is_reported() {
        let config = HubConfig::parse(
            "[servers.broken]\ntransport = \"stdio\"\n",
            Path::new("servers.toml"),
        )
        .unwrap();
        assert!(config.descriptors().is_err());
    }
}
