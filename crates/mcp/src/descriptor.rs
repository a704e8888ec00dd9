//! Server descriptors: how to reach one tool server.
//!
//! A descriptor is immutable once built. Config files carry a `servers`
//! map (JSON configs often call it `mcpServers`) whose entries are
//! converted with [`ServersConfig::descriptors`], expanding `${VAR}`
//! references against the process environment.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::McpError;

/// How to reach one tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerDescriptor {
    /// Unique, human-readable server name
    pub name: String,
    pub transport: TransportSpec,
}

/// The channel a server is reached over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport")]
pub enum TransportSpec {
    /// A local child process speaking newline-delimited JSON on stdio.
    #[serde(rename = "stdio", alias = "subprocess")]
    Subprocess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: IndexMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// A remote server speaking streamable HTTP.
    #[serde(rename = "streamable_http", alias = "http", alias = "network")]
    Network {
        url: String,
        #[serde(default)]
        headers: IndexMap<String, String>,
    },
}

impl ServerDescriptor {
    pub fn subprocess<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            transport: TransportSpec::Subprocess {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: IndexMap::new(),
                cwd: None,
            },
        }
    }

    pub fn network(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportSpec::Network {
                url: url.into(),
                headers: IndexMap::new(),
            },
        }
    }

    /// Add an environment variable (subprocess) or header (network).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportSpec::Subprocess { env, .. } => {
                env.insert(key.into(), value.into());
            }
            TransportSpec::Network { headers, .. } => {
                headers.insert(key.into(), value.into());
            }
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self.transport {
            TransportSpec::Subprocess { .. } => "stdio",
            TransportSpec::Network { .. } => "streamable_http",
        }
    }

    pub fn validate(&self) -> Result<(), McpError> {
        let invalid = |reason: &str| McpError::InvalidDescriptor {
            server: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("server name is empty"));
        }
        match &self.transport {
            TransportSpec::Subprocess { command, .. } => {
                if command.trim().is_empty() {
                    return Err(invalid("command is empty"));
                }
            }
            TransportSpec::Network { .. } => {
                self.network_url()?;
            }
        }
        Ok(())
    }

    /// Parsed URL of a network server.
    pub fn network_url(&self) -> Result<Url, McpError> {
        let invalid = |reason: String| McpError::InvalidDescriptor {
            server: self.name.clone(),
            reason,
        };
        let TransportSpec::Network { url, .. } = &self.transport else {
            return Err(invalid("not a network server".to_string()));
        };
        let parsed = Url::parse(url).map_err(|e| invalid(format!("bad url '{url}': {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            other => Err(invalid(format!("unsupported url scheme '{other}'"))),
        }
    }
}

// ── Config file shape ───────────────────────────────────────────────

/// The `servers` section of a config file, in file order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServersConfig {
    #[serde(default, alias = "mcpServers")]
    pub servers: IndexMap<String, ServerEntry>,
}

/// One config entry. `transport` may be omitted when `command` or `url`
/// makes the kind obvious.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerEntry {
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

impl ServersConfig {
    /// Descriptors in file order, expanded against the process environment.
    pub fn descriptors(&self) -> Result<Vec<ServerDescriptor>, McpError> {
        self.descriptors_with(|key| std::env::var(key).ok())
    }

    pub fn descriptors_with<F>(&self, lookup: F) -> Result<Vec<ServerDescriptor>, McpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.servers
            .iter()
            .map(|(name, entry)| entry.to_descriptor(name, &lookup))
            .collect()
    }
}

impl ServerEntry {
    pub fn to_descriptor<F>(&self, name: &str, lookup: &F) -> Result<ServerDescriptor, McpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let invalid = |reason: String| McpError::InvalidDescriptor {
            server: name.to_string(),
            reason,
        };
        let expand_map = |map: &IndexMap<String, String>| {
            map.iter()
                .map(|(k, v)| (k.clone(), expand_env_vars(v, lookup)))
                .collect::<IndexMap<_, _>>()
        };

        let kind = match self.transport.as_deref() {
            Some(tag) => tag.to_ascii_lowercase(),
            None if self.command.is_some() => "stdio".to_string(),
            None if self.url.is_some() => "streamable_http".to_string(),
            None => return Err(invalid("needs a transport, command or url".to_string())),
        };

        let transport = match kind.as_str() {
            "stdio" | "subprocess" => TransportSpec::Subprocess {
                command: self
                    .command
                    .clone()
                    .ok_or_else(|| invalid("stdio server needs a command".to_string()))?,
                args: self.args.iter().map(|a| expand_env_vars(a, lookup)).collect(),
                env: expand_map(&self.env),
                cwd: self.cwd.clone(),
            },
            "streamable_http" | "http" | "network" => TransportSpec::Network {
                url: expand_env_vars(
                    self.url
                        .as_deref()
                        .ok_or_else(|| invalid("network server needs a url".to_string()))?,
                    lookup,
                ),
                headers: expand_map(&self.headers),
            },
            other => return Err(invalid(format!("unknown transport '{other}'"))),
        };

        let descriptor = ServerDescriptor {
            name: name.to_string(),
            transport,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Replace `${NAME}` references. Unknown names expand to the empty string.
pub fn expand_env_vars<F>(value: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match lookup(key) {
                    Some(v) => out.push_str(&v),
                    None => warn!(variable = %key, "Environment variable is not set"),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
