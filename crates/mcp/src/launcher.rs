//! Turns a [`ServerDescriptor`] into a live channel.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::descriptor::{ServerDescriptor, TransportSpec};
use crate::error::McpError;
use crate::transport::{ChildProcessTransport, HttpTransport, McpTransport};

/// Establishes the raw channel for a server. The handshake is the
/// session's job, not the connector's.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ServerDescriptor)
        -> Result<Box<dyn McpTransport>, McpError>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Box<dyn McpTransport>, McpError> {
        (**self).connect(descriptor).await
    }
}

/// Default connector: spawns child processes and opens HTTP clients.
#[derive(Clone, Default)]
pub struct Launcher {
    http: reqwest::Client,
}

impl Launcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, ...).
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Connector for Launcher {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Box<dyn McpTransport>, McpError> {
        descriptor.validate()?;
        let name = descriptor.name.as_str();

        match &descriptor.transport {
            TransportSpec::Subprocess {
                command,
                args,
                env,
                cwd,
            } => {
                let mut cmd = Command::new(command);
                cmd.args(args)
                    .envs(env)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true);
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }

                let child = cmd.spawn().map_err(|e| McpError::Connection {
                    server: name.to_string(),
                    reason: format!("failed to spawn '{command}': {e}"),
                })?;
                info!(server = %name, command = %command, pid = ?child.id(), "Spawned server process");

                Ok(Box::new(ChildProcessTransport::from_child(name, child)?))
            }
            TransportSpec::Network { headers, .. } => {
                let url = descriptor.network_url()?;
                debug!(server = %name, url = %url, "Opening HTTP channel");
                let headers: Vec<(String, String)> = headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Ok(Box::new(HttpTransport::new(
                    name,
                    self.http.clone(),
                    url,
                    &headers,
                )?))
            }
        }
    }
}
