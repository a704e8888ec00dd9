//! Many servers behind one operation namespace.
//!
//! A [`ToolSet`] owns one session per configured server, merges their
//! operations in configuration order and routes each call to the session
//! that declared it. The merged index is built once and never mutated,
//! so routing needs no locking.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use toolhub_tool_runtime::ToolDefinition;

use crate::descriptor::ServerDescriptor;
use crate::discovery::{discover, Discovery};
use crate::error::McpError;
use crate::launcher::{Connector, Launcher};
use crate::session::{McpSession, SessionOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::types::{CallToolResult, GetPromptResult, PromptArgument, ReadResourceResult};
use crate::uri_template::UriPattern;

/// How aggregated operations are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolNaming {
    /// The server's own name. Duplicates across servers collide.
    #[default]
    Plain,
    /// `server.name`, unique as long as server names are.
    ServerPrefixed,
}

impl ToolNaming {
    pub fn expose(&self, server: &str, name: &str) -> String {
        match self {
            ToolNaming::Plain => name.to_string(),
            ToolNaming::ServerPrefixed => format!("{server}.{name}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub naming: ToolNaming,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            naming: ToolNaming::Plain,
        }
    }
}

impl BuildOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_naming(mut self, naming: ToolNaming) -> Self {
        self.naming = naming;
        self
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            ..SessionOptions::default()
        }
    }
}

/// One aggregated operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Owning server, looked up in the tool set
    pub server: String,
    /// Exposed name, unique within the tool set
    pub name: String,
    /// Name the owning server knows it by
    pub remote_name: String,
    pub description: String,
    pub input_schema: Value,
}

impl Operation {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// A readable resource or resource template.
#[derive(Debug, Clone)]
pub struct Resource {
    pub server: String,
    pub uri_pattern: UriPattern,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub server: String,
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
}

/// Two servers offered the same exposed name; `kept` won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub operation: String,
    pub kept: String,
    pub dropped: String,
}

/// The aggregated tool set.
pub struct ToolSet {
    sessions: IndexMap<String, McpSession>,
    operations: Vec<Operation>,
    index: HashMap<String, usize>,
    resources: Vec<Resource>,
    prompts: Vec<Prompt>,
    collisions: Vec<Collision>,
    request_timeout: Duration,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("servers", &self.sessions.keys().collect::<Vec<_>>())
            .field("operations", &self.operations.len())
            .field("collisions", &self.collisions)
            .finish()
    }
}

impl ToolSet {
    /// Connect every server with the default [`Launcher`].
    pub async fn build(
        descriptors: Vec<ServerDescriptor>,
        options: BuildOptions,
    ) -> Result<Self, McpError> {
        Self::build_with(descriptors, &Launcher::new(), options).await
    }

    /// Connect and discover every server concurrently.
    ///
    /// Fail-fast: if any server cannot be connected or discovered, every
    /// session that did come up is closed and the first failure in
    /// configuration order is returned.
    pub async fn build_with(
        descriptors: Vec<ServerDescriptor>,
        connector: &dyn Connector,
        options: BuildOptions,
    ) -> Result<Self, McpError> {
        let mut names = HashSet::new();
        for descriptor in &descriptors {
            descriptor.validate()?;
            if !names.insert(descriptor.name.clone()) {
                return Err(McpError::InvalidDescriptor {
                    server: descriptor.name.clone(),
                    reason: "server name is used twice".to_string(),
                });
            }
        }

        info!(servers = descriptors.len(), "Building tool set");
        let session_options = options.session_options();
        let attempts = join_all(descriptors.into_iter().map(|descriptor| {
            let session_options = session_options.clone();
            async move {
                let session = McpSession::connect(descriptor, connector, session_options).await?;
                match discover(&session).await {
                    Ok(discovery) => Ok((session, discovery)),
                    Err(e) => {
                        close_logged(&session, "Close after failed discovery").await;
                        Err(discovery_failure(session.name(), e))
                    }
                }
            }
        }))
        .await;

        let mut ready = Vec::new();
        let mut first_error = None;
        for attempt in attempts {
            match attempt {
                Ok(pair) => ready.push(pair),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => debug!(error = %e, "Additional server failure"),
            }
        }

        if let Some(err) = first_error {
            warn!(error = %err, connected = ready.len(), "Tool set build failed, closing connected servers");
            join_all(
                ready
                    .iter()
                    .map(|(session, _)| close_logged(session, "Close after failed build")),
            )
            .await;
            return Err(err);
        }

        Ok(Self::assemble(ready, &options))
    }

    /// Assemble a tool set from sessions that are already initialized.
    pub async fn from_sessions(
        sessions: Vec<McpSession>,
        options: BuildOptions,
    ) -> Result<Self, McpError> {
        let discoveries = join_all(sessions.iter().map(discover)).await;
        let mut ready: Vec<(McpSession, Discovery)> = Vec::with_capacity(sessions.len());
        let mut failure = None;
        for (session, discovery) in sessions.into_iter().zip(discoveries) {
            match discovery {
                Ok(discovery) => ready.push((session, discovery)),
                Err(e) => {
                    let err = discovery_failure(session.name(), e);
                    if failure.is_none() {
                        failure = Some(err);
                    } else {
                        debug!(error = %err, "Additional server failure");
                    }
                    close_logged(&session, "Close after failed discovery").await;
                }
            }
        }

        if let Some(err) = failure {
            warn!(error = %err, "Discovery failed, closing every session");
            join_all(
                ready
                    .iter()
                    .map(|(session, _)| close_logged(session, "Close after failed discovery")),
            )
            .await;
            return Err(err);
        }
        Ok(Self::assemble(ready, &options))
    }

    fn assemble(ready: Vec<(McpSession, Discovery)>, options: &BuildOptions) -> Self {
        let mut set = Self {
            sessions: IndexMap::new(),
            operations: Vec::new(),
            index: HashMap::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            collisions: Vec::new(),
            request_timeout: options.request_timeout,
        };

        for (session, discovery) in ready {
            let server = session.name().to_string();

            for tool in discovery.operations {
                let name = options.naming.expose(&server, &tool.name);
                if let Some(&existing) = set.index.get(&name) {
                    let kept = set.operations[existing].server.clone();
                    warn!(operation = %name, kept = %kept, dropped = %server, "Operation name collision, keeping first");
                    set.collisions.push(Collision {
                        operation: name,
                        kept,
                        dropped: server.clone(),
                    });
                    continue;
                }
                set.index.insert(name.clone(), set.operations.len());
                set.operations.push(Operation {
                    server: server.clone(),
                    name,
                    remote_name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                });
            }

            for resource in discovery.resources {
                set.resources.push(Resource {
                    server: server.clone(),
                    uri_pattern: UriPattern::literal(&resource.uri),
                    name: resource.name,
                    description: resource.description,
                    mime_type: resource.mime_type,
                });
            }
            for template in discovery.templates {
                match UriPattern::parse(&template.uri_template) {
                    Ok(uri_pattern) => set.resources.push(Resource {
                        server: server.clone(),
                        uri_pattern,
                        name: template.name,
                        description: template.description,
                        mime_type: template.mime_type,
                    }),
                    Err(e) => {
                        warn!(server = %server, template = %template.uri_template, error = %e, "Skipping malformed resource template")
                    }
                }
            }

            for prompt in discovery.prompts {
                if set.prompts.iter().any(|p| p.name == prompt.name) {
                    warn!(prompt = %prompt.name, dropped = %server, "Prompt name collision, keeping first");
                    continue;
                }
                set.prompts.push(Prompt {
                    server: server.clone(),
                    name: prompt.name,
                    description: prompt.description,
                    arguments: prompt.arguments,
                });
            }

            set.sessions.insert(server, session);
        }

        info!(
            servers = set.sessions.len(),
            operations = set.operations.len(),
            collisions = set.collisions.len(),
            "Tool set ready"
        );
        set
    }

    // ── Lookup ──────────────────────────────────────────────────────

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.operations.iter().map(Operation::definition).collect()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    /// Server names in configuration order.
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn session(&self, server: &str) -> Option<&McpSession> {
        self.sessions.get(server)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn owner(&self, server: &str) -> Result<&McpSession, McpError> {
        self.sessions.get(server).ok_or_else(|| McpError::SessionClosed {
            server: server.to_string(),
        })
    }

    // ── Routing ─────────────────────────────────────────────────────

    /// Dispatch an operation to the server that owns it.
    pub async fn route(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.route_with_timeout(name, arguments, self.request_timeout)
            .await
    }

    pub async fn route_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallToolResult, McpError> {
        let operation = self
            .operation(name)
            .ok_or_else(|| McpError::UnknownOperation(name.to_string()))?;
        debug!(operation = %name, server = %operation.server, "Routing call");

        self.owner(&operation.server)?
            .call_with_timeout(&operation.remote_name, arguments, timeout)
            .await
            .map_err(|e| match e {
                McpError::ToolExecution { message, .. } => McpError::ToolExecution {
                    operation: name.to_string(),
                    message,
                },
                other => other,
            })
    }

    /// Find the server that declares `uri`: concrete resources first, then
    /// templates, each in configuration order.
    pub fn resource_for(&self, uri: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .filter(|r| r.uri_pattern.is_concrete())
            .find(|r| r.uri_pattern.as_str() == uri)
            .or_else(|| {
                self.resources
                    .iter()
                    .filter(|r| !r.uri_pattern.is_concrete())
                    .find(|r| r.uri_pattern.match_uri(uri).is_some())
            })
    }

    /// Expand `pattern` and read it from whichever server declares it.
    pub async fn read_resource(
        &self,
        pattern: &UriPattern,
        bindings: &HashMap<String, String>,
    ) -> Result<ReadResourceResult, McpError> {
        let uri = pattern.expand(bindings)?;
        let resource = self
            .resource_for(&uri)
            .ok_or_else(|| McpError::ResourceNotFound {
                uri: uri.clone(),
                message: "no server declares this resource".to_string(),
            })?;
        self.owner(&resource.server)?
            .read_uri(&uri, self.request_timeout)
            .await
    }

    /// Read from a named server without consulting discovered resources.
    pub async fn read_resource_from(
        &self,
        server: &str,
        pattern: &UriPattern,
        bindings: &HashMap<String, String>,
    ) -> Result<ReadResourceResult, McpError> {
        let session = self
            .sessions
            .get(server)
            .ok_or_else(|| McpError::ResourceNotFound {
                uri: pattern.to_string(),
                message: format!("unknown server '{server}'"),
            })?;
        session.read_resource(pattern, bindings).await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, McpError> {
        let prompt = self
            .prompts
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| McpError::PromptNotFound(name.to_string()))?;
        self.owner(&prompt.server)?.get_prompt(name, arguments).await
    }

    /// Close every session concurrently. Keeps going past failures and
    /// reports them all.
    pub async fn close(&self) -> Vec<(String, McpError)> {
        let results = join_all(self.sessions.values().map(McpSession::close)).await;
        let failures: Vec<_> = self
            .sessions
            .keys()
            .zip(results)
            .filter_map(|(server, result)| result.err().map(|e| (server.clone(), e)))
            .collect();
        for (server, error) in &failures {
            warn!(server = %server, error = %error, "Failed to close session");
        }
        failures
    }
}

/// Discovery runs over a fresh channel, so its failures are reported like
/// connection failures.
/// Best-effort close on a failure path; the close error is logged, not returned.
async fn close_logged(session: &McpSession, context: &str) {
    if let Err(e) = session.close().await {
        warn!(server = %session.name(), error = %e, "{}", context);
    }
}

fn discovery_failure(server: &str, error: McpError) -> McpError {
    match error {
        e @ (McpError::Timeout { .. } | McpError::Connection { .. }) => e,
        e => McpError::Connection {
            server: server.to_string(),
            reason: format!("discovery failed: {e}"),
        },
    }
}
