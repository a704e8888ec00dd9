//! A live connection to one tool server.
//!
//! The session owns the channel. Requests are strictly request/response:
//! an async mutex keeps one request in flight, and a reply is matched to
//! its request by id. Anything that leaves the channel in an unknown
//! state (peer gone, timeout, a dropped call future) closes it for good.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::descriptor::ServerDescriptor;
use crate::error::McpError;
use crate::launcher::Connector;
use crate::transport::{ExitKind, McpTransport};
use crate::types::*;
use crate::uri_template::UriPattern;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Ready,
    Closed,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Unconnected,
            1 => SessionState::Connecting,
            2 => SessionState::Ready,
            _ => SessionState::Closed,
        }
    }
}

/// Timeouts and identity used by a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bound on launching the channel and on the handshake round-trip
    pub connect_timeout: Duration,
    /// Default bound on every later request
    pub request_timeout: Duration,
    pub client_name: String,
    pub client_version: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client_name: "toolhub".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

type Channel = Option<Box<dyn McpTransport>>;

pub struct McpSession {
    descriptor: ServerDescriptor,
    options: SessionOptions,
    channel: Mutex<Channel>,
    state: AtomicU8,
    server: OnceLock<InitializeResult>,
    exit: OnceLock<ExitKind>,
    next_id: AtomicI64,
}

/// Holds the channel for one exchange. If the exchange future is dropped
/// before `finish`, the channel is dropped and the session closed: a
/// reply may still be in flight and would desync every later request.
struct InFlight<'a> {
    slot: MutexGuard<'a, Channel>,
    state: &'a AtomicU8,
    server: &'a str,
    method: &'a str,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(&mut self) {
        self.finished = true;
    }

    fn close(&mut self) {
        self.detach();
    }

    /// Mark the session closed and hand the channel back for teardown.
    fn detach(&mut self) -> Option<Box<dyn McpTransport>> {
        self.finished = true;
        self.state
            .store(SessionState::Closed as u8, Ordering::SeqCst);
        self.slot.take()
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(server = %self.server, method = %self.method, "Request cancelled, closing channel");
            self.close();
        }
    }
}

impl McpSession {
    /// Launch the channel through `connector` and run the handshake.
    ///
    /// Every failure is reported as [`McpError::Connection`] except a
    /// handshake that runs out of time, which is [`McpError::Timeout`].
    pub async fn connect(
        descriptor: ServerDescriptor,
        connector: &dyn Connector,
        options: SessionOptions,
    ) -> Result<Self, McpError> {
        let name = descriptor.name.clone();
        info!(server = %name, transport = descriptor.kind(), "Connecting to server");

        let launched =
            tokio::time::timeout(options.connect_timeout, connector.connect(&descriptor)).await;
        let transport = match launched {
            Ok(Ok(transport)) => transport,
            Ok(Err(e @ (McpError::Connection { .. } | McpError::InvalidDescriptor { .. }))) => {
                return Err(e)
            }
            Ok(Err(e)) => {
                return Err(McpError::Connection {
                    server: name,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(McpError::Timeout {
                    server: name,
                    method: "connect".to_string(),
                    after: options.connect_timeout,
                })
            }
        };

        let session = Self::with_transport(descriptor, transport, options);
        match session.initialize().await {
            Ok(init) => {
                info!(
                    server = %name,
                    remote = %init.server_info.name,
                    protocol = %init.protocol_version,
                    "Session ready"
                );
                Ok(session)
            }
            Err(e @ McpError::Timeout { .. }) => Err(e),
            Err(McpError::SessionClosed { .. }) => Err(McpError::Connection {
                server: name,
                reason: "server closed the channel during the handshake".to_string(),
            }),
            Err(e) => Err(McpError::Connection {
                server: name,
                reason: e.to_string(),
            }),
        }
    }

    /// Wrap an already-open channel. The session starts `Unconnected`;
    /// call [`initialize`](Self::initialize) before anything else.
    pub fn with_transport(
        descriptor: ServerDescriptor,
        transport: Box<dyn McpTransport>,
        options: SessionOptions,
    ) -> Self {
        Self {
            descriptor,
            options,
            channel: Mutex::new(Some(transport)),
            state: AtomicU8::new(SessionState::Unconnected as u8),
            server: OnceLock::new(),
            exit: OnceLock::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// What the server reported during the handshake.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server.get()
    }

    /// How the server process ended, once the channel has been torn down.
    /// `None` while it runs and for channels without a process.
    pub fn exit_kind(&self) -> Option<ExitKind> {
        self.exit.get().copied()
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn closed_error(&self) -> McpError {
        McpError::SessionClosed {
            server: self.name().to_string(),
        }
    }

    fn ensure_ready(&self, method: &str) -> Result<(), McpError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(self.closed_error()),
            SessionState::Unconnected | SessionState::Connecting => Err(McpError::ProtocolState(
                format!("'{method}' sent to '{}' before initialize", self.name()),
            )),
        }
    }

    /// Run the handshake: `initialize`, then `notifications/initialized`.
    /// Allowed exactly once per channel.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let claimed = self.state.compare_exchange(
            SessionState::Unconnected as u8,
            SessionState::Connecting as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if let Err(current) = claimed {
            return match SessionState::from_u8(current) {
                SessionState::Closed => Err(self.closed_error()),
                _ => Err(McpError::ProtocolState(format!(
                    "'{}' is already initialized",
                    self.name()
                ))),
            };
        }

        match self.handshake().await {
            Ok(result) => {
                let _ = self.server.set(result.clone());
                self.set_state(SessionState::Ready);
                Ok(result)
            }
            Err(e) => {
                if let Err(close_err) = self.close().await {
                    debug!(server = %self.name(), error = %close_err, "Close after failed handshake");
                }
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResult, McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: self.options.client_name.clone(),
                version: Some(self.options.client_version.clone()),
            },
        };
        let value = self
            .request(
                "initialize",
                Some(serde_json::to_value(params)?),
                self.options.connect_timeout,
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(value)?;
        if result.protocol_version != PROTOCOL_VERSION {
            debug!(
                server = %self.name(),
                offered = PROTOCOL_VERSION,
                accepted = %result.protocol_version,
                "Server negotiated a different protocol version"
            );
        }
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// Send one request and wait for its reply. A JSON-RPC error reply is
    /// returned as [`McpError::Rpc`].
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let slot = self.channel.lock().await;
        if slot.is_none() {
            return Err(self.closed_error());
        }
        let mut inflight = InFlight {
            slot,
            state: &self.state,
            server: self.name(),
            method,
            finished: false,
        };

        let id = RpcId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let line = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;
        debug!(server = %self.name(), method = %method, id = %id, "Sending request");

        let outcome = match inflight.slot.as_mut() {
            Some(transport) => {
                tokio::time::timeout(timeout, exchange(&mut **transport, &line, &id)).await
            }
            None => Ok(Err(McpError::PeerClosed)),
        };

        match outcome {
            Ok(Ok(response)) => {
                inflight.finish();
                response.into_result().map_err(|e| McpError::Rpc {
                    code: e.code,
                    message: e.message,
                })
            }
            Ok(Err(e)) if e.is_disconnect() => {
                info!(server = %self.name(), method = %method, "Server closed the channel");
                self.teardown(inflight.detach()).await;
                Err(self.closed_error())
            }
            Ok(Err(e)) => {
                warn!(server = %self.name(), method = %method, error = %e, "Channel failed");
                self.teardown(inflight.detach()).await;
                Err(e)
            }
            Err(_) => {
                warn!(server = %self.name(), method = %method, after = ?timeout, "Request timed out, closing channel");
                inflight.close();
                Err(McpError::Timeout {
                    server: self.name().to_string(),
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        let mut slot = self.channel.lock().await;
        let transport = slot.as_mut().ok_or_else(|| self.closed_error())?;
        match transport.send(&line).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_disconnect() => {
                self.set_state(SessionState::Closed);
                self.teardown(slot.take()).await;
                Err(self.closed_error())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch every page of a `*/list` method.
    async fn list_all<P, I>(
        &self,
        method: &str,
        split: impl Fn(P) -> (Vec<I>, Option<String>),
    ) -> Result<Vec<I>, McpError>
    where
        P: DeserializeOwned,
    {
        self.ensure_ready(method)?;
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let params = serde_json::to_value(ListParams {
                cursor: cursor.clone(),
            })?;
            let value = self
                .request(method, Some(params), self.options.request_timeout)
                .await?;
            let (page, next) = split(serde_json::from_value(value)?);
            items.extend(page);

            match next {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                Some(repeated) => {
                    warn!(server = %self.name(), method = %method, cursor = %repeated, "Server repeated a cursor, stopping");
                    break;
                }
                None => break,
            }
        }
        Ok(items)
    }

    fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.server.get().map(|s| &s.capabilities)
    }

    /// `tools/list`, all pages.
    pub async fn list_operations(&self) -> Result<Vec<ToolInfo>, McpError> {
        self.list_all("tools/list", |page: ListToolsResult| {
            (page.tools, page.next_cursor)
        })
        .await
    }

    /// `resources/list`, all pages. Empty when the server has no resources.
    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>, McpError> {
        self.ensure_ready("resources/list")?;
        if self.capabilities().and_then(|c| c.resources.as_ref()).is_none() {
            return Ok(Vec::new());
        }
        self.list_all("resources/list", |page: ListResourcesResult| {
            (page.resources, page.next_cursor)
        })
        .await
    }

    /// `resources/templates/list`, all pages.
    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplateInfo>, McpError> {
        self.ensure_ready("resources/templates/list")?;
        if self.capabilities().and_then(|c| c.resources.as_ref()).is_none() {
            return Ok(Vec::new());
        }
        self.list_all(
            "resources/templates/list",
            |page: ListResourceTemplatesResult| (page.resource_templates, page.next_cursor),
        )
        .await
    }

    /// `prompts/list`, all pages.
    pub async fn list_prompts(&self) -> Result<Vec<PromptInfo>, McpError> {
        self.ensure_ready("prompts/list")?;
        if self.capabilities().and_then(|c| c.prompts.as_ref()).is_none() {
            return Ok(Vec::new());
        }
        self.list_all("prompts/list", |page: ListPromptsResult| {
            (page.prompts, page.next_cursor)
        })
        .await
    }

    /// Invoke an operation by the server's own name.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.call_with_timeout(name, arguments, self.options.request_timeout)
            .await
    }

    /// Like [`call`](Self::call) with an explicit deadline. Arguments are
    /// passed through untouched; the server validates them.
    pub async fn call_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallToolResult, McpError> {
        self.ensure_ready("tools/call")?;
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        debug!(server = %self.name(), operation = %name, "Calling operation");

        let value = match self.request("tools/call", Some(params), timeout).await {
            Ok(value) => value,
            Err(McpError::Rpc { message, .. }) => {
                return Err(McpError::ToolExecution {
                    operation: name.to_string(),
                    message,
                })
            }
            Err(e) => return Err(e),
        };

        let result: CallToolResult = serde_json::from_value(value)?;
        if result.is_error {
            return Err(McpError::ToolExecution {
                operation: name.to_string(),
                message: result.text(),
            });
        }
        Ok(result)
    }

    /// Expand `pattern` with `bindings` and read the resulting URI.
    pub async fn read_resource(
        &self,
        pattern: &UriPattern,
        bindings: &HashMap<String, String>,
    ) -> Result<ReadResourceResult, McpError> {
        self.read_resource_with_timeout(pattern, bindings, self.options.request_timeout)
            .await
    }

    pub async fn read_resource_with_timeout(
        &self,
        pattern: &UriPattern,
        bindings: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<ReadResourceResult, McpError> {
        let uri = pattern.expand(bindings)?;
        self.read_uri(&uri, timeout).await
    }

    /// `resources/read` on a concrete URI.
    pub async fn read_uri(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<ReadResourceResult, McpError> {
        self.ensure_ready("resources/read")?;
        let params = serde_json::to_value(ReadResourceParams {
            uri: uri.to_string(),
        })?;
        match self.request("resources/read", Some(params), timeout).await {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(McpError::Rpc { message, .. }) => Err(McpError::ResourceNotFound {
                uri: uri.to_string(),
                message,
            }),
            Err(e) => Err(e),
        }
    }

    /// `prompts/get`.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, McpError> {
        self.ensure_ready("prompts/get")?;
        let params = serde_json::to_value(GetPromptParams {
            name: name.to_string(),
            arguments,
        })?;
        let value = self
            .request("prompts/get", Some(params), self.options.request_timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `ping` round-trip.
    pub async fn ping(&self) -> Result<(), McpError> {
        self.ensure_ready("ping")?;
        self.request("ping", None, self.options.request_timeout)
            .await
            .map(|_| ())
    }

    /// Shut the channel down. Safe to call any number of times; only the
    /// first call touches the channel.
    pub async fn close(&self) -> Result<(), McpError> {
        let transport = self.channel.lock().await.take();
        self.set_state(SessionState::Closed);
        match transport {
            Some(mut transport) => {
                debug!(server = %self.name(), "Closing session");
                let result = transport.close().await;
                self.record_exit(&*transport);
                result
            }
            None => Ok(()),
        }
    }

    /// Close a channel the peer already abandoned so a child process is
    /// reaped and its exit classified.
    async fn teardown(&self, transport: Option<Box<dyn McpTransport>>) {
        let Some(mut transport) = transport else {
            return;
        };
        if let Err(e) = transport.close().await {
            debug!(server = %self.name(), error = %e, "Closing a dead channel failed");
        }
        self.record_exit(&*transport);
    }

    fn record_exit(&self, transport: &dyn McpTransport) {
        if let Some(kind) = transport.exit_kind() {
            self.exit.get_or_init(|| kind);
        }
    }
}

/// Send `line` and read until the reply with `id` arrives. Server
/// notifications are logged; server requests get an answer so the server
/// is never left waiting on us.
async fn exchange(
    transport: &mut dyn McpTransport,
    line: &str,
    id: &RpcId,
) -> Result<JsonRpcResponse, McpError> {
    transport.send(line).await?;
    loop {
        let Some(raw) = transport.receive().await? else {
            return Err(McpError::PeerClosed);
        };
        match JsonRpcMessage::parse(&raw) {
            Ok(JsonRpcMessage::Response(response)) if response.id == *id => return Ok(response),
            Ok(JsonRpcMessage::Response(response)) => {
                debug!(id = %response.id, "Discarding reply to an earlier request");
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                debug!(method = %notification.method, "Server notification");
            }
            Ok(JsonRpcMessage::Request(request)) => {
                let reply = match request.method.as_str() {
                    "ping" => JsonRpcResponse::success(request.id, serde_json::json!({})),
                    other => {
                        debug!(method = %other, "Rejecting server request");
                        JsonRpcResponse::error(
                            request.id,
                            error_codes::METHOD_NOT_FOUND,
                            format!("Method not found: {other}"),
                        )
                    }
                };
                transport.send(&serde_json::to_string(&reply)?).await?;
            }
            Err(e) => warn!(error = %e, "Skipping malformed line from server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;

    /// Run a fake server on the far end of a channel pair. `handler`
    /// returns the result for a request, or `None` to stay silent.
    fn scripted<F>(handler: F) -> McpSession
    where
        F: Fn(&JsonRpcRequest) -> Option<Result<Value, (i64, String)>> + Send + 'static,
    {
        let (client, mut server) = ChannelTransport::pair();
        tokio::spawn(async move {
            while let Ok(Some(line)) = server.receive().await {
                let Ok(JsonRpcMessage::Request(req)) = JsonRpcMessage::parse(&line) else {
                    continue;
                };
                let reply = match handler(&req) {
                    Some(Ok(result)) => JsonRpcResponse::success(req.id.clone(), result),
                    Some(Err((code, message))) => {
                        JsonRpcResponse::error(req.id.clone(), code, message)
                    }
                    None => continue,
                };
                if server
                    .send(&serde_json::to_string(&reply).unwrap())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        McpSession::with_transport(
            ServerDescriptor::subprocess("fake", "fake-server", Vec::<String>::new()),
            Box::new(client),
            SessionOptions::default(),
        )
    }

    fn init_result(capabilities: Value) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": capabilities,
            "serverInfo": {"name": "fake"}
        })
    }

    #[tokio::test]
    async fn test_calls_before_initialize_are_rejected() {
        let session = scripted(|_| Some(Ok(init_result(serde_json::json!({})))));
        assert_eq!(session.state(), SessionState::Unconnected);

        let err = session.list_operations().await.unwrap_err();
        assert!(matches!(err, McpError::ProtocolState(_)));
        let err = session.call("echo", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ProtocolState(_)));
    }

    #[tokio::test]
    async fn test_initialize_exactly_once() {
        let session = scripted(|_| Some(Ok(init_result(serde_json::json!({"tools": {}})))));
        let init = session.initialize().await.unwrap();
        assert_eq!(init.server_info.name, "fake");
        assert!(session.is_ready());

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, McpError::ProtocolState(_)));
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_list_operations_follows_cursor() {
        let session = scripted(|req| match req.method.as_str() {
            "initialize" => Some(Ok(init_result(serde_json::json!({"tools": {}})))),
            "tools/list" => {
                let cursor = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("cursor"))
                    .and_then(|c| c.as_str());
                Some(Ok(match cursor {
                    None => serde_json::json!({
                        "tools": [{"name": "list_tables", "inputSchema": {"type": "object"}}],
                        "nextCursor": "2"
                    }),
                    Some(_) => serde_json::json!({
                        "tools": [{"name": "execute_sql_query", "inputSchema": {"type": "object"}}]
                    }),
                }))
            }
            _ => None,
        });
        session.initialize().await.unwrap();

        let names: Vec<_> = session
            .list_operations()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["list_tables", "execute_sql_query"]);
    }

    #[tokio::test]
    async fn test_resources_skipped_without_capability() {
        let session = scripted(|req| match req.method.as_str() {
            "initialize" => Some(Ok(init_result(serde_json::json!({"tools": {}})))),
            _ => None,
        });
        session.initialize().await.unwrap();
        assert!(session.list_resources().await.unwrap().is_empty());
        assert!(session.list_prompts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_call_errors_become_tool_execution() {
        let session = scripted(|req| match req.method.as_str() {
            "initialize" => Some(Ok(init_result(serde_json::json!({"tools": {}})))),
            "tools/call" => {
                let name = req.params.as_ref().unwrap()["name"].as_str().unwrap();
                match name {
                    "flagged" => Some(Ok(serde_json::json!({
                        "content": [{"type": "text", "text": "no such table: Foo"}],
                        "isError": true
                    }))),
                    _ => Some(Err((error_codes::INVALID_PARAMS, "bad arguments".to_string()))),
                }
            }
            _ => None,
        });
        session.initialize().await.unwrap();

        match session.call("flagged", serde_json::json!({})).await.unwrap_err() {
            McpError::ToolExecution { operation, message } => {
                assert_eq!(operation, "flagged");
                assert_eq!(message, "no such table: Foo");
            }
            other => panic!("expected ToolExecution, got {:?}", other),
        }
        match session.call("rpc", serde_json::json!({})).await.unwrap_err() {
            McpError::ToolExecution { message, .. } => assert_eq!(message, "bad arguments"),
            other => panic!("expected ToolExecution, got {:?}", other),
        }
        // Execution failures leave the session usable.
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_read_resource_rejections() {
        let session = scripted(|req| match req.method.as_str() {
            "initialize" => Some(Ok(init_result(serde_json::json!({"resources": {}})))),
            "resources/read" => Some(Err((error_codes::RESOURCE_NOT_FOUND, "Unknown table".to_string()))),
            _ => None,
        });
        session.initialize().await.unwrap();
        let pattern = UriPattern::parse("table://{table_name}").unwrap();

        let err = session
            .read_resource(&pattern, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ResourceNotFound { .. }));

        let bindings = HashMap::from([("table_name".to_string(), "Nope".to_string())]);
        match session.read_resource(&pattern, &bindings).await.unwrap_err() {
            McpError::ResourceNotFound { uri, message } => {
                assert_eq!(uri, "table://Nope");
                assert_eq!(message, "Unknown table");
            }
            other => panic!("expected ResourceNotFound, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_closes_session() {
        let session = scripted(|req| match req.method.as_str() {
            "initialize" => Some(Ok(init_result(serde_json::json!({"tools": {}})))),
            _ => None,
        });
        session.initialize().await.unwrap();

        let err = session
            .call_with_timeout("slow", serde_json::json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { ref method, .. } if method == "tools/call"));
        assert_eq!(session.state(), SessionState::Closed);

        let err = session.call("slow", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::SessionClosed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_closes_session() {
        let session = scripted(|req| match req.method.as_str() {
            "initialize" => Some(Ok(init_result(serde_json::json!({"tools": {}})))),
            _ => None,
        });
        session.initialize().await.unwrap();

        let call = session.call("slow", serde_json::json!({}));
        assert!(tokio::time::timeout(Duration::from_millis(10), call)
            .await
            .is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_peer_drop_yields_session_closed() {
        let (client, server) = ChannelTransport::pair();
        let session = McpSession::with_transport(
            ServerDescriptor::subprocess("gone", "x", Vec::<String>::new()),
            Box::new(client),
            SessionOptions::default(),
        );
        drop(server);

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, McpError::SessionClosed { .. }));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_server_ping_is_answered_mid_exchange() {
        let (client, mut server) = ChannelTransport::pair();
        let session = McpSession::with_transport(
            ServerDescriptor::subprocess("chatty", "x", Vec::<String>::new()),
            Box::new(client),
            SessionOptions::default(),
        );

        let fake = tokio::spawn(async move {
            let line = server.receive().await.unwrap().unwrap();
            let JsonRpcMessage::Request(init) = JsonRpcMessage::parse(&line).unwrap() else {
                panic!("expected initialize request");
            };
            let log = JsonRpcNotification::new("notifications/message", None);
            server.send(&serde_json::to_string(&log).unwrap()).await.unwrap();
            let ping = JsonRpcRequest::new(RpcId::String("srv-1".into()), "ping", None);
            server.send(&serde_json::to_string(&ping).unwrap()).await.unwrap();

            let pong = server.receive().await.unwrap().unwrap();
            let JsonRpcMessage::Response(pong) = JsonRpcMessage::parse(&pong).unwrap() else {
                panic!("expected ping reply");
            };
            assert_eq!(pong.id, RpcId::String("srv-1".into()));

            let reply = JsonRpcResponse::success(init.id, init_result(serde_json::json!({})));
            server.send(&serde_json::to_string(&reply).unwrap()).await.unwrap();
            // notifications/initialized
            server.receive().await.unwrap().unwrap()
        });

        session.initialize().await.unwrap();
        let initialized = fake.await.unwrap();
        assert!(initialized.contains("notifications/initialized"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = scripted(|_| Some(Ok(init_result(serde_json::json!({})))));
        session.initialize().await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.ping().await.unwrap_err(),
            McpError::SessionClosed { .. }
        ));
    }
}
