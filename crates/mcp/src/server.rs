//! MCP server implementation.
//!
//! Exposes a `ToolRegistry`, a set of resources and a set of prompts over
//! the MCP protocol. Used for stub servers: in-process over a
//! `ChannelTransport`, or as a child process over stdio.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use toolhub_tool_runtime::{ToolContext, ToolRegistry};

use crate::error::McpError;
use crate::transport::McpTransport;
use crate::types::*;
use crate::uri_template::UriPattern;

type ResourceReader =
    Arc<dyn Fn(&str, &HashMap<String, String>) -> Result<String, McpError> + Send + Sync>;
type PromptRenderer = Arc<dyn Fn(&HashMap<String, String>) -> Result<String, McpError> + Send + Sync>;

/// A resource or resource template served as text.
#[derive(Clone)]
pub struct ResourceEntry {
    pub pattern: UriPattern,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    reader: ResourceReader,
}

impl ResourceEntry {
    /// `reader` gets the concrete URI and the placeholder bindings.
    pub fn new<F>(pattern: &str, name: impl Into<String>, reader: F) -> Result<Self, McpError>
    where
        F: Fn(&str, &HashMap<String, String>) -> Result<String, McpError> + Send + Sync + 'static,
    {
        Ok(Self {
            pattern: UriPattern::parse(pattern)?,
            name: name.into(),
            description: None,
            mime_type: Some("text/plain".to_string()),
            reader: Arc::new(reader),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// A prompt rendered to a single user message.
#[derive(Clone)]
pub struct PromptEntry {
    pub info: PromptInfo,
    render: PromptRenderer,
}

impl PromptEntry {
    pub fn new<F>(name: impl Into<String>, render: F) -> Self
    where
        F: Fn(&HashMap<String, String>) -> Result<String, McpError> + Send + Sync + 'static,
    {
        Self {
            info: PromptInfo {
                name: name.into(),
                description: None,
                arguments: Vec::new(),
            },
            render: Arc::new(render),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.info.description = Some(description.into());
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, required: bool) -> Self {
        self.info.arguments.push(PromptArgument {
            name: name.into(),
            description: None,
            required,
        });
        self
    }
}

/// MCP server that bridges a `ToolRegistry` to MCP clients.
pub struct McpServer {
    registry: ToolRegistry,
    resources: Vec<ResourceEntry>,
    prompts: Vec<PromptEntry>,
    server_name: String,
    server_version: String,
    page_size: Option<usize>,
    initialized: bool,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            resources: Vec::new(),
            prompts: Vec::new(),
            server_name: "toolhub-server".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            page_size: None,
            initialized: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_resource(mut self, resource: ResourceEntry) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_prompt(mut self, prompt: PromptEntry) -> Self {
        self.prompts.push(prompt);
        self
    }

    /// Split list replies into pages of `size`, linked by `nextCursor`.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    /// Run the server loop, reading from and writing to the transport.
    ///
    /// Returns `Ok(())` when the client disconnects; that is the normal way
    /// for a session to end.
    pub async fn run<T: McpTransport + ?Sized>(&mut self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, "MCP server starting");

        loop {
            let line = match transport.receive().await? {
                Some(line) => line,
                None => {
                    tracing::info!(server = %self.server_name, "Client disconnected, shutting down");
                    break;
                }
            };

            tracing::debug!(message = %line, "Received message");

            let reply = match JsonRpcMessage::parse(&line) {
                Ok(JsonRpcMessage::Request(request)) => self.handle_request(&request).await,
                Ok(JsonRpcMessage::Notification(notif)) => {
                    self.handle_notification(&notif);
                    continue;
                }
                Ok(JsonRpcMessage::Response(_)) => {
                    tracing::debug!("Ignoring response from client");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse message");
                    JsonRpcResponse {
                        jsonrpc: "2.0".to_string(),
                        id: RpcId::Number(0),
                        result: None,
                        error: Some(e.to_rpc_error()),
                    }
                }
            };

            let json = serde_json::to_string(&reply)?;
            tracing::debug!(response = %json, "Sending response");
            match transport.send(&json).await {
                Ok(()) => {}
                Err(e) if e.is_disconnect() => {
                    tracing::info!(server = %self.server_name, "Client went away mid-reply, shutting down");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let method = request.method.as_str();

        let outcome = match method {
            "initialize" => self.handle_initialize(&request.params),
            "ping" => Ok(serde_json::json!({})),
            _ if !self.initialized => Err(McpError::NotInitialized),
            "tools/list" => self.handle_list_tools(&request.params),
            "tools/call" => self.handle_call_tool(&id, &request.params).await,
            "resources/list" => self.handle_list_resources(&request.params),
            "resources/templates/list" => self.handle_list_templates(&request.params),
            "resources/read" => self.handle_read_resource(&request.params),
            "prompts/list" => self.handle_list_prompts(&request.params),
            "prompts/get" => self.handle_get_prompt(&request.params),
            other => {
                tracing::warn!(method = %other, "Unknown method");
                Err(McpError::MethodNotFound(other.to_string()))
            }
        };

        match outcome {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => {
                let rpc = err.to_rpc_error();
                JsonRpcResponse::error(id, rpc.code, rpc.message)
            }
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                tracing::info!("Client confirmed initialization");
            }
            "notifications/cancelled" => {
                tracing::debug!("Client cancelled a request");
            }
            method => {
                tracing::debug!(method = %method, "Unknown notification, ignoring");
            }
        }
    }

    fn handle_initialize(&mut self, params: &Option<Value>) -> Result<Value, McpError> {
        let params: InitializeParams = parse_params(params)?;
        tracing::info!(client = %params.client_info.name, "Handling initialize");
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
                resources: (!self.resources.is_empty()).then(ResourcesCapability::default),
                prompts: (!self.prompts.is_empty()).then(PromptsCapability::default),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
            instructions: None,
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Slice `items` according to the request cursor.
    fn page<T: Clone>(&self, items: &[T], params: &Option<Value>) -> Result<(Vec<T>, Option<String>), McpError> {
        let list: ListParams = match params {
            Some(p) => serde_json::from_value(p.clone())
                .map_err(|e| McpError::InvalidParams(e.to_string()))?,
            None => ListParams::default(),
        };
        let start = match list.cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| McpError::InvalidParams(format!("bad cursor '{cursor}'")))?,
            None => 0,
        };
        let size = self.page_size.unwrap_or(usize::MAX);
        let end = start.saturating_add(size).min(items.len());
        let page = items.get(start..end).unwrap_or_default().to_vec();
        let next = (end < items.len()).then(|| end.to_string());
        Ok((page, next))
    }

    fn handle_list_tools(&self, params: &Option<Value>) -> Result<Value, McpError> {
        tracing::debug!("Handling tools/list");
        let all: Vec<ToolInfo> = self.registry.definitions().into_iter().map(ToolInfo::from).collect();
        let (tools, next_cursor) = self.page(&all, params)?;
        Ok(serde_json::to_value(ListToolsResult { tools, next_cursor })?)
    }

    async fn handle_call_tool(&self, id: &RpcId, params: &Option<Value>) -> Result<Value, McpError> {
        let call_params: CallToolParams = parse_params(params)?;
        tracing::debug!(tool = %call_params.name, "Handling tools/call");

        let tool = self
            .registry
            .get(&call_params.name)
            .ok_or_else(|| McpError::ToolNotFound(call_params.name.clone()))?;

        let ctx = ToolContext::for_call(id.to_string());
        let result = match tool.execute(call_params.arguments, &ctx).await {
            Ok(tool_result) => CallToolResult {
                content: vec![ToolContent::Text {
                    text: tool_result.content,
                }],
                is_error: tool_result.is_error,
            },
            Err(e) => CallToolResult {
                content: vec![ToolContent::Text {
                    text: e.to_string(),
                }],
                is_error: true,
            },
        };
        Ok(serde_json::to_value(result)?)
    }

    fn handle_list_resources(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let all: Vec<ResourceInfo> = self
            .resources
            .iter()
            .filter(|r| r.pattern.is_concrete())
            .map(|r| ResourceInfo {
                uri: r.pattern.to_string(),
                name: r.name.clone(),
                description: r.description.clone(),
                mime_type: r.mime_type.clone(),
            })
            .collect();
        let (resources, next_cursor) = self.page(&all, params)?;
        Ok(serde_json::to_value(ListResourcesResult {
            resources,
            next_cursor,
        })?)
    }

    fn handle_list_templates(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let all: Vec<ResourceTemplateInfo> = self
            .resources
            .iter()
            .filter(|r| !r.pattern.is_concrete())
            .map(|r| ResourceTemplateInfo {
                uri_template: r.pattern.to_string(),
                name: r.name.clone(),
                description: r.description.clone(),
                mime_type: r.mime_type.clone(),
            })
            .collect();
        let (resource_templates, next_cursor) = self.page(&all, params)?;
        Ok(serde_json::to_value(ListResourceTemplatesResult {
            resource_templates,
            next_cursor,
        })?)
    }

    fn handle_read_resource(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let ReadResourceParams { uri } = parse_params(params)?;
        tracing::debug!(uri = %uri, "Handling resources/read");

        let found = self
            .resources
            .iter()
            .filter(|r| r.pattern.is_concrete())
            .find(|r| r.pattern.as_str() == uri)
            .map(|r| (r, HashMap::new()))
            .or_else(|| {
                self.resources
                    .iter()
                    .find_map(|r| r.pattern.match_uri(&uri).map(|bindings| (r, bindings)))
            });
        let (entry, bindings) = found.ok_or_else(|| McpError::ResourceNotFound {
            uri: uri.clone(),
            message: "no such resource".to_string(),
        })?;

        let text = (entry.reader)(&uri, &bindings)?;
        Ok(serde_json::to_value(ReadResourceResult {
            contents: vec![ResourceContents {
                uri,
                mime_type: entry.mime_type.clone(),
                text: Some(text),
                blob: None,
            }],
        })?)
    }

    fn handle_list_prompts(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let all: Vec<PromptInfo> = self.prompts.iter().map(|p| p.info.clone()).collect();
        let (prompts, next_cursor) = self.page(&all, params)?;
        Ok(serde_json::to_value(ListPromptsResult {
            prompts,
            next_cursor,
        })?)
    }

    fn handle_get_prompt(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let GetPromptParams { name, arguments } = parse_params(params)?;
        let entry = self
            .prompts
            .iter()
            .find(|p| p.info.name == name)
            .ok_or_else(|| McpError::PromptNotFound(name.clone()))?;

        if let Some(missing) = entry
            .info
            .arguments
            .iter()
            .find(|a| a.required && !arguments.contains_key(&a.name))
        {
            return Err(McpError::InvalidParams(format!(
                "prompt '{name}' needs argument '{}'",
                missing.name
            )));
        }

        let text = (entry.render)(&arguments)?;
        Ok(serde_json::to_value(GetPromptResult {
            description: entry.info.description.clone(),
            messages: vec![PromptMessage {
                role: PromptRole::User,
                content: ToolContent::Text { text },
            }],
        })?)
    }
}

fn parse_params<T: DeserializeOwned>(params: &Option<Value>) -> Result<T, McpError> {
    let params = params
        .as_ref()
        .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(params.clone()).map_err(|e| McpError::InvalidParams(e.to_string()))
}
