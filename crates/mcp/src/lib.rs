//! MCP (Model Context Protocol) client core for toolhub.
//!
//! Connects to any number of tool servers, runs the initialization
//! handshake, discovers what each offers, and merges everything into one
//! [`ToolSet`] whose operations can be handed to an agent loop as tools.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **transport**: channels (stdio, child process, streamable HTTP, in-memory)
//! - **descriptor**: how to reach a server, and the config file shape
//! - **launcher**: turns a descriptor into a live channel
//! - **session**: one server, strict request/response
//! - **discovery**: snapshot of operations, resources and prompts
//! - **aggregator**: many sessions behind one namespace
//! - **adapter**: aggregated operations as runtime `Tool`s
//! - **server**: MCP server for stub and test servers
//! - **error**: Unified error types
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use toolhub_mcp::{into_registry, BuildOptions, ServerDescriptor, ToolSet};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let servers = vec![
//!     ServerDescriptor::subprocess("notion", "npx", ["-y", "@notionhq/notion-mcp-server"]),
//!     ServerDescriptor::network("db", "http://localhost:8000/mcp"),
//! ];
//! let tools = Arc::new(ToolSet::build(servers, BuildOptions::default()).await?);
//! let registry = into_registry(&tools)?;
//! // hand `registry` to an AgenticLoop ...
//! tools.close().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod aggregator;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod launcher;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;
pub mod uri_template;

pub use adapter::{into_registry, tool_adapters, McpTool};
pub use aggregator::{BuildOptions, Collision, Operation, Prompt, Resource, ToolNaming, ToolSet};
pub use descriptor::{ServerDescriptor, ServerEntry, ServersConfig, TransportSpec};
pub use discovery::{discover, Discovery};
pub use error::McpError;
pub use launcher::{Connector, Launcher};
pub use server::{McpServer, PromptEntry, ResourceEntry};
pub use session::{McpSession, SessionOptions, SessionState};
pub use transport::{
    ChannelTransport, ChildProcessTransport, ExitKind, HttpTransport, McpTransport, StdioTransport,
};
pub use types::*;
pub use uri_template::UriPattern;
