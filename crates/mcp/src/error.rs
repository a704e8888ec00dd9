//! Error types for the MCP crate.

use std::time::Duration;

use crate::types::{error_codes, JsonRpcError};

/// Errors that can occur during MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// The channel to a server could not be established (spawn failure,
    /// immediate exit, refused connection, failed handshake).
    #[error("failed to connect to server '{server}': {reason}")]
    Connection { server: String, reason: String },

    /// A call was made out of the required sequence (e.g. before `initialize`).
    #[error("protocol state error: {0}")]
    ProtocolState(String),

    /// The server accepted the call but execution failed.
    #[error("operation '{operation}' failed: {message}")]
    ToolExecution { operation: String, message: String },

    /// The requested resource does not exist or could not be read.
    #[error("resource not found: {uri}: {message}")]
    ResourceNotFound { uri: String, message: String },

    /// No server in the tool set owns the operation.
    #[error("unknown operation: '{0}'")]
    UnknownOperation(String),

    /// The session's channel is closed; no further calls are possible.
    #[error("session for server '{server}' is closed")]
    SessionClosed { server: String },

    /// A round-trip exceeded its deadline.
    #[error("'{method}' on server '{server}' timed out after {after:?}")]
    Timeout {
        server: String,
        method: String,
        after: Duration,
    },

    /// The peer closed the channel. Expected at shutdown.
    #[error("peer closed the channel")]
    PeerClosed,

    /// Failed to parse JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a JSON-RPC error.
    #[error("server error [{code}]: {message}")]
    Rpc { code: i64, message: String },

    /// A server descriptor is malformed.
    #[error("invalid server descriptor '{server}': {reason}")]
    InvalidDescriptor { server: String, reason: String },

    /// The requested method is not supported.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters for a method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The requested tool was not found in the registry.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The requested prompt was not found.
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    /// Server not initialized.
    #[error("Not initialized: call initialize first")]
    NotInitialized,
}

impl McpError {
    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let code = match self {
            McpError::JsonParse(_) => error_codes::PARSE_ERROR,
            McpError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_)
            | McpError::ToolNotFound(_)
            | McpError::PromptNotFound(_)
            | McpError::NotInitialized => error_codes::INVALID_PARAMS,
            McpError::ResourceNotFound { .. } => error_codes::RESOURCE_NOT_FOUND,
            McpError::Rpc { code, .. } => *code,
            _ => error_codes::INTERNAL_ERROR,
        };
        JsonRpcError {
            code,
            message: self.to_string(),
            data: None,
        }
    }

    /// Whether this error means the channel is gone rather than the request failed.
    pub fn is_disconnect(&self) -> bool {
        match self {
            McpError::PeerClosed | McpError::SessionClosed { .. } => true,
            McpError::Transport(e) => is_disconnect_kind(e.kind()),
            _ => false,
        }
    }
}

/// I/O error kinds that mean the other end went away.
pub(crate) fn is_disconnect_kind(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof
    )
}

/// Map a write-side I/O error, turning disconnects into [`McpError::PeerClosed`].
pub(crate) fn classify_io(err: std::io::Error) -> McpError {
    if is_disconnect_kind(err.kind()) {
        McpError::PeerClosed
    } else {
        McpError::Transport(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_codes() {
        assert_eq!(
            McpError::MethodNotFound("x".into()).to_rpc_error().code,
            error_codes::METHOD_NOT_FOUND
        );
        assert_eq!(
            McpError::ToolNotFound("x".into()).to_rpc_error().code,
            error_codes::INVALID_PARAMS
        );
        assert_eq!(
            McpError::ResourceNotFound {
                uri: "table://nope".into(),
                message: "missing".into()
            }
            .to_rpc_error()
            .code,
            error_codes::RESOURCE_NOT_FOUND
        );
        assert_eq!(
            McpError::ProtocolState("early".into()).to_rpc_error().code,
            error_codes::INTERNAL_ERROR
        );
    }

    #[test]
    fn test_broken_pipe_is_peer_closed() {
        let err = classify_io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(matches!(err, McpError::PeerClosed));
        assert!(err.is_disconnect());

        let err = classify_io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(matches!(err, McpError::Transport(_)));
        assert!(!err.is_disconnect());
    }
}
