//! MCP transport layer.
//!
//! Defines the `McpTransport` trait for sending/receiving JSON-RPC messages,
//! plus the concrete channels: this process's stdio (server side), a spawned
//! child process (client side), streamable HTTP, and an in-memory pair for
//! tests.

use std::collections::VecDeque;
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::{classify_io, is_disconnect_kind, McpError};

/// Time a child gets to exit on its own after stdin is closed.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Header carrying the server-assigned session on streamable HTTP.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Trait for MCP message transport.
///
/// Implementations handle the wire format (newline-delimited JSON) over
/// different channels. `receive` returning `Ok(None)` is the typed
/// "peer closed" outcome.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Read the next JSON-RPC message line from the transport.
    /// Returns `None` when the transport is closed.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;

    /// Write a JSON-RPC message line to the transport.
    async fn send(&mut self, message: &str) -> Result<(), McpError>;

    /// Gracefully shut the channel down.
    async fn close(&mut self) -> Result<(), McpError> {
        Ok(())
    }

    /// How the server process ended, once `close` has reaped it. Only
    /// channels backed by a child process report one.
    fn exit_kind(&self) -> Option<ExitKind> {
        None
    }
}

/// Stdio-based transport using newline-delimited JSON.
///
/// Reads from stdin, writes to stdout. Each message is a single JSON
/// object terminated by a newline character.
pub struct StdioTransport {
    reader: BufReader<tokio::io::Stdin>,
    writer: tokio::io::Stdout,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        read_message(&mut self.reader).await
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        write_message(&mut self.writer, message).await
    }
}

/// Read one non-empty line. EOF and disconnect errors both mean the peer left.
async fn read_message<R>(reader: &mut R) -> Result<Option<String>, McpError>
where
    R: tokio::io::AsyncBufRead + Unpin + Send,
{
    loop {
        let mut line = String::new();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) if is_disconnect_kind(e.kind()) => return Ok(None),
            Err(e) => return Err(McpError::Transport(e)),
        };
        if bytes_read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
}

async fn write_message<W>(writer: &mut W, message: &str) -> Result<(), McpError>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    writer.write_all(message.as_bytes()).await.map_err(classify_io)?;
    writer.write_all(b"\n").await.map_err(classify_io)?;
    writer.flush().await.map_err(classify_io)?;
    Ok(())
}

/// In-memory transport for testing, backed by channel pairs.
pub struct ChannelTransport {
    rx: tokio::sync::mpsc::Receiver<String>,
    tx: Option<tokio::sync::mpsc::Sender<String>>,
}

impl ChannelTransport {
    /// Create a pair of connected transports.
    ///
    /// Messages sent on one transport are received by the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = tokio::sync::mpsc::channel(32);
        let (tx_b, rx_a) = tokio::sync::mpsc::channel(32);
        (
            Self {
                rx: rx_a,
                tx: Some(tx_a),
            },
            Self {
                rx: rx_b,
                tx: Some(tx_b),
            },
        )
    }
}

#[async_trait]
impl McpTransport for ChannelTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        let tx = self.tx.as_ref().ok_or(McpError::PeerClosed)?;
        tx.send(message.to_string())
            .await
            .map_err(|_| McpError::PeerClosed)
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

// ── Child process ───────────────────────────────────────────────────

#[cfg(unix)]
mod signal {
    pub const SIGINT: i32 = 2;
    pub const SIGKILL: i32 = 9;
    pub const SIGPIPE: i32 = 13;
    pub const SIGTERM: i32 = 15;
}

/// How a child server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Clean,
    Signalled(i32),
    Failed(Option<i32>),
}

impl ExitKind {
    pub fn from_status(status: &ExitStatus) -> Self {
        if status.success() {
            return ExitKind::Clean;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitKind::Signalled(signal);
            }
        }
        ExitKind::Failed(status.code())
    }

    /// Whether this exit is part of an ordinary shutdown. A SIGKILL only
    /// counts when we sent it.
    pub fn is_normal(&self, killed_by_us: bool) -> bool {
        match self {
            ExitKind::Clean => true,
            ExitKind::Signalled(sig) => signal_is_normal(*sig, killed_by_us),
            ExitKind::Failed(_) => false,
        }
    }
}

#[cfg(unix)]
fn signal_is_normal(sig: i32, killed_by_us: bool) -> bool {
    use signal::*;
    matches!(sig, SIGINT | SIGPIPE | SIGTERM) || (killed_by_us && sig == SIGKILL)
}

#[cfg(not(unix))]
fn signal_is_normal(_sig: i32, _killed_by_us: bool) -> bool {
    false
}

/// Client side of a tool server running as a child process.
///
/// The child is owned here; dropping the transport kills and reaps it
/// (the launcher spawns with `kill_on_drop`).
pub struct ChildProcessTransport {
    server: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    exit: Option<ExitKind>,
    closed: bool,
}

impl ChildProcessTransport {
    /// Take over a spawned child. Its stdin and stdout must be piped; a
    /// piped stderr is forwarded into the log.
    pub fn from_child(server: impl Into<String>, mut child: Child) -> Result<Self, McpError> {
        let server = server.into();
        let missing = |pipe: &str| McpError::Connection {
            server: server.clone(),
            reason: format!("child {pipe} is not piped"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            let server = server.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "stderr: {}", line);
                }
            })
        });

        Ok(Self {
            server,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            stderr_task,
            exit: None,
            closed: false,
        })
    }

    /// OS process id, while the child is still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn record_exit(&mut self, status: &ExitStatus, killed_by_us: bool) {
        let kind = ExitKind::from_status(status);
        if kind.is_normal(killed_by_us) {
            debug!(server = %self.server, ?kind, "Server process exited");
        } else {
            warn!(server = %self.server, ?kind, "Server process exited abnormally");
        }
        self.exit = Some(kind);
    }
}

#[async_trait]
impl McpTransport for ChildProcessTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        read_message(&mut self.stdout).await
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        let stdin = self.stdin.as_mut().ok_or(McpError::PeerClosed)?;
        write_message(stdin, message).await
    }

    async fn close(&mut self) -> Result<(), McpError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // EOF on stdin is the shutdown request for stdio servers.
        self.stdin = None;

        let (status, killed) = match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(status) => (status?, false),
            Err(_) => {
                debug!(server = %self.server, "Server ignored stdin close, killing");
                self.child.kill().await?;
                (self.child.wait().await?, true)
            }
        };
        self.record_exit(&status, killed);

        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
        Ok(())
    }

    fn exit_kind(&self) -> Option<ExitKind> {
        self.exit
    }
}

// ── Streamable HTTP ─────────────────────────────────────────────────

/// Client side of a streamable HTTP tool server.
///
/// Every message is one POST. Replies come back either as a JSON body or as
/// a `text/event-stream`; both are queued for `receive`.
pub struct HttpTransport {
    server: String,
    client: reqwest::Client,
    url: Url,
    headers: HeaderMap,
    session_id: Option<String>,
    inbox: VecDeque<String>,
    closed: bool,
}

impl HttpTransport {
    pub fn new(
        server: impl Into<String>,
        client: reqwest::Client,
        url: Url,
        headers: &[(String, String)],
    ) -> Result<Self, McpError> {
        let server = server.into();
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let invalid = |reason: String| McpError::InvalidDescriptor {
                server: server.clone(),
                reason,
            };
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(format!("header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| invalid(format!("header '{name}' value: {e}")))?;
            map.insert(name, value);
        }
        Ok(Self {
            server,
            client,
            url,
            headers: map,
            session_id: None,
            inbox: VecDeque::new(),
            closed: false,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn queue_json(&mut self, body: &str) -> Result<(), McpError> {
        let body = body.trim();
        if body.is_empty() {
            return Ok(());
        }
        match serde_json::from_str::<serde_json::Value>(body)? {
            serde_json::Value::Array(batch) => {
                for message in batch {
                    self.inbox.push_back(message.to_string());
                }
            }
            message => self.inbox.push_back(message.to_string()),
        }
        Ok(())
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        // Nothing queued means the server has nothing more to say on this
        // exchange; there is no standing stream to wait on.
        Ok(self.inbox.pop_front())
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        if self.closed {
            return Err(McpError::PeerClosed);
        }
        let had_session = self.session_id.is_some();

        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string());
        if let Some(id) = &self.session_id {
            request = request.header(SESSION_ID_HEADER, id);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) if had_session && e.is_connect() => return Err(McpError::PeerClosed),
            Err(e) => return Err(McpError::Http(e)),
        };

        if let Some(id) = resp
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(id.to_string());
        }

        let status = resp.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND && had_session {
            debug!(server = %self.server, "HTTP session expired");
            self.session_id = None;
            return Err(McpError::PeerClosed);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Transport(std::io::Error::other(format!(
                "HTTP {status}: {body}"
            ))));
        }

        let is_sse = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_sse {
            let mut events = std::pin::pin!(resp.bytes_stream().eventsource());
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| {
                    McpError::Transport(std::io::Error::other(format!("event stream: {e}")))
                })?;
                // event:, id: and retry: fields carry nothing we route on.
                self.queue_json(&event.data)?;
            }
        } else {
            let body = resp.text().await?;
            self.queue_json(&body)?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inbox.clear();

        let Some(id) = self.session_id.take() else {
            return Ok(());
        };
        let result = self
            .client
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_ID_HEADER, id)
            .send()
            .await;
        if let Err(e) = result {
            debug!(server = %self.server, error = %e, "Session DELETE failed");
        }
        Ok(())
    }
}
