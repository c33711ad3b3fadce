//! MCP transports: pluggable byte carriers for JSON-RPC messages.
//!
//! - stdio: spawn a child process, one JSON object per line
//! - HTTP: POST each outbound message, responses land in an inbox;
//!   an optional SSE stream carries server-initiated messages
//!
//! Transports deal in raw `serde_json::Value`s; framing and
//! correlation live in the client.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, McpError, Result};

/// A bidirectional JSON-RPC byte transport.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Open the transport.
    async fn connect(&self) -> Result<()>;

    /// Close the transport and release resources.
    async fn disconnect(&self) -> Result<()>;

    /// Send one message.
    async fn send(&self, message: Value) -> Result<()>;

    /// Receive the next message. Blocks until one arrives or the
    /// transport dies.
    async fn receive(&self) -> Result<Value>;

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Stdio transport: a child process speaking line-delimited JSON.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Create a transport for a server command.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        StdioTransport {
            command: command.into(),
            args,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn connect(&self) -> Result<()> {
        debug!("Spawning MCP server: {} {:?}", self.command, self.args);

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Mcp(McpError::ConnectionError(format!(
                    "failed to spawn '{}': {}",
                    self.command, e
                )))
            })?;

        // A server that dies right after spawn (bad command, missing
        // interpreter) must fail the connect, not the first request.
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(Error::Mcp(McpError::ConnectionError(format!(
                "'{}' exited immediately with {}",
                self.command, status
            ))));
        }

        let stdin = child.stdin.take().ok_or_else(|| {
            Error::Mcp(McpError::ConnectionError("failed to capture stdin".to_string()))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Mcp(McpError::ConnectionError("failed to capture stdout".to_string()))
        })?;

        // Drain stderr to the logs so a chatty server can't block.
        if let Some(stderr) = child.stderr.take() {
            let command = self.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{} stderr] {}", command, line);
                }
            });
        }

        *self.stdin.lock().await = Some(stdin);
        *self.stdout.lock().await = Some(BufReader::new(stdout));
        *self.child.lock().await = Some(child);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        *self.stdin.lock().await = None;
        *self.stdout.lock().await = None;
        if let Some(mut child) = self.child.lock().await.take() {
            child.start_kill().ok();
        }
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<()> {
        let line = serde_json::to_string(&message)?;
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or_else(|| {
            Error::Mcp(McpError::ConnectionError("transport not connected".to_string()))
        })?;

        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Mcp(McpError::ConnectionError(format!("write failed: {}", e))))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Mcp(McpError::ConnectionError(format!("write failed: {}", e))))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Mcp(McpError::ConnectionError(format!("flush failed: {}", e))))?;
        Ok(())
    }

    async fn receive(&self) -> Result<Value> {
        let mut stdout = self.stdout.lock().await;
        let reader = stdout.as_mut().ok_or_else(|| {
            Error::Mcp(McpError::ConnectionError("transport not connected".to_string()))
        })?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await.map_err(|e| {
            Error::Mcp(McpError::ConnectionError(format!("read failed: {}", e)))
        })?;
        if read == 0 {
            self.connected.store(false, Ordering::SeqCst);
            return Err(Error::Mcp(McpError::ConnectionError(
                "server closed the connection".to_string(),
            )));
        }

        serde_json::from_str(line.trim())
            .map_err(|e| Error::Mcp(McpError::ParseError(format!("{} (raw: {})", e, line.trim()))))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// HTTP transport: POST per message plus an optional SSE stream for
/// server-initiated traffic.
pub struct HttpTransport {
    url: String,
    enable_sse: bool,
    client: reqwest::Client,
    inbox_tx: mpsc::UnboundedSender<Value>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Value>>,
    connected: AtomicBool,
    closing: Arc<AtomicBool>,
    sse_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HttpTransport {
    /// Create a transport for a server URL.
    pub fn new(url: impl Into<String>, enable_sse: bool) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url)
            .map_err(|e| Error::Config(format!("invalid MCP server URL '{}': {}", url, e)))?;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Ok(HttpTransport {
            url,
            enable_sse,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()?,
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            connected: AtomicBool::new(false),
            closing: Arc::new(AtomicBool::new(false)),
            sse_task: Mutex::new(None),
        })
    }

    /// Background SSE loop: GET the URL, forward `data:` payloads into
    /// the inbox until the closing flag is set.
    async fn listen_sse(
        client: reqwest::Client,
        url: String,
        inbox: mpsc::UnboundedSender<Value>,
        closing: Arc<AtomicBool>,
    ) {
        let response = match client
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("SSE stream for {} failed to open: {}", url, e);
                return;
            }
        };

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            if closing.load(Ordering::SeqCst) {
                return;
            }
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("SSE stream for {} ended: {}", url, e);
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                match serde_json::from_str::<Value>(data.trim()) {
                    Ok(value) => {
                        if inbox.send(value).is_err() {
                            return;
                        }
                    }
                    Err(e) => debug!("Skipping unparseable SSE payload: {}", e),
                }
            }
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn connect(&self) -> Result<()> {
        // A failing health probe is tolerated: some servers only accept
        // POSTs.
        if let Err(e) = self.client.get(&self.url).send().await {
            debug!("Health probe for {} failed (continuing): {}", self.url, e);
        }

        if self.enable_sse {
            let task = tokio::spawn(Self::listen_sse(
                self.client.clone(),
                self.url.clone(),
                self.inbox_tx.clone(),
                Arc::clone(&self.closing),
            ));
            *self.sse_task.lock().await = Some(task);
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.sse_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Mcp(McpError::ConnectionError(
                "transport not connected".to_string(),
            )));
        }

        let response = self
            .client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                Error::Mcp(McpError::ConnectionError(format!("HTTP request failed: {}", e)))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Mcp(McpError::ConnectionError(format!(
                "HTTP {} from {}",
                status, self.url
            ))));
        }

        // Notifications get empty bodies; only queue real replies.
        let body = response.text().await.unwrap_or_default();
        if !body.trim().is_empty() {
            let value: Value = serde_json::from_str(&body)
                .map_err(|e| Error::Mcp(McpError::ParseError(e.to_string())))?;
            self.inbox_tx.send(value).map_err(|_| {
                Error::Mcp(McpError::ConnectionError("inbox closed".to_string()))
            })?;
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Value> {
        let mut inbox = self.inbox_rx.lock().await;
        inbox.recv().await.ok_or_else(|| {
            Error::Mcp(McpError::ConnectionError("inbox closed".to_string()))
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
