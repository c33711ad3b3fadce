//! MCP client: JSON-RPC request/response multiplexing over a transport.
//!
//! State machine: disconnected → connecting → initialised → (active) →
//! disconnecting → disconnected. A reader task routes inbound traffic:
//! responses complete pending-request entries keyed by id, server
//! requests and notifications go to an optional handler, and unmatched
//! messages are logged and dropped. A connection error fails every
//! inflight waiter and marks the session dead until `connect` is called
//! again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Error, McpError, Result};

use super::protocol::{
    parse_message, McpMessage, McpNotification, McpPrompt, McpRequest, McpResource,
    McpResourceTemplate, McpServerInfo, McpTool, McpToolResult,
};
use super::transport::McpTransport;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Initialised,
    Disconnecting,
}

/// Handles server-initiated requests and notifications.
#[async_trait::async_trait]
pub trait ServerHandler: Send + Sync {
    /// Handle a request from the server; the returned value becomes the
    /// response result.
    async fn handle_request(&self, request: &McpRequest) -> Result<Value>;

    /// Handle a notification from the server.
    async fn handle_notification(&self, notification: &McpNotification);
}

type PendingTable = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

/// MCP client over a pluggable transport.
pub struct McpClient {
    name: String,
    transport: Arc<dyn McpTransport>,
    state: Arc<RwLock<ClientState>>,
    pending: PendingTable,
    next_id: AtomicI64,
    server_info: StdMutex<Option<McpServerInfo>>,
    handler: StdMutex<Option<Arc<dyn ServerHandler>>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    default_timeout: Duration,
}

impl McpClient {
    /// Create a client for a named server over a transport.
    pub fn new(name: impl Into<String>, transport: Arc<dyn McpTransport>) -> Self {
        McpClient {
            name: name.into(),
            transport,
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            server_info: StdMutex::new(None),
            handler: StdMutex::new(None),
            reader: Mutex::new(None),
            default_timeout: Duration::from_secs(30),
        }
    }

    /// Builder: default per-request timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a handler for server-initiated messages.
    pub fn set_handler(&self, handler: Arc<dyn ServerHandler>) {
        *self.handler.lock().expect("handler lock poisoned") = Some(handler);
    }

    /// The server name this client talks to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        *self.state.read().expect("state lock poisoned")
    }

    /// Server info recorded during initialize.
    pub fn server_info(&self) -> Option<McpServerInfo> {
        self.server_info
            .lock()
            .expect("server info lock poisoned")
            .clone()
    }

    fn set_state(&self, state: ClientState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    /// Open the transport, start the reader, and run `initialize`.
    pub async fn connect(&self) -> Result<()> {
        if self.state() == ClientState::Initialised {
            return Ok(());
        }
        self.set_state(ClientState::Connecting);

        if let Err(e) = self.transport.connect().await {
            self.set_state(ClientState::Disconnected);
            return Err(e);
        }

        self.spawn_reader().await;

        match self
            .request_internal("initialize", None, self.default_timeout, true)
            .await
        {
            Ok(result) => {
                let info = McpServerInfo::from_initialize(&result);
                info!(
                    "MCP server {} initialised: {} v{}",
                    self.name, info.name, info.version
                );
                *self
                    .server_info
                    .lock()
                    .expect("server info lock poisoned") = Some(info);
                self.set_state(ClientState::Initialised);
                Ok(())
            }
            Err(e) => {
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Close the connection.
    pub async fn disconnect(&self) -> Result<()> {
        self.set_state(ClientState::Disconnecting);
        self.teardown().await;
        Ok(())
    }

    async fn teardown(&self) {
        if let Some(task) = self.reader.lock().await.take() {
            task.abort();
        }
        self.transport.disconnect().await.ok();
        self.fail_pending().await;
        self.set_state(ClientState::Disconnected);
    }

    async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, waiter) in pending.drain() {
            let _ = waiter.send(Err(Error::Mcp(McpError::ConnectionError(format!(
                "connection to {} lost",
                self.name
            )))));
        }
    }

    async fn spawn_reader(&self) {
        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        let state = Arc::clone(&self.state);
        let name = self.name.clone();
        let handler = self
            .handler
            .lock()
            .expect("handler lock poisoned")
            .clone();

        let task = tokio::spawn(async move {
            loop {
                match transport.receive().await {
                    Ok(value) => {
                        Self::route(&name, value, &pending, handler.as_ref(), &transport).await;
                    }
                    Err(Error::Mcp(McpError::ParseError(e))) => {
                        // Garbage on the wire is logged, not fatal.
                        warn!("MCP {}: unparseable message: {}", name, e);
                    }
                    Err(e) => {
                        debug!("MCP {} reader stopping: {}", name, e);
                        let mut table = pending.lock().await;
                        for (_, waiter) in table.drain() {
                            let _ = waiter.send(Err(Error::Mcp(McpError::ConnectionError(
                                format!("connection to {} lost", name),
                            ))));
                        }
                        *state.write().expect("state lock poisoned") = ClientState::Disconnected;
                        return;
                    }
                }
            }
        });

        *self.reader.lock().await = Some(task);
    }

    async fn route(
        name: &str,
        value: Value,
        pending: &PendingTable,
        handler: Option<&Arc<dyn ServerHandler>>,
        transport: &Arc<dyn McpTransport>,
    ) {
        let message = match parse_message(value) {
            Ok(message) => message,
            Err(e) => {
                warn!("MCP {}: dropping invalid message: {}", name, e);
                return;
            }
        };

        match message {
            McpMessage::Response(response) => {
                let Some(id) = response.id else {
                    warn!("MCP {}: response without id dropped", name);
                    return;
                };
                let waiter = pending.lock().await.remove(&id.key());
                match waiter {
                    Some(waiter) => {
                        let outcome = match response.error {
                            Some(error) => {
                                Err(Error::Mcp(McpError::from_code(error.code, error.message)))
                            }
                            None => Ok(response.result.unwrap_or(Value::Null)),
                        };
                        let _ = waiter.send(outcome);
                    }
                    None => {
                        // Late responses (e.g. after a timeout purge)
                        // are dropped, keeping delivery exactly-once.
                        warn!("MCP {}: unmatched response id {} dropped", name, id);
                    }
                }
            }
            McpMessage::Request(request) => match handler {
                Some(handler) => {
                    let response = match handler.handle_request(&request).await {
                        Ok(result) => serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": request.id,
                            "result": result,
                        }),
                        Err(e) => serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": request.id,
                            "error": {"code": -32603, "message": e.to_string()},
                        }),
                    };
                    if let Err(e) = transport.send(response).await {
                        warn!("MCP {}: failed to answer server request: {}", name, e);
                    }
                }
                None => {
                    debug!(
                        "MCP {}: unhandled server request '{}' (no handler)",
                        name, request.method
                    );
                }
            },
            McpMessage::Notification(notification) => match handler {
                Some(handler) => handler.handle_notification(&notification).await,
                None => {
                    debug!(
                        "MCP {}: ignoring notification '{}'",
                        name, notification.method
                    );
                }
            },
        }
    }

    /// Send a request and await its response or the deadline.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.request_internal(
            method,
            params,
            timeout.unwrap_or(self.default_timeout),
            false,
        )
        .await
    }

    async fn request_internal(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        during_connect: bool,
    ) -> Result<Value> {
        if !during_connect && self.state() != ClientState::Initialised {
            return Err(Error::Mcp(McpError::ConnectionError(format!(
                "client for {} is not connected",
                self.name
            ))));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = if method == "initialize" {
            McpRequest::initialize(id)
        } else {
            McpRequest::new(id, method, params)
        };
        let key = request.id.key();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(key.clone(), tx);

        debug!("MCP {} -> {} (id {})", self.name, method, key);
        if let Err(e) = self.transport.send(serde_json::to_value(&request)?).await {
            self.pending.lock().await.remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Mcp(McpError::ConnectionError(format!(
                "connection to {} lost",
                self.name
            )))),
            Err(_) => {
                // Exactly one pending entry is purged; a late response
                // will be dropped as unmatched.
                self.pending.lock().await.remove(&key);
                Err(Error::Mcp(McpError::RequestTimeout(format!(
                    "{} on {} after {:?}",
                    method, self.name, timeout
                ))))
            }
        }
    }

    /// Fire-and-forget notification; allocates no pending entry.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.state() != ClientState::Initialised {
            return Err(Error::Mcp(McpError::ConnectionError(format!(
                "client for {} is not connected",
                self.name
            ))));
        }
        let notification = McpNotification::new(method, params);
        self.transport
            .send(serde_json::to_value(&notification)?)
            .await
    }

    // Capability surface -------------------------------------------------

    /// List the server's tools.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let result = self.request("tools/list", None, None).await?;
        Ok(result
            .get("tools")
            .and_then(|tools| serde_json::from_value(tools.clone()).ok())
            .unwrap_or_default())
    }

    /// Call a tool on the server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<McpToolResult> {
        let result = self
            .request(
                "tools/call",
                Some(serde_json::json!({"name": name, "arguments": arguments})),
                timeout,
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// List the server's resources.
    pub async fn list_resources(&self) -> Result<Vec<McpResource>> {
        let result = self.request("resources/list", None, None).await?;
        Ok(result
            .get("resources")
            .and_then(|r| serde_json::from_value(r.clone()).ok())
            .unwrap_or_default())
    }

    /// Read a resource's contents.
    pub async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.request(
            "resources/read",
            Some(serde_json::json!({"uri": uri})),
            None,
        )
        .await
    }

    /// List the server's resource templates.
    pub async fn list_resource_templates(&self) -> Result<Vec<McpResourceTemplate>> {
        let result = self.request("resources/templates/list", None, None).await?;
        Ok(result
            .get("resourceTemplates")
            .and_then(|t| serde_json::from_value(t.clone()).ok())
            .unwrap_or_default())
    }

    /// List the server's prompts.
    pub async fn list_prompts(&self) -> Result<Vec<McpPrompt>> {
        let result = self.request("prompts/list", None, None).await?;
        Ok(result
            .get("prompts")
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .unwrap_or_default())
    }

    /// Fetch a prompt with arguments.
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        let mut params = serde_json::json!({"name": name});
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.request("prompts/get", Some(params), None).await
    }
}
