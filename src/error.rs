//! Error types for OpenForge

use thiserror::Error;

/// Result type alias using OpenForge's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for OpenForge
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// MCP protocol or transport error
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// Plugin loading or lifecycle error
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Hook execution error
    #[error("Hook error: {0}")]
    Hook(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider(p) => p.is_retryable(),
            Error::Http(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::NotFound(_))
    }
}

/// Errors raised by the LLM transport layer.
///
/// `Network` and `Server` are transient and retried with backoff; the
/// rest fail the request immediately.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Rate limit exceeded (HTTP 429)
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Authentication failed (HTTP 401/403)
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Malformed request rejected by the provider (HTTP 4xx)
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Provider-side failure (HTTP 5xx)
    #[error("server error: {0}")]
    ServerError(String),

    /// Connection-level failure (DNS, TLS, reset, timeout)
    #[error("network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Whether the request may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::ServerError(_) | ProviderError::NetworkError(_)
        )
    }
}

/// Errors surfaced by the MCP client.
///
/// The JSON-RPC variants mirror the standard error codes; `RequestTimeout`
/// and `ConnectionError` are client-local. A `ConnectionError` marks the
/// session dead and forces a reconnect on next use.
#[derive(Error, Debug)]
pub enum McpError {
    /// JSON-RPC -32700
    #[error("parse error: {0}")]
    ParseError(String),

    /// JSON-RPC -32600
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// JSON-RPC -32601
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// JSON-RPC -32602
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// JSON-RPC -32603
    #[error("internal error: {0}")]
    InternalError(String),

    /// Server returned a non-standard error code
    #[error("server error {code}: {message}")]
    ServerError { code: i64, message: String },

    /// No response before the request deadline
    #[error("request timed out: {0}")]
    RequestTimeout(String),

    /// Transport failed; the session must reconnect
    #[error("connection error: {0}")]
    ConnectionError(String),
}

impl McpError {
    /// Map a JSON-RPC error code to the matching variant.
    pub fn from_code(code: i64, message: String) -> Self {
        match code {
            -32700 => McpError::ParseError(message),
            -32600 => McpError::InvalidRequest(message),
            -32601 => McpError::MethodNotFound(message),
            -32602 => McpError::InvalidParams(message),
            -32603 => McpError::InternalError(message),
            _ => McpError::ServerError { code, message },
        }
    }
}

/// Errors raised while loading or managing plugins.
///
/// A plugin that fails with any of these is quarantined: recorded in the
/// load-errors table and never registered.
#[derive(Error, Debug)]
pub enum PluginError {
    /// Plugin could not be read or instantiated
    #[error("load failed: {0}")]
    Load(String),

    /// register/unregister lifecycle call failed
    #[error("lifecycle failure: {0}")]
    Lifecycle(String),

    /// Manifest missing or malformed
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// Required dependency missing
    #[error("unsatisfied dependency: {0}")]
    Dependency(String),

    /// Plugin configuration rejected
    #[error("invalid configuration: {0}")]
    Config(String),
}
