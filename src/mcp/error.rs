use rust_mcp_schema::RpcError;
use std::error::Error as StdError;
use std::fmt;

/// Errors raised by MCP transports, decorators and the session manager.
#[derive(Debug, Clone)]
pub enum McpError {
    /// A transport-level failure (network, HTTP status, frame channel, or a
    /// JSON-RPC error object returned by the remote server).
    Transport {
        message: String,
        code: Option<i64>,
        detail: Option<String>,
    },

    /// The remote side answered with something that does not match the
    /// protocol (unparseable JSON, missing fields, unexpected message kind).
    Protocol(String),

    /// A payment requirement was rejected against the configured limits.
    PaymentValidation(String),

    /// The identity capability could not produce a signature.
    AuthSigning(String),

    /// A response stream exhausted its retries.
    Stream(String),

    /// One server of a cap failed while the session set was being opened.
    CapInitialization {
        server: String,
        source: Box<McpError>,
    },
}

pub type McpResult<T> = Result<T, McpError>;

impl McpError {
    pub fn transport(message: impl Into<String>) -> Self {
        McpError::Transport {
            message: message.into(),
            code: None,
            detail: None,
        }
    }

    pub fn transport_with_code(
        message: impl Into<String>,
        code: i64,
        detail: Option<String>,
    ) -> Self {
        McpError::Transport {
            message: message.into(),
            code: Some(code),
            detail,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        McpError::Protocol(message.into())
    }

    /// Wraps a JSON-RPC error object, keeping its code and any `data` payload.
    pub fn from_rpc_error(error: &RpcError) -> Self {
        let detail = error.data.as_ref().and_then(|data| {
            data.get("details")
                .and_then(|value| value.as_str())
                .map(|value| value.to_string())
                .or_else(|| data.as_str().map(|value| value.to_string()))
                .or_else(|| serde_json::to_string_pretty(data).ok())
                .filter(|details| !details.is_empty())
        });
        McpError::Transport {
            message: error.message.clone(),
            code: Some(error.code),
            detail,
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            McpError::Transport { code, .. } => *code,
            McpError::CapInitialization { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Name of the server that broke a cap initialization, if any.
    pub fn failing_server(&self) -> Option<&str> {
        match self {
            McpError::CapInitialization { server, .. } => Some(server),
            _ => None,
        }
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::Transport {
                message,
                code,
                detail,
            } => {
                match code {
                    Some(code) => write!(f, "MCP error {code}: {message}")?,
                    None => write!(f, "MCP transport error: {message}")?,
                }
                if let Some(detail) = detail {
                    write!(f, "\n{detail}")?;
                }
                Ok(())
            }
            McpError::Protocol(message) => write!(f, "MCP protocol error: {message}"),
            McpError::PaymentValidation(message) => {
                write!(f, "Payment requirement rejected: {message}")
            }
            McpError::AuthSigning(message) => write!(f, "Request signing failed: {message}"),
            McpError::Stream(message) => write!(f, "Response stream failed: {message}"),
            McpError::CapInitialization { server, source } => {
                write!(f, "Failed to initialize MCP server '{server}': {source}")
            }
        }
    }
}

impl StdError for McpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            McpError::CapInitialization { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => McpError::transport_with_code(
                format!("HTTP error: {status}"),
                i64::from(status.as_u16()),
                None,
            ),
            None => McpError::transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Protocol(err.to_string())
    }
}
