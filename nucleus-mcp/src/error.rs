//! Errors from the wire protocol and the child client.

use thiserror::Error;

/// Errors surfaced by [`crate::client::ChildMcpClient`] and the protocol
/// codec. Maps 1:1 onto the subset of `nucleus_core::ErrorKind` relevant
/// to child communication; kept as its own enum (rather than reusing
/// `ErrorKind` directly) so this crate has no opinion on JSON-RPC app
/// codes, only on what went wrong talking to a child.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum McpError {
    /// The child process could not be spawned.
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// The `initialize` handshake did not complete within its deadline.
    #[error("initialize timed out after {0:?}")]
    InitializeTimeout(std::time::Duration),

    /// The child replied to `initialize` with an error or malformed body.
    #[error("initialize failed: {0}")]
    InitializeFailed(String),

    /// A call did not receive a reply before its deadline.
    #[error("call timed out: {0}")]
    Timeout(String),

    /// The child process exited (or its stdout/stdin closed) while a
    /// call was outstanding, or before a new call could be issued.
    #[error("child closed: {0}")]
    ChildClosed(String),

    /// The child returned a JSON-RPC error object for a call.
    #[error("remote error {code}: {message}")]
    Remote {
        /// JSON-RPC / application error code as reported by the child.
        code: i64,
        /// Error message as reported by the child.
        message: String,
    },

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Writing to or reading from the child's pipes failed.
    #[error("io error: {0}")]
    Io(String),
}

impl From<McpError> for nucleus_core::ErrorKind {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Timeout(m) => nucleus_core::ErrorKind::Timeout(m),
            McpError::InitializeTimeout(d) => {
                nucleus_core::ErrorKind::Timeout(format!("initialize timed out after {d:?}"))
            }
            McpError::ChildClosed(m) => nucleus_core::ErrorKind::ChildClosed(m),
            McpError::Remote { code, message } => {
                nucleus_core::ErrorKind::HandlerError(format!("remote error {code}: {message}"))
            }
            McpError::Spawn(m) | McpError::InitializeFailed(m) | McpError::Io(m) => {
                nucleus_core::ErrorKind::ChildClosed(m)
            }
            McpError::Protocol(m) => nucleus_core::ErrorKind::ParseError(m),
        }
    }
}
