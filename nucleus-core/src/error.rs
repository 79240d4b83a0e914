//! The closed error taxonomy shared by every layer of nucleus.
//!
//! Every error a host-facing call can produce maps to exactly one
//! [`ErrorKind`], which in turn maps to a stable numeric code the host
//! can match on without string comparison (§7).

use thiserror::Error;

/// The closed set of error kinds surfaced to the host, one per row of
/// the error table in §7. Not a type hierarchy — a flat tag set.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A host frame could not be parsed (bad JSON, oversize, embedded NUL).
    #[error("parse error: {0}")]
    ParseError(String),

    /// A request arrived before `initialize`.
    #[error("server not initialized")]
    NotInitialized,

    /// The requested tool does not exist in the registry.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The requested tool exists but is not visible at the current tier.
    #[error("tool not visible at current tier: {0}")]
    ToolNotVisible(String),

    /// The caller lacks a grant for this exact request fingerprint.
    #[error("permission denied, grant required for fingerprint {fingerprint}")]
    PermissionDenied {
        /// The fingerprint the host should pass to `brain_grant_permission`.
        fingerprint: String,
    },

    /// A named lock could not be acquired within the configured wait.
    #[error("lock contended: {0}")]
    LockContended(String),

    /// An external call exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The child process backing a mount exited unexpectedly.
    #[error("child closed: {0}")]
    ChildClosed(String),

    /// A native or mounted tool handler returned an application-level error.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// The audit ledger could not be written; the call itself still succeeded.
    #[error("audit write failed: {0}")]
    AuditWriteFailed(String),

    /// A startup or runtime invariant was violated (e.g. a broken audit chain with `--strict`).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ErrorKind {
    /// The project-specific numeric application code for this kind, or
    /// the JSON-RPC 2.0 reserved code for parse errors.
    pub fn code(&self) -> i64 {
        match self {
            ErrorKind::ParseError(_) => -32700,
            ErrorKind::NotInitialized => 1001,
            ErrorKind::ToolNotFound(_) => 1002,
            ErrorKind::ToolNotVisible(_) => 1003,
            ErrorKind::PermissionDenied { .. } => 1010,
            ErrorKind::LockContended(_) => 1020,
            ErrorKind::Timeout(_) => 1030,
            ErrorKind::ChildClosed(_) => 1031,
            ErrorKind::HandlerError(_) => 1040,
            ErrorKind::AuditWriteFailed(_) => 1050,
            ErrorKind::InvariantViolation(_) => 1090,
        }
    }

    /// Whether this error, raised at startup, should cause the process
    /// to exit non-zero (exit code 3, per §6) rather than just be logged.
    pub fn is_fatal_invariant(&self) -> bool {
        matches!(self, ErrorKind::InvariantViolation(_))
    }

    /// The permission fingerprint carried by a `PermissionDenied`, if any.
    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            ErrorKind::PermissionDenied { fingerprint } => Some(fingerprint),
            _ => None,
        }
    }
}

/// Truncate a handler error message to the 4 KiB cap before it is
/// hashed into an audit entry or surfaced to the host (§7).
pub fn truncate_message(message: &str) -> String {
    const CAP: usize = 4 * 1024;
    if message.len() <= CAP {
        return message.to_string();
    }
    let mut end = CAP;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &message[..end])
}
