//! File-locked, hash-chained audit ledger and permission broker.
//!
//! This crate has no knowledge of tools, dispatch, or MCP; it is the
//! storage layer the dispatcher in `nucleus` calls into on every
//! governed action. All three submodules share one `BrainRoot`-rooted
//! directory layout:
//!
//! ```text
//! BrainRoot/
//!   .locks/                 lockfiles, one per resource key
//!   ledger/audit.jsonl       append-only hash chain
//!   ledger/permissions.json  capability grants
//! ```

pub mod audit;
pub mod lock;
pub mod permissions;

pub use audit::{AuditEntry, AuditLedger, AuditOutcome, VerifyReport};
pub use lock::{LockError, LockHandle, LockManager};
pub use permissions::{CapabilityGrant, Decision, GrantRequest, PermissionBroker, PermissionError};
