//! # nucleus-core — shared primitives for the nucleus control plane
//!
//! Every other `nucleus-*` crate depends on this one for three things:
//!
//! - typed ids ([`MountId`], [`AgentId`], [`Fingerprint`]),
//! - canonical JSON hashing ([`canonical`]), the only encoding allowed
//!   for audit entries and permission fingerprints, and
//! - the closed error taxonomy ([`error::ErrorKind`]) that every
//!   host-facing error maps onto.
//!
//! None of this depends on `tokio` — it is pure data and hashing logic,
//! shared by both async and sync callers.

pub mod canonical;
pub mod duration;
pub mod error;
pub mod id;

pub use duration::DurationMs;
pub use error::ErrorKind;
pub use id::{new_mount_id, AgentId, Fingerprint, MountId};
