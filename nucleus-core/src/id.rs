//! Typed ID wrappers for mounts, requests, and agent identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up a mount id with a request id.
/// These are just strings underneath — no UUID enforcement, no format
/// requirement. The protocol doesn't care what your ids look like.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(MountId, "Unique identifier for a mounted child MCP server.");
typed_id!(AgentId, "Identifier of the actor requesting a tool call.");
typed_id!(Fingerprint, "Opaque permission-grant fingerprint (hex SHA-256).");

/// Generate a new random mount id.
///
/// Two mounts of the same `name` never share a mount id, even across an
/// unmount/remount cycle (property 3 in the testable properties list).
pub fn new_mount_id() -> MountId {
    MountId::new(format!("mount-{}", uuid::Uuid::new_v4()))
}
