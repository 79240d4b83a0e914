//! Declared capabilities: the static policy table the Dispatcher consults
//! in step 2 of the pipeline (§4.7).

use serde::{Deserialize, Serialize};

/// The capability a tool declares it needs.
///
/// `Open` tools skip the Permission Broker entirely (step 2 of the
/// dispatch pipeline short-circuits). Any other capability routes
/// through a [`crate::ToolError`]-free `GrantRequest` check — see
/// `nucleus::dispatcher`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// No grant required. The default for read-only/diagnostic tools
    /// and for every tool routed through the Mounter (mounted tools are
    /// opaque third-party servers; their own internal policy, if any,
    /// is out of scope for this registry).
    Open,
    /// A named capability requiring a strict-equality permission grant,
    /// e.g. `"fs_write"`, `"network_egress"`, `"process_spawn"`.
    Named(String),
}

impl Capability {
    /// Construct a named capability.
    pub fn named(name: impl Into<String>) -> Self {
        Capability::Named(name.into())
    }

    /// Whether this capability requires a permission check.
    pub fn requires_grant(&self) -> bool {
        !matches!(self, Capability::Open)
    }

    /// The capability string used in a grant fingerprint, or `"open"`.
    pub fn as_str(&self) -> &str {
        match self {
            Capability::Open => "open",
            Capability::Named(name) => name,
        }
    }
}
