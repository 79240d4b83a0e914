//! Visibility tiers (§4.4).
//!
//! A fixed ordering `Launch < Standard < Advanced`: a tool registered
//! with a given `min_tier` is visible at that tier and every tier above it.

use serde::{Deserialize, Serialize};

/// The visibility tier resolved once at startup from the environment
/// (`NUCLEUS_TOOL_TIER` or `NUCLEUS_BETA_TOKEN`, see `nucleus::config`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Only an allow-listed subset is visible to the host.
    Launch = 0,
    /// Adds ops and orchestration tools.
    Standard = 1,
    /// No filtering — every registered tool is visible.
    Advanced = 2,
}

impl Tier {
    /// Parse a tier from its numeric string form (`"0"`, `"1"`, `"2"`),
    /// as read from `NUCLEUS_TOOL_TIER`. Unrecognized input is `None`.
    pub fn from_numeric_str(s: &str) -> Option<Tier> {
        match s.trim() {
            "0" => Some(Tier::Launch),
            "1" => Some(Tier::Standard),
            "2" => Some(Tier::Advanced),
            _ => None,
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Launch
    }
}
