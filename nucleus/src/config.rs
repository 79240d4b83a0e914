//! Config / Brain Root resolution (§4.9).
//!
//! `NucleusConfig` is resolved once at startup from environment
//! variables and an optional `config/nucleus.json` under the resolved
//! BrainRoot, the same `BrainConfig::from_path` idiom as elsewhere in
//! this codebase (a JSON config layered under CLI/env overrides) but
//! starting from env since this process has no CLI flags of its own
//! beyond the root subcommand dispatch in `main.rs`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use nucleus_tool::Tier;

use crate::error::NucleusError;

/// Env var naming the BrainRoot directory. Kept as this literal name
/// for backward compatibility, even though every other nucleus-specific
/// env var is prefixed `NUCLEUS_`.
pub const BRAIN_PATH_ENV: &str = "NUCLEAR_BRAIN_PATH";

/// Env var selecting the visibility tier directly (`"0"`/`"1"`/`"2"`).
pub const TOOL_TIER_ENV: &str = "NUCLEUS_TOOL_TIER";

/// Env var whose value, if it matches [`BETA_TOKEN_PLACEHOLDER`], grants
/// Tier 2 without an explicit `NUCLEUS_TOOL_TIER`. A stand-in for a
/// signed-token mechanism — see DESIGN.md for the open-question record.
pub const BETA_TOKEN_ENV: &str = "NUCLEUS_BETA_TOKEN";

/// The fixed placeholder value `NUCLEUS_BETA_TOKEN` must equal to grant
/// Tier 2 in this version.
pub const BETA_TOKEN_PLACEHOLDER: &str = "nucleus-advanced-preview";

const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
const DEFAULT_CALL_DEADLINE: Duration = Duration::from_secs(120);
const DEFAULT_INITIALIZE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide immutable configuration, resolved once at startup.
/// Never persisted; recomputed each run.
#[derive(Debug, Clone)]
pub struct NucleusConfig {
    pub brain_root: PathBuf,
    pub tier: Tier,
    pub lock_wait: Duration,
    pub default_call_deadline: Duration,
    pub initialize_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub strict: bool,
}

/// The optional `config/nucleus.json` file overriding numeric tunables.
/// All fields optional; absent fields keep the env/default value.
#[derive(Debug, Deserialize, Default)]
struct FileOverrides {
    lock_wait_ms: Option<u64>,
    default_call_deadline_ms: Option<u64>,
    initialize_timeout_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
}

impl NucleusConfig {
    /// Resolve configuration from the process environment, then layer
    /// `BrainRoot/config/nucleus.json` on top if it exists.
    pub fn resolve(strict: bool) -> Result<Self, NucleusError> {
        Self::resolve_from_env(strict, |key| std::env::var(key).ok())
    }

    /// Same as [`resolve`](Self::resolve) but takes an explicit env
    /// lookup function, so tests can resolve deterministically without
    /// mutating the real process environment.
    pub fn resolve_from_env(
        strict: bool,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, NucleusError> {
        let brain_root = match lookup(BRAIN_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir().map_err(NucleusError::from)?.join(".brain"),
        };

        let tier = resolve_tier(&lookup);

        let mut config = NucleusConfig {
            brain_root,
            tier,
            lock_wait: DEFAULT_LOCK_WAIT,
            default_call_deadline: DEFAULT_CALL_DEADLINE,
            initialize_timeout: DEFAULT_INITIALIZE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            strict,
        };

        let overrides_path = config.brain_root.join("config").join("nucleus.json");
        if overrides_path.exists() {
            config.apply_file_overrides(&overrides_path)?;
        }

        Ok(config)
    }

    fn apply_file_overrides(&mut self, path: &Path) -> Result<(), NucleusError> {
        let contents = std::fs::read_to_string(path).map_err(NucleusError::from)?;
        let overrides: FileOverrides =
            serde_json::from_str(&contents).map_err(|e| NucleusError::Config(e.to_string()))?;

        if let Some(ms) = overrides.lock_wait_ms {
            self.lock_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.default_call_deadline_ms {
            self.default_call_deadline = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.initialize_timeout_ms {
            self.initialize_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.shutdown_timeout_ms {
            self.shutdown_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    /// Create `ledger/`, `engrams/`, `sessions/`, `config/`, `.locks/`
    /// under BrainRoot. Idempotent.
    pub fn ensure_brain_root(&self) -> Result<(), NucleusError> {
        for sub in ["ledger", "engrams", "sessions", "config", ".locks"] {
            std::fs::create_dir_all(self.brain_root.join(sub))
                .map_err(|e| NucleusError::BrainRootUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.brain_root.join("ledger")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.brain_root.join(".locks")
    }
}

fn resolve_tier(lookup: &impl Fn(&str) -> Option<String>) -> Tier {
    if let Some(raw) = lookup(TOOL_TIER_ENV) {
        if let Some(tier) = Tier::from_numeric_str(&raw) {
            return tier;
        }
    }
    if lookup(BETA_TOKEN_ENV).as_deref() == Some(BETA_TOKEN_PLACEHOLDER) {
        return Tier::Advanced;
    }
    Tier::Launch
}
