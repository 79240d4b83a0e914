//! `nucleus`: a recursive MCP aggregator and governed tool dispatch
//! control-plane. Mounts child MCP servers, exposes a fixed set of
//! `brain_*` administrative tools alongside them, and governs every
//! call through a tiered-visibility, capability-gated, hash-chained
//! audit pipeline (§4).
//!
//! This crate is organized the way `brain` splits from its `neuron-*`
//! libraries elsewhere in this codebase: protocol and domain types live
//! in sibling crates (`nucleus-core`, `nucleus-tool`, `nucleus-mcp`,
//! `nucleus-ledger`), and this crate is the orchestration layer that
//! wires them into a runnable process.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod mounter;
pub mod native_tools;
pub mod server;
pub mod watcher;

use std::sync::Arc;

use nucleus_ledger::{AuditLedger, LockManager, PermissionBroker};
use nucleus_tool::ToolRegistry;
use tracing::{info, warn};

use config::NucleusConfig;
use context::NucleusContext;
use dispatcher::Dispatcher;
use error::NucleusError;
use mounter::Mounter;
use server::StdioServer;

/// The name and version reported to `initialize` callers. Follows the
/// same `McpServer::new(registry, "brain", env!("CARGO_PKG_VERSION"))`
/// pattern used elsewhere in this codebase.
pub const SERVER_NAME: &str = "nucleus-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Assemble every collaborator from a resolved [`NucleusConfig`] and
/// serve stdio until the host closes stdin. This is the single
/// entry point `main.rs` calls for the `serve` subcommand; factored
/// out of `main` so integration tests can drive the same bootstrap
/// path over an in-memory duplex instead of real stdio.
pub async fn bootstrap(config: NucleusConfig) -> Result<StdioServer, NucleusError> {
    config.ensure_brain_root()?;

    let locks = LockManager::new(config.locks_dir(), config.lock_wait);
    let ledger = Arc::new(AuditLedger::new(config.ledger_dir(), locks.clone()));
    let broker = Arc::new(PermissionBroker::new(config.ledger_dir(), locks.clone()));
    let mounter = Arc::new(Mounter::new(
        config.ledger_dir(),
        locks.clone(),
        config.initialize_timeout,
    ));

    verify_ledger_integrity(&ledger, config.strict).await?;

    mounter.restore().await.map_err(|e| {
        NucleusError::InvariantViolated(format!("failed to restore prior mounts: {e}"))
    })?;

    let ctx = Arc::new(NucleusContext::new(
        Arc::clone(&mounter),
        Arc::clone(&broker),
        Arc::clone(&ledger),
        config.tier,
        config.default_call_deadline,
    ));

    let mut registry = ToolRegistry::new();
    native_tools::register_all(Arc::clone(&ctx), &mut registry);
    let registry = Arc::new(registry);

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&mounter),
        Arc::clone(&broker),
        Arc::clone(&ledger),
        config.tier,
        config.default_call_deadline,
    ));

    info!(tier = ?config.tier, brain_root = %config.brain_root.display(), "nucleus bootstrapped");

    Ok(StdioServer::new(
        registry,
        mounter,
        dispatcher,
        config.tier,
        SERVER_NAME,
        SERVER_VERSION,
        config.shutdown_timeout,
    ))
}

/// Verify the audit chain at startup (§4.10). Under `--strict`, a
/// broken chain is a fatal invariant violation (exit code 3); outside
/// `--strict` it is only logged, since an operator may be recovering
/// from a known-bad ledger deliberately.
async fn verify_ledger_integrity(ledger: &AuditLedger, strict: bool) -> Result<(), NucleusError> {
    let report = ledger
        .verify()
        .await
        .map_err(|e| NucleusError::InvariantViolated(format!("audit chain unreadable: {e}")))?;

    match report {
        nucleus_ledger::VerifyReport::Ok { entries } => {
            info!(entries, "audit chain verified");
            Ok(())
        }
        nucleus_ledger::VerifyReport::Broken { seq, reason } => {
            warn!(seq, %reason, "audit chain integrity check failed");
            if strict {
                Err(NucleusError::InvariantViolated(format!(
                    "audit chain broken at seq {seq}: {reason}"
                )))
            } else {
                Ok(())
            }
        }
    }
}
