//! Process-wide context assembled once at startup and threaded into
//! every native tool handler, following the same `Arc<JobManager>`
//! pattern passed into each `research_job_*` tool struct elsewhere in
//! this codebase, generalized one level up so a single
//! `Arc<NucleusContext>` carries every collaborator a native handler
//! might need instead of one manager per concern.

use std::sync::Arc;
use std::time::Duration;

use nucleus_ledger::{AuditLedger, PermissionBroker};
use nucleus_tool::Tier;

use crate::mounter::Mounter;

/// Shared state handed to every native `brain_*` tool. Never given to
/// the Dispatcher's own logic directly — the Dispatcher receives its
/// four collaborators (registry, mounter, broker, ledger) individually
/// so it cannot accidentally call back into a tool (§9: "Dispatcher
/// owns nothing long-lived").
pub struct NucleusContext {
    pub mounter: Arc<Mounter>,
    pub broker: Arc<PermissionBroker>,
    pub ledger: Arc<AuditLedger>,
    pub tier: Tier,
    pub default_call_deadline: Duration,
}

impl NucleusContext {
    pub fn new(
        mounter: Arc<Mounter>,
        broker: Arc<PermissionBroker>,
        ledger: Arc<AuditLedger>,
        tier: Tier,
        default_call_deadline: Duration,
    ) -> Self {
        Self {
            mounter,
            broker,
            ledger,
            tier,
            default_call_deadline,
        }
    }
}
