//! Governed tool dispatch (§4.7): the single entry point every host
//! `tools/call` and every native handler's Mounter-bound call passes
//! through. Visibility, policy, routing, execution, and audit happen
//! here and nowhere else — no caching between steps, every call
//! re-resolves policy and routing from scratch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use nucleus_core::error::truncate_message;
use nucleus_core::ErrorKind;
use nucleus_ledger::{AuditLedger, AuditOutcome, Decision, GrantRequest, PermissionBroker};
use nucleus_tool::{schema, Capability, Tier, ToolRegistry};

use crate::mounter::Mounter;

/// Routes a qualified tool call through policy, execution, and audit.
/// Holds only borrowed collaborators (§3: "the Dispatcher owns nothing
/// long-lived") — all four are shared, already-constructed components
/// threaded in from [`crate::context::NucleusContext`].
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    mounter: Arc<Mounter>,
    broker: Arc<PermissionBroker>,
    ledger: Arc<AuditLedger>,
    tier: Tier,
    default_call_deadline: Duration,
}

impl Dispatcher {
    /// Build a dispatcher over the given collaborators.
    pub fn new(
        registry: Arc<ToolRegistry>,
        mounter: Arc<Mounter>,
        broker: Arc<PermissionBroker>,
        ledger: Arc<AuditLedger>,
        tier: Tier,
        default_call_deadline: Duration,
    ) -> Self {
        Self {
            registry,
            mounter,
            broker,
            ledger,
            tier,
            default_call_deadline,
        }
    }

    /// Dispatch one tool call end to end. Never returns a raw handler
    /// panic or exception — everything funnels into one closed
    /// [`ErrorKind`] (§7).
    pub async fn dispatch(&self, actor: &str, qualified_name: &str, args: Value) -> Result<Value, ErrorKind> {
        if qualified_name.contains(':') {
            self.dispatch_mounted(actor, qualified_name, args).await
        } else {
            self.dispatch_native(actor, qualified_name, args).await
        }
    }

    async fn dispatch_native(&self, actor: &str, name: &str, args: Value) -> Result<Value, ErrorKind> {
        // Step 1: visibility.
        let Some(tool) = self.registry.get(name) else {
            return Err(ErrorKind::ToolNotFound(name.to_string()));
        };
        if !self.registry.is_visible(name, self.tier) {
            return Err(ErrorKind::ToolNotVisible(name.to_string()));
        }

        // Step 2-3: policy resolution and consent gate.
        let capability = self.registry.capability_of(name).unwrap_or(Capability::Open);
        if capability.requires_grant() {
            let request = GrantRequest {
                agent_id: actor.to_string(),
                capability: capability.as_str().to_string(),
                params: args.clone(),
            };
            match self.broker.check(&request).await {
                Ok(Decision::Allowed) => {}
                Ok(Decision::Denied { fingerprint }) => {
                    self.audit_consent_required(actor, name, &args, &fingerprint).await;
                    return Err(ErrorKind::PermissionDenied { fingerprint });
                }
                Err(e) => return Err(ErrorKind::LockContended(e.to_string())),
            }
        }

        // Input-schema validation happens just before execution (§9).
        if let Err(msg) = schema::validate(&tool.input_schema(), &args) {
            self.audit_outcome(actor, name, &args, &json!({"error": msg}), AuditOutcome::Error)
                .await;
            return Err(ErrorKind::HandlerError(msg));
        }

        // Step 5: execution under deadline.
        let deadline = self.default_call_deadline;
        let outcome = tokio::time::timeout(deadline, tool.call(args.clone())).await;

        // Step 6: audit, always, regardless of outcome.
        match outcome {
            Ok(Ok(value)) => {
                self.audit_outcome(actor, name, &args, &value, AuditOutcome::Success).await;
                Ok(value)
            }
            Ok(Err(tool_err)) => {
                let msg = truncate_message(&tool_err.to_string());
                self.audit_outcome(actor, name, &args, &json!({"error": msg}), AuditOutcome::Error)
                    .await;
                Err(ErrorKind::HandlerError(msg))
            }
            Err(_elapsed) => {
                let msg = format!("tool call to {name} timed out after {deadline:?}");
                self.audit_outcome(actor, name, &args, &json!({"error": msg}), AuditOutcome::Error)
                    .await;
                Err(ErrorKind::Timeout(msg))
            }
        }
    }

    async fn dispatch_mounted(&self, actor: &str, qualified_name: &str, args: Value) -> Result<Value, ErrorKind> {
        // Step 1 + 4 folded together: a valid, ready mount resolves;
        // otherwise the name simply doesn't exist for this host.
        let Some((mount_id, tool_name, input_schema)) = self.mounter.resolve(qualified_name).await else {
            return Err(ErrorKind::ToolNotFound(qualified_name.to_string()));
        };

        // Mounted tools are always `Capability::Open` at the registry
        // layer (§4.4) — their own server is an opaque third party, so
        // no grant check happens here.
        if let Err(msg) = schema::validate(&input_schema, &args) {
            self.audit_outcome(actor, qualified_name, &args, &json!({"error": msg}), AuditOutcome::Error)
                .await;
            return Err(ErrorKind::HandlerError(msg));
        }

        let deadline = Instant::now() + self.default_call_deadline;
        match self.mounter.invoke(&mount_id, &tool_name, args.clone(), deadline).await {
            Ok(value) => {
                self.audit_outcome(actor, qualified_name, &args, &value, AuditOutcome::Success)
                    .await;
                Ok(value)
            }
            Err(mount_err) => {
                let kind: ErrorKind = mount_err.into();
                let msg = truncate_message(&kind.to_string());
                self.audit_outcome(actor, qualified_name, &args, &json!({"error": msg}), AuditOutcome::Error)
                    .await;
                Err(kind)
            }
        }
    }

    async fn audit_outcome(&self, actor: &str, target: &str, params: &Value, result: &Value, outcome: AuditOutcome) {
        if let Err(e) = self
            .ledger
            .append("tool_call", actor, target, params, result, outcome)
            .await
        {
            tracing::error!(target: "nucleus", actor, target, error = %e, "audit write failed, call result still returned to host");
        }
    }

    async fn audit_consent_required(&self, actor: &str, target: &str, params: &Value, fingerprint: &str) {
        let result = json!({"consent_required": true, "fingerprint": fingerprint});
        if let Err(e) = self
            .ledger
            .append("consent_required", actor, target, params, &result, AuditOutcome::Denied)
            .await
        {
            tracing::error!(target: "nucleus", actor, target, error = %e, "audit write failed for consent_required");
        }
    }
}
