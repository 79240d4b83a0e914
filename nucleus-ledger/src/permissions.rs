//! Permission broker (§4.3).
//!
//! Grants are strict-equality fingerprint matches: `agent_id`,
//! `capability`, and canonical `params` must match a stored grant
//! exactly. There is no wildcard fallback and no prefix matching — a
//! grant for one exact parameter set does not cover any other, even a
//! structurally similar one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use nucleus_core::canonical::fingerprint;

use crate::lock::{LockError, LockManager};

/// Errors from the permission broker.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PermissionError {
    /// The permissions lock could not be acquired.
    #[error("permissions lock contended: {0}")]
    Lock(#[from] LockError),

    /// Reading or writing `permissions.json` failed.
    #[error("permissions io error: {0}")]
    Io(String),

    /// `brain_grant_permission` was called with a fingerprint that was
    /// never denied (or was already granted and its pending record
    /// consumed).
    #[error("no pending grant request for fingerprint {0}")]
    UnknownFingerprint(String),
}

/// A request to check or create a capability grant.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub agent_id: String,
    pub capability: String,
    pub params: Value,
}

impl GrantRequest {
    /// The fingerprint this request resolves to.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.agent_id, &self.capability, &self.params)
    }
}

/// A stored, persisted grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityGrant {
    pub fingerprint: String,
    pub agent_id: String,
    pub capability: String,
    pub params: Value,
    pub granted_at: String,
}

/// Result of a [`PermissionBroker::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// A grant exists for this exact fingerprint.
    Allowed,
    /// No grant exists; the host must call `brain_grant_permission` with
    /// this fingerprint before the dispatch can proceed.
    Denied { fingerprint: String },
}

/// A denied [`GrantRequest`] remembered by fingerprint so the host can
/// later call `brain_grant_permission(fingerprint)` without resending
/// `agent_id`/`capability`/`params` — a fingerprint is a one-way hash,
/// so the broker has to be the one holding onto the request it came
/// from.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingGrant {
    fingerprint: String,
    agent_id: String,
    capability: String,
    params: Value,
}

/// The permission broker, rooted at `BrainRoot/ledger/permissions.json`.
pub struct PermissionBroker {
    path: PathBuf,
    pending_path: PathBuf,
    locks: LockManager,
}

impl PermissionBroker {
    /// Open a broker at `ledger_dir/permissions.json`, sharing `locks`
    /// with the rest of the brain root.
    pub fn new(ledger_dir: impl AsRef<Path>, locks: LockManager) -> Self {
        let ledger_dir = ledger_dir.as_ref();
        Self {
            path: ledger_dir.join("permissions.json"),
            pending_path: ledger_dir.join("pending_grants.json"),
            locks,
        }
    }

    /// Check whether a grant exists for this exact request. On denial,
    /// remembers the request under its fingerprint so a later
    /// `grant_by_fingerprint` can act on it.
    pub async fn check(&self, request: &GrantRequest) -> Result<Decision, PermissionError> {
        let _guard = self
            .locks
            .acquire_with_reason("permissions", "permissions.check")
            .await?;
        let grants = self.read_all_locked()?;
        let target = request.fingerprint();
        if grants.iter().any(|g| g.fingerprint == target) {
            Ok(Decision::Allowed)
        } else {
            self.remember_pending_locked(request, &target)?;
            Ok(Decision::Denied {
                fingerprint: target,
            })
        }
    }

    /// Record a new grant for this exact request. Idempotent: granting
    /// the same fingerprint twice leaves a single entry.
    pub async fn grant(&self, request: &GrantRequest) -> Result<CapabilityGrant, PermissionError> {
        let _guard = self
            .locks
            .acquire_with_reason("permissions", "permissions.grant")
            .await?;
        let mut grants = self.read_all_locked()?;
        let target = request.fingerprint();

        if let Some(existing) = grants.iter().find(|g| g.fingerprint == target) {
            return Ok(existing.clone());
        }

        let entry = CapabilityGrant {
            fingerprint: target,
            agent_id: request.agent_id.clone(),
            capability: request.capability.clone(),
            params: request.params.clone(),
            granted_at: chrono::Utc::now().to_rfc3339(),
        };
        grants.push(entry.clone());
        self.write_all_locked(&grants)?;
        Ok(entry)
    }

    /// Grant by fingerprint alone, using the request remembered from the
    /// `Denied` decision that produced it. Idempotent like [`grant`](Self::grant).
    /// Errors with [`PermissionError::UnknownFingerprint`] if this
    /// fingerprint was never denied (or was already granted and its
    /// pending record already consumed).
    pub async fn grant_by_fingerprint(&self, fingerprint: &str) -> Result<CapabilityGrant, PermissionError> {
        let _guard = self
            .locks
            .acquire_with_reason("permissions", "permissions.grant_by_fingerprint")
            .await?;
        let mut grants = self.read_all_locked()?;
        if let Some(existing) = grants.iter().find(|g| g.fingerprint == fingerprint) {
            return Ok(existing.clone());
        }

        let mut pending = self.read_pending_locked()?;
        let Some(index) = pending.iter().position(|p| p.fingerprint == fingerprint) else {
            return Err(PermissionError::UnknownFingerprint(fingerprint.to_string()));
        };
        let request = pending.remove(index);

        let entry = CapabilityGrant {
            fingerprint: fingerprint.to_string(),
            agent_id: request.agent_id,
            capability: request.capability,
            params: request.params,
            granted_at: chrono::Utc::now().to_rfc3339(),
        };
        grants.push(entry.clone());
        self.write_all_locked(&grants)?;
        self.write_pending_locked(&pending)?;
        Ok(entry)
    }

    /// Remove a grant by fingerprint. A no-op if it doesn't exist.
    pub async fn revoke(&self, grant_fingerprint: &str) -> Result<(), PermissionError> {
        let _guard = self
            .locks
            .acquire_with_reason("permissions", "permissions.revoke")
            .await?;
        let mut grants = self.read_all_locked()?;
        grants.retain(|g| g.fingerprint != grant_fingerprint);
        self.write_all_locked(&grants)
    }

    /// List every currently-held grant.
    pub async fn list(&self) -> Result<Vec<CapabilityGrant>, PermissionError> {
        let _guard = self
            .locks
            .acquire_with_reason("permissions", "permissions.list")
            .await?;
        self.read_all_locked()
    }

    /// Read `permissions.json`, caller must hold the `"permissions"`
    /// lock. Missing or unparsable files are treated as an empty grant
    /// set rather than an error — a fresh brain root has no grants yet.
    fn read_all_locked(&self) -> Result<Vec<CapabilityGrant>, PermissionError> {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(&contents).unwrap_or_default())
    }

    fn write_all_locked(&self, grants: &[CapabilityGrant]) -> Result<(), PermissionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PermissionError::Io(e.to_string()))?;
        }
        let body =
            serde_json::to_vec_pretty(grants).map_err(|e| PermissionError::Io(e.to_string()))?;
        std::fs::write(&self.path, body).map_err(|e| PermissionError::Io(e.to_string()))
    }

    /// Upsert `request` into the pending-grant file, caller must hold
    /// the `"permissions"` lock.
    fn remember_pending_locked(&self, request: &GrantRequest, fingerprint: &str) -> Result<(), PermissionError> {
        let mut pending = self.read_pending_locked()?;
        if pending.iter().any(|p| p.fingerprint == fingerprint) {
            return Ok(());
        }
        pending.push(PendingGrant {
            fingerprint: fingerprint.to_string(),
            agent_id: request.agent_id.clone(),
            capability: request.capability.clone(),
            params: request.params.clone(),
        });
        self.write_pending_locked(&pending)
    }

    fn read_pending_locked(&self) -> Result<Vec<PendingGrant>, PermissionError> {
        let Ok(contents) = std::fs::read_to_string(&self.pending_path) else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(&contents).unwrap_or_default())
    }

    fn write_pending_locked(&self, pending: &[PendingGrant]) -> Result<(), PermissionError> {
        if let Some(parent) = self.pending_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PermissionError::Io(e.to_string()))?;
        }
        let body =
            serde_json::to_vec_pretty(pending).map_err(|e| PermissionError::Io(e.to_string()))?;
        std::fs::write(&self.pending_path, body).map_err(|e| PermissionError::Io(e.to_string()))
    }
}
