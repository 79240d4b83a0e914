//! Hash-chained, append-only audit ledger (§4.2).
//!
//! Every dispatch outcome, successful or not, is appended as one line of
//! canonical JSON to `ledger/audit.jsonl`, guarded by the `"audit"` lock.
//! Each entry's `entry_hash` covers the previous entry's hash, so the
//! file as a whole forms a hash chain; `verify` walks it and reports the
//! first broken link.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use nucleus_core::canonical::{canonical_bytes, canonical_hash, sha256_hex};

use crate::lock::{LockError, LockManager};

const GENESIS: &str = "GENESIS";

/// Errors from appending to or reading the audit ledger.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit lock could not be acquired.
    #[error("audit lock contended: {0}")]
    Lock(#[from] LockError),

    /// Reading or writing `audit.jsonl` failed.
    #[error("audit io error: {0}")]
    Io(String),

    /// An entry in `audit.jsonl` could not be parsed.
    #[error("audit entry malformed at line {line}: {detail}")]
    Malformed {
        /// 1-based line number within the file.
        line: usize,
        /// What was wrong with it.
        detail: String,
    },

    /// Hashing a value for inclusion in an entry failed.
    #[error("audit hash error: {0}")]
    Hash(String),
}

/// One line of `audit.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: String,
    pub action: String,
    pub actor: String,
    pub target: String,
    pub params_hash: String,
    pub result_hash: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Whether a dispatched action succeeded or failed, recorded alongside
/// its hashes so a denial or error is as auditable as a success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Error,
}

/// The part of an [`AuditEntry`] hashed to produce `entry_hash`: every
/// field except `prev_hash` and `entry_hash` themselves. `prev_hash` is
/// prepended to the canonical JSON of this struct as raw bytes rather
/// than folded into the JSON object, per the chain formula
/// `entry_hash = SHA-256(prev_hash || canonical_json(entry_without_hashes))`.
#[derive(Serialize)]
struct HashedEntry<'a> {
    seq: u64,
    timestamp: &'a str,
    action: &'a str,
    actor: &'a str,
    target: &'a str,
    params_hash: &'a str,
    result_hash: &'a str,
}

/// Outcome of [`AuditLedger::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyReport {
    /// Every entry's `entry_hash` matches its recomputed hash and the
    /// chain of `prev_hash` values is unbroken.
    Ok { entries: u64 },
    /// The chain is broken starting at `seq`.
    Broken { seq: u64, reason: String },
}

/// The audit ledger, rooted at `BrainRoot/ledger/audit.jsonl`.
pub struct AuditLedger {
    path: PathBuf,
    locks: LockManager,
}

impl AuditLedger {
    /// Open a ledger at `ledger_dir/audit.jsonl`, sharing `locks` with
    /// the rest of the brain root.
    pub fn new(ledger_dir: impl AsRef<Path>, locks: LockManager) -> Self {
        Self {
            path: ledger_dir.as_ref().join("audit.jsonl"),
            locks,
        }
    }

    /// Append one entry, computing `params_hash`/`result_hash` via
    /// canonical hashing and chaining `entry_hash` off the current tail.
    /// Returns the new entry's hash.
    pub async fn append(
        &self,
        action: &str,
        actor: &str,
        target: &str,
        params: &Value,
        result: &Value,
        outcome: AuditOutcome,
    ) -> Result<String, AuditError> {
        let _guard = self
            .locks
            .acquire_with_reason("audit", "audit.append")
            .await?;

        let params_hash = canonical_hash(params).map_err(|e| AuditError::Hash(e.to_string()))?;
        // Outcome is folded into the hashed result rather than kept as its
        // own entry field: a denied or errored call is just as auditable,
        // without widening the on-disk entry schema.
        let result_hash = canonical_hash(&json!({"outcome": &outcome, "value": result}))
            .map_err(|e| AuditError::Hash(e.to_string()))?;

        let existing = self.read_all_locked()?;
        let seq = existing.len() as u64 + 1;
        let prev_hash = existing
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| GENESIS.to_string());
        let timestamp = chrono::Utc::now().to_rfc3339();

        let hashed = HashedEntry {
            seq,
            timestamp: &timestamp,
            action,
            actor,
            target,
            params_hash: &params_hash,
            result_hash: &result_hash,
        };
        let entry_bytes = canonical_bytes(&hashed).map_err(|e| AuditError::Hash(e.to_string()))?;
        let mut preimage = prev_hash.as_bytes().to_vec();
        preimage.extend_from_slice(&entry_bytes);
        let entry_hash = sha256_hex(&preimage);

        let entry = AuditEntry {
            seq,
            timestamp,
            action: action.to_string(),
            actor: actor.to_string(),
            target: target.to_string(),
            params_hash,
            result_hash,
            prev_hash,
            entry_hash: entry_hash.clone(),
        };

        let mut line = serde_json::to_string(&entry).map_err(|e| AuditError::Hash(e.to_string()))?;
        line.push('\n');
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AuditError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AuditError::Io(e.to_string()))?;

        Ok(entry_hash)
    }

    /// Return the last `n` entries in ascending `seq` order.
    pub async fn tail(&self, n: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let _guard = self.locks.acquire_with_reason("audit", "audit.tail").await?;
        let mut entries = self.read_all_locked()?;
        if entries.len() > n {
            entries.drain(0..entries.len() - n);
        }
        Ok(entries)
    }

    /// Walk the whole chain, recomputing every `entry_hash` and checking
    /// every `prev_hash` link. Returns the first broken `seq`, if any.
    pub async fn verify(&self) -> Result<VerifyReport, AuditError> {
        let _guard = self.locks.acquire_with_reason("audit", "audit.verify").await?;
        let entries = self.read_all_locked()?;

        let mut expected_prev = GENESIS.to_string();
        for entry in &entries {
            if entry.prev_hash != expected_prev {
                return Ok(VerifyReport::Broken {
                    seq: entry.seq,
                    reason: format!(
                        "prev_hash mismatch: expected {expected_prev}, found {}",
                        entry.prev_hash
                    ),
                });
            }
            let hashed = HashedEntry {
                seq: entry.seq,
                timestamp: &entry.timestamp,
                action: &entry.action,
                actor: &entry.actor,
                target: &entry.target,
                params_hash: &entry.params_hash,
                result_hash: &entry.result_hash,
            };
            let entry_bytes = canonical_bytes(&hashed).map_err(|e| AuditError::Hash(e.to_string()))?;
            let mut preimage = entry.prev_hash.as_bytes().to_vec();
            preimage.extend_from_slice(&entry_bytes);
            let recomputed = sha256_hex(&preimage);
            if recomputed != entry.entry_hash {
                return Ok(VerifyReport::Broken {
                    seq: entry.seq,
                    reason: "entry_hash does not match recomputed hash".to_string(),
                });
            }
            expected_prev = entry.entry_hash.clone();
        }

        Ok(VerifyReport::Ok {
            entries: entries.len() as u64,
        })
    }

    /// Read and parse the whole file. Caller must hold the `"audit"`
    /// lock; this is a sync, blocking read intentionally kept small —
    /// audit files are expected to stay in the tens-of-thousands-of-lines
    /// range, not gigabytes.
    fn read_all_locked(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(line).map_err(|e| AuditError::Malformed {
                line: i + 1,
                detail: e.to_string(),
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Convenience used by callers that only need the hash prefix of
/// `sha256_hex` directly, e.g. correlating a result to an entry without
/// re-parsing the whole ledger.
pub fn hash_value_hex(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}
