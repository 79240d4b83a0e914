//! Child MCP client: owns one subprocess speaking line-delimited
//! JSON-RPC over its stdio (§4.5).
//!
//! A single reader task consumes the child's stdout and dispatches each
//! reply to the `oneshot` completion slot registered for its `id`;
//! writers serialize on the child's stdin through a mutex. A malformed
//! line is logged and skipped, never kills the client.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

use nucleus_tool::ToolDescriptor;

use crate::error::McpError;
use crate::protocol::{read_frame, write_frame, JsonRpcRequest, JsonRpcResponse};

/// How many trailing lines of a child's stderr are retained for
/// diagnostics (`brain_list_mounted` surfaces these, never parsed).
const STDERR_RING_CAPACITY: usize = 64;

/// Lifecycle state of a [`ChildMcpClient`], mirroring §4.8's server
/// state machine but for the child side of the same protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Starting,
    Ready,
    Failed,
    Closed,
}

struct Inner {
    mount_name: String,
    stdin: Mutex<tokio::process::ChildStdin>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, McpError>>>>,
    next_id: AtomicU64,
    state: Mutex<ClientState>,
    stderr_ring: Mutex<VecDeque<String>>,
    tool_cache: Mutex<Option<Vec<ToolDescriptor>>>,
    child: Mutex<Child>,
}

/// A running stdio MCP child and its correlation/lifecycle machinery.
///
/// Cheaply cloneable (`Arc`-backed): the reader and stderr-drain tasks
/// each hold a clone so they can outlive the caller that spawned them.
#[derive(Clone)]
pub struct ChildMcpClient {
    inner: Arc<Inner>,
}

impl ChildMcpClient {
    /// Spawn `command args…` with `env` applied, wiring its stdio as
    /// line-delimited JSON-RPC and its stderr into a diagnostic ring
    /// buffer. The client starts in `Starting` state; call
    /// [`initialize`](Self::initialize) before anything else.
    pub fn start(
        mount_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn(e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| McpError::Spawn("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Spawn("no stdout".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| McpError::Spawn("no stderr".into()))?;

        let inner = Arc::new(Inner {
            mount_name: mount_name.to_string(),
            stdin: Mutex::new(stdin),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            state: Mutex::new(ClientState::Starting),
            stderr_ring: Mutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY)),
            tool_cache: Mutex::new(None),
            child: Mutex::new(child),
        });

        let client = Self { inner };
        client.spawn_reader(stdout);
        client.spawn_stderr_drain(stderr);
        Ok(client)
    }

    fn spawn_reader(&self, stdout: tokio::process::ChildStdout) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(&line) {
                            Ok(resp) => Self::dispatch_reply(&inner, resp).await,
                            Err(e) => {
                                tracing::warn!(
                                    target: "nucleus",
                                    mount = %inner.mount_name,
                                    error = %e,
                                    "skipping malformed frame from child"
                                );
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(
                            target: "nucleus",
                            mount = %inner.mount_name,
                            error = %e,
                            "skipping malformed frame from child"
                        );
                    }
                }
            }
            Self::fail_all_pending(&inner, "child stdout closed").await;
            *inner.state.lock().await = ClientState::Closed;
        });
    }

    fn spawn_stderr_drain(&self, stderr: tokio::process::ChildStderr) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let mut ring = inner.stderr_ring.lock().await;
                if ring.len() == STDERR_RING_CAPACITY {
                    ring.pop_front();
                }
                ring.push_back(line);
            }
        });
    }

    async fn dispatch_reply(inner: &Arc<Inner>, resp: JsonRpcResponse) {
        let Some(id_value) = &resp.id else {
            tracing::debug!(target: "nucleus", mount = %inner.mount_name, "ignoring notification from child");
            return;
        };
        let Some(id) = id_value.as_u64() else {
            tracing::warn!(target: "nucleus", mount = %inner.mount_name, "reply id is not a u64, dropping");
            return;
        };
        let sender = inner.pending.lock().await.remove(&id);
        if let Some(sender) = sender {
            let _ = sender.send(resp.into_result());
        }
    }

    async fn fail_all_pending(inner: &Arc<Inner>, reason: &str) {
        let mut pending = inner.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(McpError::ChildClosed(reason.to_string())));
        }
    }

    /// Perform the `initialize` handshake. Transitions to `Ready` only
    /// on a successful reply within `timeout`; otherwise `Failed`.
    pub async fn initialize(&self, timeout: Duration) -> Result<Value, McpError> {
        let params = json!({
            "protocolVersion": "2024-11-05",
            "clientInfo": {"name": "nucleus", "version": env!("CARGO_PKG_VERSION")},
            "capabilities": {},
        });
        let result = tokio::time::timeout(timeout, self.send_call("initialize", params)).await;
        match result {
            Ok(Ok(value)) => {
                *self.inner.state.lock().await = ClientState::Ready;
                Ok(value)
            }
            Ok(Err(e)) => {
                *self.inner.state.lock().await = ClientState::Failed;
                Err(McpError::InitializeFailed(e.to_string()))
            }
            Err(_) => {
                *self.inner.state.lock().await = ClientState::Failed;
                Err(McpError::InitializeTimeout(timeout))
            }
        }
    }

    /// Call `tools/list` and cache the result as unqualified
    /// [`ToolDescriptor`]s (the Mounter applies the `mount_name:` prefix).
    /// Subsequent calls return the cache; pass `force = true` to refresh.
    pub async fn list_tools(&self, force: bool) -> Result<Vec<ToolDescriptor>, McpError> {
        if !force {
            if let Some(cached) = self.inner.tool_cache.lock().await.clone() {
                return Ok(cached);
            }
        }
        let value = self.send_call("tools/list", json!({})).await?;
        let raw_tools = value
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut tools = Vec::with_capacity(raw_tools.len());
        for raw in raw_tools {
            let name = raw
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| McpError::Protocol("tool missing name".to_string()))?
                .to_string();
            let description = raw
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let input_schema = raw
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object"}));
            tools.push(ToolDescriptor {
                qualified_name: name,
                description,
                input_schema,
            });
        }
        *self.inner.tool_cache.lock().await = Some(tools.clone());
        Ok(tools)
    }

    /// Invalidate the cached tool list so the next [`list_tools`](Self::list_tools) refreshes it.
    pub async fn invalidate_tool_cache(&self) {
        *self.inner.tool_cache.lock().await = None;
    }

    /// Call `tools/call` for `name` with `arguments`, bounded by `deadline`.
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        deadline: Instant,
    ) -> Result<Value, McpError> {
        let params = json!({"name": name, "arguments": arguments});
        let wait = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(wait, self.send_call("tools/call", params)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout(format!("call to {name} on {}", self.inner.mount_name))),
        }
    }

    async fn send_call(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest::call(id, method, Some(params));
        {
            let mut stdin = self.inner.stdin.lock().await;
            if let Err(e) = write_frame(&mut *stdin, &request).await {
                self.inner.pending.lock().await.remove(&id);
                return Err(e);
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(McpError::ChildClosed(format!(
                "reply channel dropped for {} on {}",
                method, self.inner.mount_name
            ))),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ClientState {
        *self.inner.state.lock().await
    }

    /// Last [`STDERR_RING_CAPACITY`] lines of the child's stderr, oldest first.
    pub async fn stderr_tail(&self) -> Vec<String> {
        self.inner.stderr_ring.lock().await.iter().cloned().collect()
    }

    /// Stop the child: SIGTERM, wait up to 2 s, then SIGKILL. Every
    /// outstanding call fails with `ChildClosed`.
    pub async fn stop(&self) {
        let pid = self.inner.child.lock().await.id();
        if let Some(pid) = pid {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let waited = {
            let mut child = self.inner.child.lock().await;
            tokio::time::timeout(Duration::from_secs(2), child.wait()).await
        };

        if waited.is_err() {
            let mut child = self.inner.child.lock().await;
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        *self.inner.state.lock().await = ClientState::Closed;
        Self::fail_all_pending(&self.inner, "client stopped").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn initialize_against_a_well_behaved_cat_like_echo_server() {
        // `python3 -c` is not guaranteed in a CI sandbox; use `sh` to
        // build a minimal line-echo responder purely from shell builtins
        // so this test has no third-party runtime dependency.
        let script = r#"while read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"
done"#;
        let client = ChildMcpClient::start("echo", "sh", &["-c".to_string(), script.to_string()], &env())
            .unwrap();
        let result = client.initialize(Duration::from_secs(2)).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(client.state().await, ClientState::Ready);
        client.stop().await;
    }

    #[tokio::test]
    async fn call_times_out_against_a_silent_child() {
        let client = ChildMcpClient::start("silent", "sh", &["-c".to_string(), "sleep 5".to_string()], &env())
            .unwrap();
        let deadline = Instant::now() + Duration::from_millis(100);
        let result = client.call("whatever", json!({}), deadline).await;
        assert!(matches!(result, Err(McpError::Timeout(_))));
        client.stop().await;
    }

    #[tokio::test]
    async fn closed_child_fails_outstanding_calls() {
        let client = ChildMcpClient::start("dying", "sh", &["-c".to_string(), "exit 0".to_string()], &env())
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let result = client.call("whatever", json!({}), deadline).await;
        assert!(matches!(
            result,
            Err(McpError::ChildClosed(_)) | Err(McpError::Timeout(_))
        ));
    }
}
