//! Stdio JSON-RPC server (§4.8): the host-facing half of nucleus.
//!
//! One task reads frames from stdin (the producer); each request that
//! needs dispatching is handed to its own `tokio::spawn`'d task so a
//! slow tool call never blocks the next frame from being read. Writes
//! to stdout are serialised through a mutex so concurrent replies never
//! interleave mid-line, following the same shape as an `McpServer::
//! serve_stdio` at the transport boundary, reimplemented here over a
//! hand-rolled line-delimited protocol.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncWrite, BufReader};
use tokio::sync::Mutex;

use nucleus_core::ErrorKind;
use nucleus_mcp::protocol::{read_frame, write_frame, JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse};
use nucleus_mcp::McpError;
use nucleus_tool::{Tier, ToolRegistry};

use crate::dispatcher::Dispatcher;
use crate::mounter::Mounter;

/// The actor identity attributed to every call on this transport. A
/// nucleus process serves exactly one upstream host connection at a
/// time, so there is no per-request identity to multiplex.
const HOST_ACTOR: &str = "host";

/// Errors from running the stdio server itself (not from dispatch,
/// which is always captured as an [`ErrorKind`] and returned to the
/// host as a JSON-RPC error object).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("stdio io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    New,
    Ready,
    Closed,
}

/// The stdio JSON-RPC server: wires the Tool Registry, Mounter, and
/// Dispatcher to a host connection.
pub struct StdioServer {
    registry: Arc<ToolRegistry>,
    mounter: Arc<Mounter>,
    dispatcher: Arc<Dispatcher>,
    tier: Tier,
    name: String,
    version: String,
    shutdown_timeout: Duration,
}

impl StdioServer {
    pub fn new(
        registry: Arc<ToolRegistry>,
        mounter: Arc<Mounter>,
        dispatcher: Arc<Dispatcher>,
        tier: Tier,
        name: impl Into<String>,
        version: impl Into<String>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            mounter,
            dispatcher,
            tier,
            name: name.into(),
            version: version.into(),
            shutdown_timeout,
        }
    }

    /// Serve over the process's own stdin/stdout until the host closes
    /// stdin. Blocks until every in-flight dispatch has either finished
    /// or been aborted at `shutdown_timeout`.
    pub async fn serve_stdio(self) -> Result<(), ServerError> {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve over arbitrary reader/writer halves — the entry point
    /// `serve_stdio` delegates to, and what tests drive directly since
    /// process stdio can't be swapped in-process.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<(), ServerError>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(reader);
        let writer = Arc::new(Mutex::new(writer));
        let state = Arc::new(Mutex::new(ServerState::New));
        let mut inflight = tokio::task::JoinSet::new();

        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(e) => {
                    let kind = ErrorKind::ParseError(e.to_string());
                    let resp = JsonRpcResponse::failure(None, JsonRpcErrorObject::from_kind(&kind));
                    let _ = write_frame(&mut *writer.lock().await, &resp).await;
                    continue;
                }
            };

            let request: JsonRpcRequest = match serde_json::from_str(&frame) {
                Ok(r) => r,
                Err(e) => {
                    let kind = ErrorKind::ParseError(e.to_string());
                    let resp = JsonRpcResponse::failure(None, JsonRpcErrorObject::from_kind(&kind));
                    let _ = write_frame(&mut *writer.lock().await, &resp).await;
                    continue;
                }
            };

            if request.is_notification() {
                continue;
            }

            let registry = Arc::clone(&self.registry);
            let mounter = Arc::clone(&self.mounter);
            let dispatcher = Arc::clone(&self.dispatcher);
            let state = Arc::clone(&state);
            let writer = Arc::clone(&writer);
            let tier = self.tier;
            let name = self.name.clone();
            let version = self.version.clone();

            inflight.spawn(async move {
                let response =
                    handle_request(request, &registry, &mounter, &dispatcher, &state, tier, &name, &version).await;
                let _ = write_frame(&mut *writer.lock().await, &response).await;
            });
        }

        let drain = async {
            while inflight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            tracing::warn!(target: "nucleus", "shutdown_timeout elapsed with dispatches still in flight, aborting");
        }
        inflight.shutdown().await;

        self.mounter.stop_all().await;
        Ok(())
    }
}

async fn handle_request(
    request: JsonRpcRequest,
    registry: &ToolRegistry,
    mounter: &Mounter,
    dispatcher: &Dispatcher,
    state: &Mutex<ServerState>,
    tier: Tier,
    name: &str,
    version: &str,
) -> JsonRpcResponse {
    let id = request.id.clone().unwrap_or(Value::Null);

    if request.method != "initialize" {
        let current = *state.lock().await;
        if current == ServerState::New {
            let kind = ErrorKind::NotInitialized;
            return JsonRpcResponse::failure(Some(id), JsonRpcErrorObject::from_kind(&kind));
        }
    }

    match request.method.as_str() {
        "initialize" => {
            *state.lock().await = ServerState::Ready;
            let result = json!({
                "serverInfo": {"name": name, "version": version},
                "capabilities": {"tools": {}},
            });
            JsonRpcResponse::success(id, result)
        }

        "tools/list" => {
            let mut tools = registry.list_visible(tier);
            tools.extend(mounter.list_tools().await);
            let result = json!({
                "tools": tools.into_iter().map(|t| json!({
                    "name": t.qualified_name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })).collect::<Vec<_>>(),
            });
            JsonRpcResponse::success(id, result)
        }

        "tools/call" => {
            let params = request.params.unwrap_or_else(|| json!({}));
            let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
                let kind = ErrorKind::ParseError("tools/call missing `name`".to_string());
                return JsonRpcResponse::failure(Some(id), JsonRpcErrorObject::from_kind(&kind));
            };
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

            match dispatcher.dispatch(HOST_ACTOR, tool_name, arguments).await {
                Ok(value) => {
                    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                    JsonRpcResponse::success(
                        id,
                        json!({"content": [{"type": "text", "text": text}], "isError": false}),
                    )
                }
                Err(kind) => JsonRpcResponse::failure(Some(id), JsonRpcErrorObject::from_kind(&kind)),
            }
        }

        "shutdown" => {
            *state.lock().await = ServerState::Closed;
            JsonRpcResponse::success(id, json!({}))
        }

        other => {
            let kind = ErrorKind::HandlerError(format!("unknown method: {other}"));
            JsonRpcResponse::failure(Some(id), JsonRpcErrorObject::from_kind(&kind))
        }
    }
}

/// Map a transport-level [`McpError`] (e.g. a malformed handshake with
/// a child, surfaced while building `tools/list`) onto the closed
/// [`ErrorKind`] taxonomy so every error this server ever writes to
/// stdout shares one shape.
#[allow(dead_code)]
fn mcp_error_to_kind(err: McpError) -> ErrorKind {
    err.into()
}
