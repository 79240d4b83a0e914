//! End-to-end scenarios driven over the same stdio transport a real
//! host would use, exercising the assembled stack (`nucleus::bootstrap`
//! plus `StdioServer::serve`) the way `nucleus-mcp`'s own client tests
//! drive a real child: an in-memory duplex stands in for the pipe pair
//! a host process would otherwise hold.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::BufReader;

use nucleus::config::NucleusConfig;
use nucleus::dispatcher::Dispatcher;
use nucleus::mounter::Mounter;
use nucleus::server::StdioServer;
use nucleus_ledger::{AuditLedger, LockManager, PermissionBroker};
use nucleus_mcp::protocol::{read_frame, write_frame};
use nucleus_tool::{Capability, Tier, ToolDyn, ToolError, ToolRegistry};

fn config_over(brain_root: PathBuf) -> NucleusConfig {
    let lookup = move |key: &str| {
        if key == nucleus::config::BRAIN_PATH_ENV {
            Some(brain_root.to_str().unwrap().to_string())
        } else {
            None
        }
    };
    NucleusConfig::resolve_from_env(false, lookup).unwrap()
}

async fn roundtrip<S>(client: &mut S, request: &Value) -> Value
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    write_frame(client, request).await.unwrap();

    let mut reader = BufReader::new(client);
    let frame = read_frame(&mut reader).await.unwrap().unwrap();
    serde_json::from_str(&frame).unwrap()
}

/// Read a single response frame without writing anything first, for
/// callers that write several requests up front and read the replies
/// back afterward (order not assumed to match write order).
async fn read_one<S>(client: &mut S) -> Value
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(client);
    let frame = read_frame(&mut reader).await.unwrap().unwrap();
    serde_json::from_str(&frame).unwrap()
}

/// A `sh`-based child good enough to answer `initialize`/`tools/list`
/// and echo back an `arguments.message` field on `tools/call`, without
/// pulling in a real MCP runtime as a test fixture.
fn echoing_child_args() -> Vec<String> {
    let script = r#"while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  method=$(printf '%s' "$line" | sed -n 's/.*"method":"\([a-zA-Z/]*\)".*/\1/p')
  if [ "$method" = "tools/list" ]; then
    printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"","inputSchema":{"type":"object"}}]}}\n' "$id"
  elif [ "$method" = "tools/call" ]; then
    msg=$(printf '%s' "$line" | sed -n 's/.*"message":"\([^"]*\)".*/\1/p')
    printf '{"jsonrpc":"2.0","id":%s,"result":{"text":"echo: %s"}}\n' "$id" "$msg"
  else
    printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"
  fi
done"#;
    vec!["-c".to_string(), script.to_string()]
}

/// A child that answers exactly one `tools/call` and then exits,
/// simulating a crash mid-session (S6).
fn crashing_child_args() -> Vec<String> {
    let script = r#"while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  method=$(printf '%s' "$line" | sed -n 's/.*"method":"\([a-zA-Z/]*\)".*/\1/p')
  if [ "$method" = "tools/list" ]; then
    printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"","inputSchema":{"type":"object"}}]}}\n' "$id"
  elif [ "$method" = "tools/call" ]; then
    printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"
    exit 0
  else
    printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"
  fi
done"#;
    vec!["-c".to_string(), script.to_string()]
}

#[tokio::test]
async fn s1_initialize_reports_server_name() {
    let tmp = tempfile::tempdir().unwrap();
    let server = nucleus::bootstrap(config_over(tmp.path().to_path_buf())).await.unwrap();
    let (mut client, server_io) = tokio::io::duplex(65536);
    let (read_half, write_half) = tokio::io::split(server_io);
    let handle = tokio::spawn(server.serve(read_half, write_half));

    let resp = roundtrip(
        &mut client,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    )
    .await;
    assert_eq!(resp["result"]["serverInfo"]["name"], "nucleus-mcp");

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn s2_mount_and_list_namespaces_child_tools() {
    let tmp = tempfile::tempdir().unwrap();
    let server = nucleus::bootstrap(config_over(tmp.path().to_path_buf())).await.unwrap();
    let (mut client, server_io) = tokio::io::duplex(65536);
    let (read_half, write_half) = tokio::io::split(server_io);
    let handle = tokio::spawn(server.serve(read_half, write_half));

    let _ = roundtrip(&mut client, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})).await;

    let resp = roundtrip(
        &mut client,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "brain_mount_server", "arguments": {"name": "m1", "command": "sh", "args": echoing_child_args()}},
        }),
    )
    .await;
    assert!(resp.get("error").is_none(), "mount failed: {resp:?}");

    let resp = roundtrip(&mut client, &json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"})).await;
    let names: Vec<String> = resp["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&"m1:echo".to_string()), "tools/list: {names:?}");

    let _ = roundtrip(&mut client, &json!({"jsonrpc": "2.0", "id": 4, "method": "shutdown"})).await;
    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn s3_invoke_mounted_tool_returns_echoed_text() {
    let tmp = tempfile::tempdir().unwrap();
    let server = nucleus::bootstrap(config_over(tmp.path().to_path_buf())).await.unwrap();
    let (mut client, server_io) = tokio::io::duplex(65536);
    let (read_half, write_half) = tokio::io::split(server_io);
    let handle = tokio::spawn(server.serve(read_half, write_half));

    let _ = roundtrip(&mut client, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})).await;

    let resp = roundtrip(
        &mut client,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "brain_mount_server", "arguments": {"name": "m1", "command": "sh", "args": echoing_child_args()}},
        }),
    )
    .await;
    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    let mount_id = serde_json::from_str::<Value>(text).unwrap()["mount_id"].as_str().unwrap().to_string();

    let resp = roundtrip(
        &mut client,
        &json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {
                "name": "brain_invoke_mounted_tool",
                "arguments": {"mount_id": mount_id, "tool": "echo", "args": {"message": "hi"}},
            },
        }),
    )
    .await;
    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("hi"), "invoke result: {text}");

    drop(client);
    handle.await.unwrap().unwrap();
}

/// S4 exercises default-deny against a synthetic capability-gated tool.
/// The fixed `brain_*` tool set ships entirely `Capability::Open`
/// (§6: administrative tools are tier-gated, not capability-gated), so
/// this builds the same collaborators `nucleus::bootstrap` would but
/// adds one gated tool to the registry before constructing the server
/// — `StdioServer` accepts any `ToolRegistry`, not only the native set.
#[tokio::test]
async fn s4_default_deny_then_grant_then_retry_succeeds() {
    struct DangerousOp;
    impl ToolDyn for DangerousOp {
        fn name(&self) -> &str {
            "dangerous_op"
        }
        fn description(&self) -> &str {
            "writes somewhere"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "required": ["path"]})
        }
        fn call(
            &self,
            input: Value,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, ToolError>> + Send + '_>> {
            Box::pin(async move { Ok(json!({"wrote": input})) })
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    let locks = LockManager::new(dir.join(".locks"), Duration::from_millis(500));
    let ledger = Arc::new(AuditLedger::new(dir.join("ledger"), locks.clone()));
    let broker = Arc::new(PermissionBroker::new(dir.join("ledger"), locks.clone()));
    let mounter = Arc::new(Mounter::new(dir.join("ledger"), locks, Duration::from_secs(2)));

    let mut registry = ToolRegistry::new();
    registry.register("dangerous_op", Arc::new(DangerousOp), Capability::named("fs_write"), Tier::Launch);
    let registry = Arc::new(registry);

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&mounter),
        Arc::clone(&broker),
        Arc::clone(&ledger),
        Tier::Launch,
        Duration::from_secs(5),
    ));
    let server = StdioServer::new(registry, mounter, dispatcher, Tier::Launch, "nucleus-mcp", "0.1.0", Duration::from_secs(2));

    let (mut client, server_io) = tokio::io::duplex(65536);
    let (read_half, write_half) = tokio::io::split(server_io);
    let handle = tokio::spawn(server.serve(read_half, write_half));

    let _ = roundtrip(&mut client, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})).await;

    let args = json!({"path": "/tmp/x"});
    let resp = roundtrip(
        &mut client,
        &json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "dangerous_op", "arguments": args}}),
    )
    .await;
    assert_eq!(resp["error"]["code"], 1010);
    let fingerprint = resp["error"]["data"]["fingerprint"].as_str().unwrap().to_string();
    assert!(!fingerprint.is_empty());

    let resp = roundtrip(
        &mut client,
        &json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {"name": "brain_grant_permission", "arguments": {"fingerprint": fingerprint}},
        }),
    )
    .await;
    assert!(resp.get("error").is_none(), "grant failed: {resp:?}");

    let resp = roundtrip(
        &mut client,
        &json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": {"name": "dangerous_op", "arguments": args}}),
    )
    .await;
    assert!(resp.get("error").is_none(), "retry after grant failed: {resp:?}");

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn s5_audit_integrity_detects_tampered_entry() {
    let tmp = tempfile::tempdir().unwrap();
    let brain_root = tmp.path().to_path_buf();
    let server = nucleus::bootstrap(config_over(brain_root.clone())).await.unwrap();
    let (mut client, server_io) = tokio::io::duplex(65536);
    let (read_half, write_half) = tokio::io::split(server_io);
    let handle = tokio::spawn(server.serve(read_half, write_half));

    let _ = roundtrip(&mut client, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})).await;
    for id in 2..=4 {
        let resp = roundtrip(
            &mut client,
            &json!({"jsonrpc": "2.0", "id": id, "method": "tools/call", "params": {"name": "brain_list_mounted", "arguments": {}}}),
        )
        .await;
        assert!(resp.get("error").is_none());
    }

    let audit_path = brain_root.join("ledger").join("audit.jsonl");
    let contents = std::fs::read_to_string(&audit_path).unwrap();
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    assert!(lines.len() >= 3, "expected at least 3 audit lines, got {}", lines.len());
    lines[2] = lines[2].replace("\"actor\":\"host\"", "\"actor\":\"someone-else\"");
    std::fs::write(&audit_path, lines.join("\n") + "\n").unwrap();

    let resp = roundtrip(
        &mut client,
        &json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": {"name": "brain_verify_audit", "arguments": {}}}),
    )
    .await;
    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    let report: Value = serde_json::from_str(text).unwrap();
    assert_eq!(report["ok"], false);
    assert_eq!(report["bad_seq"], 3);

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn s6_child_crash_mid_session_marks_mount_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let server = nucleus::bootstrap(config_over(tmp.path().to_path_buf())).await.unwrap();
    let (mut client, server_io) = tokio::io::duplex(65536);
    let (read_half, write_half) = tokio::io::split(server_io);
    let handle = tokio::spawn(server.serve(read_half, write_half));

    let _ = roundtrip(&mut client, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})).await;

    let resp = roundtrip(
        &mut client,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "brain_mount_server", "arguments": {"name": "m1", "command": "sh", "args": crashing_child_args()}},
        }),
    )
    .await;
    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    let mount_id = serde_json::from_str::<Value>(text).unwrap()["mount_id"].as_str().unwrap().to_string();

    let call = |id: i64| {
        let mount_id = mount_id.clone();
        json!({
            "jsonrpc": "2.0", "id": id, "method": "tools/call",
            "params": {"name": "brain_invoke_mounted_tool", "arguments": {"mount_id": mount_id, "tool": "echo", "args": {}}},
        })
    };

    // Two calls against a child that only answers the first and then
    // exits: exactly one succeeds, the other observes a closed child.
    // Both requests are written before either response is read, so the
    // server dispatches them concurrently (it spawns a task per frame);
    // the client side never needs two live `&mut client` borrows at once.
    let req_a = call(3);
    let req_b = call(4);
    write_frame(&mut client, &req_a).await.unwrap();
    write_frame(&mut client, &req_b).await.unwrap();

    let mut by_id: std::collections::HashMap<i64, Value> = std::collections::HashMap::new();
    for _ in 0..2 {
        let resp = read_one(&mut client).await;
        by_id.insert(resp["id"].as_i64().unwrap(), resp);
    }
    let resp_a = by_id.remove(&3).unwrap();
    let resp_b = by_id.remove(&4).unwrap();

    let errors: Vec<Value> = [&resp_a, &resp_b]
        .into_iter()
        .filter_map(|r| r.get("error").cloned())
        .collect();
    let successes = 2 - errors.len();
    assert_eq!(successes, 1, "expected exactly one success, got {resp_a:?} / {resp_b:?}");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["code"], 1031);

    let resp = roundtrip(
        &mut client,
        &json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": {"name": "brain_list_mounted", "arguments": {}}}),
    )
    .await;
    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    let mounts: Value = serde_json::from_str(text).unwrap();
    assert_eq!(mounts[0]["status"], "failed");

    drop(client);
    handle.await.unwrap().unwrap();
}

/// Property 6 (§8): after stdin EOF, shutdown_timeout is respected and
/// no lock files are left behind once every child has been stopped.
#[tokio::test]
async fn graceful_shutdown_leaves_no_lock_files() {
    let tmp = tempfile::tempdir().unwrap();
    let brain_root = tmp.path().to_path_buf();
    let server = nucleus::bootstrap(config_over(brain_root.clone())).await.unwrap();
    let (mut client, server_io) = tokio::io::duplex(65536);
    let (read_half, write_half) = tokio::io::split(server_io);
    let handle = tokio::spawn(server.serve(read_half, write_half));

    let _ = roundtrip(&mut client, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})).await;
    let _ = roundtrip(
        &mut client,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "brain_mount_server", "arguments": {"name": "m1", "command": "sh", "args": echoing_child_args()}},
        }),
    )
    .await;

    drop(client);
    handle.await.unwrap().unwrap();

    let locks_dir = brain_root.join(".locks");
    let remaining: Vec<_> = std::fs::read_dir(&locks_dir)
        .map(|rd| rd.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(remaining.is_empty(), "stray lock files: {remaining:?}");
}
