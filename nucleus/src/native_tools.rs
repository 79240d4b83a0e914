//! Native `brain_*` tools (§6): each one `ToolDyn` struct holding an
//! `Arc<NucleusContext>`, the same `mgr: Arc<JobManager>`-field idiom
//! used elsewhere in this codebase for handlers, generalized to the one
//! shared context this crate assembles instead of one manager per
//! concern.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use nucleus_core::id::MountId;
use nucleus_ledger::PermissionError;
use nucleus_tool::{Capability, Tier, ToolDyn, ToolError, ToolRegistry};

use crate::context::NucleusContext;
use crate::mounter::MountError;

fn mount_err(err: MountError) -> ToolError {
    ToolError::ExecutionFailed(err.to_string())
}

fn permission_err(err: PermissionError) -> ToolError {
    ToolError::ExecutionFailed(err.to_string())
}

fn require_string(input: &Value, field: &str) -> Result<String, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing required field `{field}`")))
}

fn string_array(input: &Value, field: &str) -> Vec<String> {
    input
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn string_map(input: &Value, field: &str) -> HashMap<String, String> {
    input
        .get(field)
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

struct MountServerTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for MountServerTool {
    fn name(&self) -> &str {
        "brain_mount_server"
    }

    fn description(&self) -> &str {
        "Start a child MCP server and mount its tools under a namespace."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["name", "command"],
            "properties": {
                "name": {"type": "string"},
                "command": {"type": "string"},
                "args": {"type": "array", "items": {"type": "string"}},
                "env": {"type": "object"},
            },
        })
    }

    fn call(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let name = require_string(&input, "name")?;
            let command = require_string(&input, "command")?;
            let args = string_array(&input, "args");
            let env = string_map(&input, "env");
            let mount_id = self.ctx.mounter.mount(&name, &command, args, env).await.map_err(mount_err)?;
            Ok(json!({"mount_id": mount_id.to_string()}))
        })
    }
}

struct UnmountServerTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for UnmountServerTool {
    fn name(&self) -> &str {
        "brain_unmount_server"
    }

    fn description(&self) -> &str {
        "Stop a mounted child MCP server and drop its namespace."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "required": ["mount_id"], "properties": {"mount_id": {"type": "string"}}})
    }

    fn call(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let mount_id: MountId = require_string(&input, "mount_id")?.into();
            self.ctx.mounter.unmount(&mount_id).await.map_err(mount_err)?;
            Ok(json!({}))
        })
    }
}

struct ListMountedTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for ListMountedTool {
    fn name(&self) -> &str {
        "brain_list_mounted"
    }

    fn description(&self) -> &str {
        "List every currently mounted child server and its status."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn call(&self, _input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let records = self.ctx.mounter.list_mounts().await;
            serde_json::to_value(records).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
        })
    }
}

struct DiscoverMountedToolsTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for DiscoverMountedToolsTool {
    fn name(&self) -> &str {
        "brain_discover_mounted_tools"
    }

    fn description(&self) -> &str {
        "List tools exposed by one mounted server, or every mounted server if none is named."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"mount_id": {"type": "string"}}})
    }

    fn call(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let wanted_name = match input.get("mount_id").and_then(Value::as_str) {
                Some(id) => {
                    let records = self.ctx.mounter.list_mounts().await;
                    let record = records
                        .into_iter()
                        .find(|r| r.mount_id.as_str() == id)
                        .ok_or_else(|| ToolError::InvalidInput(format!("no such mount: {id}")))?;
                    Some(record.name)
                }
                None => None,
            };

            let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
            for tool in self.ctx.mounter.list_tools().await {
                let Some((prefix, _)) = tool.qualified_name.split_once(':') else {
                    continue;
                };
                if let Some(wanted) = &wanted_name {
                    if prefix != wanted {
                        continue;
                    }
                }
                grouped.entry(prefix.to_string()).or_default().push(json!({
                    "qualified_name": tool.qualified_name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                }));
            }
            Ok(Value::Object(grouped.into_iter().map(|(k, v)| (k, Value::Array(v))).collect()))
        })
    }
}

struct InvokeMountedToolTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for InvokeMountedToolTool {
    fn name(&self) -> &str {
        "brain_invoke_mounted_tool"
    }

    fn description(&self) -> &str {
        "Invoke a tool on a mounted child server directly, bypassing qualified-name resolution."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["mount_id", "tool"],
            "properties": {
                "mount_id": {"type": "string"},
                "tool": {"type": "string"},
                "args": {"type": "object"},
            },
        })
    }

    fn call(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let mount_id: MountId = require_string(&input, "mount_id")?.into();
            let tool = require_string(&input, "tool")?;
            let args = input.get("args").cloned().unwrap_or_else(|| json!({}));
            let deadline = Instant::now() + self.ctx.default_call_deadline;
            self.ctx
                .mounter
                .invoke(&mount_id, &tool, args, deadline)
                .await
                .map_err(mount_err)
        })
    }
}

struct GrantPermissionTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for GrantPermissionTool {
    fn name(&self) -> &str {
        "brain_grant_permission"
    }

    fn description(&self) -> &str {
        "Grant the capability a prior tool call was denied for, identified by its fingerprint."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "required": ["fingerprint"], "properties": {"fingerprint": {"type": "string"}}})
    }

    fn call(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let fingerprint = require_string(&input, "fingerprint")?;
            let grant = self
                .ctx
                .broker
                .grant_by_fingerprint(&fingerprint)
                .await
                .map_err(permission_err)?;
            serde_json::to_value(grant).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
        })
    }
}

struct RevokePermissionTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for RevokePermissionTool {
    fn name(&self) -> &str {
        "brain_revoke_permission"
    }

    fn description(&self) -> &str {
        "Revoke a previously granted capability by its fingerprint."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "required": ["fingerprint"], "properties": {"fingerprint": {"type": "string"}}})
    }

    fn call(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let fingerprint = require_string(&input, "fingerprint")?;
            self.ctx.broker.revoke(&fingerprint).await.map_err(permission_err)?;
            Ok(json!({}))
        })
    }
}

struct ListGrantsTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for ListGrantsTool {
    fn name(&self) -> &str {
        "brain_list_grants"
    }

    fn description(&self) -> &str {
        "List every capability grant currently held."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn call(&self, _input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let grants = self.ctx.broker.list().await.map_err(permission_err)?;
            serde_json::to_value(grants).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
        })
    }
}

struct AuditLogTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for AuditLogTool {
    fn name(&self) -> &str {
        "brain_audit_log"
    }

    fn description(&self) -> &str {
        "Return the most recent audit ledger entries."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"limit": {"type": "integer"}}})
    }

    fn call(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let limit = input.get("limit").and_then(Value::as_u64).unwrap_or(50) as usize;
            let entries = self.ctx.ledger.tail(limit).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
            serde_json::to_value(entries).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
        })
    }
}

struct VerifyAuditTool {
    ctx: Arc<NucleusContext>,
}

impl ToolDyn for VerifyAuditTool {
    fn name(&self) -> &str {
        "brain_verify_audit"
    }

    fn description(&self) -> &str {
        "Walk the audit chain and report whether it is intact."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn call(&self, _input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let report = self.ctx.ledger.verify().await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
            match report {
                nucleus_ledger::VerifyReport::Ok { entries } => Ok(json!({"ok": true, "entries": entries})),
                nucleus_ledger::VerifyReport::Broken { seq, reason } => {
                    Ok(json!({"ok": false, "bad_seq": seq, "reason": reason}))
                }
            }
        })
    }
}

/// Register every native `brain_*` tool into `registry`, each holding
/// a clone of `ctx`. Called once at startup.
pub fn register_all(ctx: Arc<NucleusContext>, registry: &mut ToolRegistry) {
    registry.register(
        "brain_mount_server",
        Arc::new(MountServerTool { ctx: Arc::clone(&ctx) }),
        Capability::Open,
        Tier::Launch,
    );
    registry.register(
        "brain_unmount_server",
        Arc::new(UnmountServerTool { ctx: Arc::clone(&ctx) }),
        Capability::Open,
        Tier::Standard,
    );
    registry.register(
        "brain_list_mounted",
        Arc::new(ListMountedTool { ctx: Arc::clone(&ctx) }),
        Capability::Open,
        Tier::Launch,
    );
    registry.register(
        "brain_discover_mounted_tools",
        Arc::new(DiscoverMountedToolsTool { ctx: Arc::clone(&ctx) }),
        Capability::Open,
        Tier::Launch,
    );
    registry.register(
        "brain_invoke_mounted_tool",
        Arc::new(InvokeMountedToolTool { ctx: Arc::clone(&ctx) }),
        Capability::Open,
        Tier::Launch,
    );
    registry.register(
        "brain_grant_permission",
        Arc::new(GrantPermissionTool { ctx: Arc::clone(&ctx) }),
        Capability::Open,
        Tier::Launch,
    );
    registry.register(
        "brain_revoke_permission",
        Arc::new(RevokePermissionTool { ctx: Arc::clone(&ctx) }),
        Capability::Open,
        Tier::Standard,
    );
    registry.register(
        "brain_list_grants",
        Arc::new(ListGrantsTool { ctx: Arc::clone(&ctx) }),
        Capability::Open,
        Tier::Launch,
    );
    registry.register(
        "brain_audit_log",
        Arc::new(AuditLogTool { ctx: Arc::clone(&ctx) }),
        Capability::Open,
        Tier::Launch,
    );
    registry.register(
        "brain_verify_audit",
        Arc::new(VerifyAuditTool { ctx }),
        Capability::Open,
        Tier::Standard,
    );
}
