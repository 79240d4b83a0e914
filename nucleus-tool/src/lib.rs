//! # nucleus-tool — tool interface and tiered registry
//!
//! Defines [`ToolDyn`], the object-safe trait any tool source (a native
//! `brain_*` handler, or a mounted child's tool wrapped by the Mounter)
//! implements, and [`ToolRegistry`], which holds them keyed by their
//! host-visible qualified name alongside a declared [`Capability`] and
//! minimum [`Tier`].
//!
//! Registration and lookup are deliberately separate from *dispatch*:
//! this crate knows nothing about policy grants or audit — it only
//! answers "does this name exist, what does it cost to call, and is it
//! visible at this tier."

pub mod capability;
pub mod schema;
pub mod tier;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capability::Capability;
pub use tier::Tier;

/// Errors from tool operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool was not found in the registry.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Tool execution failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The input provided to the tool was invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A tool's host-visible identity: the triple returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    /// Host-visible qualified name. Unprefixed for native tools,
    /// `{mount_name}:{tool}` for mounted ones.
    pub qualified_name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema (a supported subset — see [`schema`]) for the input.
    pub input_schema: serde_json::Value,
}

/// Object-safe trait for tool implementations.
///
/// Any tool source (a native handler or an MCP-mounted tool) implements
/// this trait. Tools are stored as `Arc<dyn ToolDyn>` in [`ToolRegistry`].
pub trait ToolDyn: Send + Sync {
    /// The tool's unqualified name as the underlying implementation knows it.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    fn call(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>;
}

/// A single registered entry: the tool implementation plus the metadata
/// the dispatcher needs before it ever calls `call()`.
struct Entry {
    tool: Arc<dyn ToolDyn>,
    qualified_name: String,
    capability: Capability,
    min_tier: Tier,
}

/// Regex for a valid qualified tool name: `[A-Za-z_][A-Za-z0-9_:-]*`.
fn name_pattern() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_:-]*$").expect("valid regex"))
}

/// Validate a qualified tool name against the naming convention (§3).
pub fn is_valid_qualified_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

/// Registry of tools available to the dispatcher, tiered by visibility.
///
/// Holds tools as `Arc<dyn ToolDyn>` keyed by their qualified name. The
/// dispatcher uses this to look up a tool's capability (for policy) and
/// its handler (for execution), and the stdio server uses it to build
/// `tools/list` responses filtered to the current [`Tier`].
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a tool under `qualified_name`, with its declared
    /// [`Capability`] and the minimum [`Tier`] at which it is visible.
    /// Overwrites any existing entry with the same qualified name.
    ///
    /// Panics if `qualified_name` does not match the naming convention —
    /// this is a programming error (a bad native tool name, or a
    /// mount-name rewrite bug), not a runtime condition callers recover from.
    pub fn register(
        &mut self,
        qualified_name: impl Into<String>,
        tool: Arc<dyn ToolDyn>,
        capability: Capability,
        min_tier: Tier,
    ) {
        let qualified_name = qualified_name.into();
        assert!(
            is_valid_qualified_name(&qualified_name),
            "invalid qualified tool name: {qualified_name}"
        );
        self.entries.insert(
            qualified_name.clone(),
            Entry {
                tool,
                qualified_name,
                capability,
                min_tier,
            },
        );
    }

    /// Register a native (Tier-0-visible, open-capability) tool. A
    /// convenience for the common case; equivalent to calling
    /// [`register`](Self::register) with `Capability::Open` and
    /// `Tier::Launch`.
    pub fn register_open(&mut self, tool: Arc<dyn ToolDyn>) {
        let name = tool.name().to_string();
        self.register(name, tool, Capability::Open, Tier::Launch);
    }

    /// Look up a tool's handler by qualified name, irrespective of tier.
    pub fn get(&self, qualified_name: &str) -> Option<&Arc<dyn ToolDyn>> {
        self.entries.get(qualified_name).map(|e| &e.tool)
    }

    /// Look up a tool's declared capability.
    pub fn capability_of(&self, qualified_name: &str) -> Option<Capability> {
        self.entries.get(qualified_name).map(|e| e.capability.clone())
    }

    /// Whether `qualified_name` is visible at `tier`.
    pub fn is_visible(&self, qualified_name: &str, tier: Tier) -> bool {
        self.entries
            .get(qualified_name)
            .is_some_and(|e| tier >= e.min_tier)
    }

    /// Descriptors for every tool visible at `tier`, for `tools/list`.
    pub fn list_visible(&self, tier: Tier) -> Vec<ToolDescriptor> {
        self.entries
            .values()
            .filter(|e| tier >= e.min_tier)
            .map(|e| ToolDescriptor {
                qualified_name: e.qualified_name.clone(),
                description: e.tool.description().to_string(),
                input_schema: e.tool.input_schema(),
            })
            .collect()
    }

    /// Number of registered tools (any tier).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    impl ToolDyn for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input back"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn call(
            &self,
            input: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>
        {
            Box::pin(async move { Ok(json!({"echoed": input})) })
        }
    }

    #[test]
    fn valid_qualified_names() {
        assert!(is_valid_qualified_name("brain_mount_server"));
        assert!(is_valid_qualified_name("m1:echo"));
        assert!(is_valid_qualified_name("_leading_underscore"));
        assert!(!is_valid_qualified_name("1leading_digit"));
        assert!(!is_valid_qualified_name("has space"));
        assert!(!is_valid_qualified_name(""));
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        assert!(reg.is_empty());
        reg.register_open(Arc::new(EchoTool));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nonexistent").is_none());
    }

    #[test]
    fn tiered_visibility_filters_list_and_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(
            "advanced_only",
            Arc::new(EchoTool),
            Capability::Open,
            Tier::Advanced,
        );
        assert!(!reg.is_visible("advanced_only", Tier::Launch));
        assert!(reg.is_visible("advanced_only", Tier::Advanced));
        assert_eq!(reg.list_visible(Tier::Launch).len(), 0);
        assert_eq!(reg.list_visible(Tier::Advanced).len(), 1);
    }

    #[test]
    fn capability_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(
            "dangerous_op",
            Arc::new(EchoTool),
            Capability::named("fs_write"),
            Tier::Launch,
        );
        assert_eq!(
            reg.capability_of("dangerous_op"),
            Some(Capability::named("fs_write"))
        );
    }

    #[tokio::test]
    async fn registered_tool_is_callable() {
        let mut reg = ToolRegistry::new();
        reg.register_open(Arc::new(EchoTool));
        let tool = reg.get("echo").unwrap();
        let result = tool.call(json!({"msg": "hi"})).await.unwrap();
        assert_eq!(result, json!({"echoed": {"msg": "hi"}}));
    }

    #[test]
    #[should_panic(expected = "invalid qualified tool name")]
    fn register_rejects_bad_name() {
        let mut reg = ToolRegistry::new();
        reg.register("has space", Arc::new(EchoTool), Capability::Open, Tier::Launch);
    }
}
