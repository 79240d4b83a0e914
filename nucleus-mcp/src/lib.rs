//! # nucleus-mcp — wire protocol and stdio child client
//!
//! Two halves of the same protocol: [`protocol`] defines the
//! line-delimited JSON-RPC 2.0 frames both the Child MCP Client and the
//! host-facing stdio server speak, and [`client`] implements the
//! client side — one [`client::ChildMcpClient`] per mounted subprocess.
//!
//! This crate does not depend on `rmcp`. The dispatch pipeline needs
//! low-level control over request correlation, partial-line buffering,
//! and malformed-frame recovery that a higher-level MCP SDK abstracts
//! away, so the wire protocol is hand-rolled here instead.

pub mod client;
pub mod error;
pub mod protocol;

pub use client::{ChildMcpClient, ClientState};
pub use error::McpError;
