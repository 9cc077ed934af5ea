//! Shared helpers for external tool invocation.

pub mod subprocess;

pub use subprocess::{ToolOutput, probe_tool, run_tool, stderr_tail};
