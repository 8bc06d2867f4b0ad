//! Echo MCP Library
//!
//! Fixture tool server used by the host's live e2e tests.

pub mod server;

pub use server::EchoMcpServer;
pub use server::{EchoParams, FailParams, SleepParams};
