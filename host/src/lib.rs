//! Multiplexing host for subprocess-backed MCP tool servers
//!
//! One process drives several independently-spawned tool servers over
//! stdio, behind stable aliases:
//!
//! - [`registry::ServerRegistry`] owns the alias → session map, creates
//!   sessions lazily (one spawn per alias, guaranteed), caches tool
//!   metadata with a TTL, and reconnects once when a call hits a dead
//!   transport.
//! - [`plan::execute_plan`] runs declarative multi-step call plans that
//!   mix sequential and concurrent execution with per-step retry.
//!
//! Collaborators are injected: a [`transport::TransportLauncher`] (child
//! processes in production, fakes in tests) and a
//! [`config::ConnectionStore`] for saved server definitions.

pub mod config;
pub mod error;
pub mod plan;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{ConnectionParams, ConnectionStore, JsonFileStore};
pub use error::{HostError, HostResult};
pub use plan::{execute_plan, PlanInput, PlanStep, StepResult, ToolCaller};
pub use registry::{RegistryConfig, ServerEntry, ServerRegistry, ServerState, DEFAULT_ALIAS};
pub use session::{Session, SessionStatus};
pub use transport::{ChildProcessLauncher, LaunchOptions, ToolTransport, TransportLauncher};
pub use types::{ContentItem, ToolDescriptor, ToolOutput};
