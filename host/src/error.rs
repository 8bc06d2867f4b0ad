//! Error types for the tool-server host
//!
//! One typed taxonomy for everything the registry and plan executor can
//! surface. Recovery decisions (the registry's single reconnect, the plan
//! executor's retries) are made on these variants, never on message text.

use thiserror::Error;

/// Errors surfaced by the session registry and its collaborators
#[derive(Error, Debug)]
pub enum HostError {
    /// The server process could not be spawned, or the initialize
    /// handshake errored or timed out. The alias stays unregistered.
    #[error("failed to launch server '{alias}': {message}")]
    Launch {
        /// Alias the launch was attempted for
        alias: String,
        /// Underlying spawn/handshake failure
        message: String,
    },

    /// The stream to the server closed or the subprocess exited.
    /// This is the only class the registry reconnects for.
    #[error("transport to server '{alias}' failed: {message}")]
    Transport {
        /// Alias of the affected server
        alias: String,
        /// Underlying connectivity failure
        message: String,
    },

    /// The remote tool itself reported a failure. Never retried.
    #[error("tool '{tool}' on server '{alias}' failed: {message}")]
    ToolCall {
        /// Alias the call was routed to
        alias: String,
        /// Tool that reported the failure
        tool: String,
        /// Remote-reported error text
        message: String,
    },

    /// The alias is neither live nor present in the saved-server store
    #[error("unknown server alias '{0}'")]
    UnknownAlias(String),

    /// Disconnect requested for an alias that is neither live nor saved
    #[error("server '{0}' is not connected")]
    NotConnected(String),

    /// Connect requested for an alias that already has a live session
    #[error("server '{0}' is already connected")]
    AlreadyConnected(String),

    /// The default alias cannot be connected or disconnected explicitly
    #[error("'{0}' is the built-in default server and cannot be reconfigured")]
    ReservedAlias(String),

    /// The saved-server store could not be read or written
    #[error("saved-server store error: {0}")]
    Store(String),
}

impl HostError {
    /// Shorthand for a launch failure
    pub fn launch(alias: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Launch {
            alias: alias.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a connectivity failure
    pub fn transport(alias: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            alias: alias.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a remote-reported tool failure
    pub fn tool_call(
        alias: impl Into<String>,
        tool: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            alias: alias.into(),
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the session's transport is gone and a
    /// reconnect could help. Everything else is surfaced unmodified.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Result type alias for host operations
pub type HostResult<T> = Result<T, HostError>;
