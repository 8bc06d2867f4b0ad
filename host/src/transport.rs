//! Transport layer: spawning tool servers and talking to them
//!
//! [`ToolTransport`] is the black-box request/response protocol over one
//! live subprocess; [`TransportLauncher`] spawns a subprocess and runs the
//! initialize handshake. Both are traits so the registry can be driven by
//! fakes in tests; production uses the child-process stdio implementations
//! below.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::{Peer, RunningService},
    transport::TokioChildProcess,
    RoleClient, ServiceExt,
};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionParams;
use crate::error::{HostError, HostResult};
use crate::types::{ToolDescriptor, ToolOutput};

/// Default timeout for spawning and initializing a tool server
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-call timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A live duplex connection to one tool server
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Query the server's advertised tools
    async fn list_tools(&self) -> HostResult<Vec<ToolDescriptor>>;

    /// Invoke one tool and return its normalized output
    async fn call_tool(&self, tool: &str, args: Value) -> HostResult<ToolOutput>;

    /// Close the connection gracefully and wait for it to go down
    async fn shutdown(&self);

    /// Resolve once the connection has terminated for any reason
    async fn until_closed(&self);
}

/// Spawns a subprocess and performs the initialize handshake
#[async_trait]
pub trait TransportLauncher: Send + Sync {
    /// Launch a server for `alias` and return its transport
    async fn launch(
        &self,
        alias: &str,
        params: &ConnectionParams,
    ) -> HostResult<Arc<dyn ToolTransport>>;
}

/// Timeouts applied by [`ChildProcessLauncher`]
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Deadline for spawn + initialize handshake
    pub startup_timeout: Duration,
    /// Deadline per tool call; `None` disables it
    pub call_timeout: Option<Duration>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

/// Production launcher: child process + stdio MCP handshake
#[derive(Debug, Default)]
pub struct ChildProcessLauncher {
    options: LaunchOptions,
}

impl ChildProcessLauncher {
    /// Launcher with default timeouts
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher with explicit timeouts
    pub fn with_options(options: LaunchOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl TransportLauncher for ChildProcessLauncher {
    async fn launch(
        &self,
        alias: &str,
        params: &ConnectionParams,
    ) -> HostResult<Arc<dyn ToolTransport>> {
        tracing::debug!("Launching tool server '{}': {}", alias, params.command);

        let mut cmd = Command::new(&params.command);
        if !params.args.is_empty() {
            cmd.args(&params.args);
        }
        if let Some(cwd) = &params.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &params.env {
            let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
            cmd.env(key, expanded.as_ref());
        }

        // Spawn + initialize under one startup deadline. We supply the
        // cancellation token so we can keep a usable handle to it; rmcp
        // wires this exact token as the service's cancellation token.
        let cancel = CancellationToken::new();
        let service = tokio::time::timeout(self.options.startup_timeout, {
            let cancel = cancel.clone();
            async move {
                let transport = TokioChildProcess::new(cmd)?;
                let svc = ().serve_with_ct(transport, cancel).await?;
                Ok::<_, anyhow::Error>(svc)
            }
        })
        .await
        .map_err(|_| {
            HostError::launch(
                alias,
                format!(
                    "startup timed out after {:?}",
                    self.options.startup_timeout
                ),
            )
        })?
        .map_err(|e| HostError::launch(alias, e.to_string()))?;

        Ok(Arc::new(ChildProcessTransport::new(
            alias,
            service,
            cancel,
            self.options.call_timeout,
        )))
    }
}

/// Transport over one spawned child process
pub struct ChildProcessTransport {
    alias: String,
    peer: Peer<RoleClient>,
    cancel: CancellationToken,
    closed: watch::Receiver<bool>,
    call_timeout: Option<Duration>,
}

impl ChildProcessTransport {
    fn new(
        alias: &str,
        service: RunningService<RoleClient, ()>,
        cancel: CancellationToken,
        call_timeout: Option<Duration>,
    ) -> Self {
        let peer = service.peer().clone();
        let (closed_tx, closed_rx) = watch::channel(false);

        // The service future resolves on graceful cancel and on process
        // death alike; the watch channel is how everyone else finds out.
        let watch_alias = alias.to_string();
        tokio::spawn(async move {
            let _ = service.waiting().await;
            tracing::debug!("Client service for '{}' terminated", watch_alias);
            let _ = closed_tx.send(true);
        });

        Self {
            alias: alias.to_string(),
            peer,
            cancel,
            closed: closed_rx,
            call_timeout,
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.cancel.is_cancelled()
    }

    /// A call error against a known-dead connection is a connectivity
    /// failure; otherwise the remote rejected the call itself.
    fn classify_call_error(&self, tool: &str, error: impl Display) -> HostError {
        if self.is_closed() {
            HostError::transport(&self.alias, error.to_string())
        } else {
            HostError::tool_call(&self.alias, tool, error.to_string())
        }
    }
}

#[async_trait]
impl ToolTransport for ChildProcessTransport {
    async fn list_tools(&self) -> HostResult<Vec<ToolDescriptor>> {
        if self.is_closed() {
            return Err(HostError::transport(&self.alias, "connection closed"));
        }

        let response = self
            .peer
            .list_tools(Default::default())
            .await
            .map_err(|e| HostError::transport(&self.alias, format!("list tools failed: {e}")))?;

        Ok(response
            .tools
            .into_iter()
            .map(|t| ToolDescriptor {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()),
                input_schema: Some(serde_json::to_value(&t.input_schema).unwrap_or_default()),
            })
            .collect())
    }

    async fn call_tool(&self, tool: &str, args: Value) -> HostResult<ToolOutput> {
        if self.is_closed() {
            return Err(HostError::transport(&self.alias, "connection closed"));
        }

        let arguments = args.as_object().cloned();
        let request = self.peer.call_tool(CallToolRequestParam {
            name: tool.to_string().into(),
            arguments,
            task: None,
        });

        let result = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                // A wedged stream is treated like a dead one
                HostError::transport(
                    &self.alias,
                    format!("call to '{tool}' timed out after {limit:?}"),
                )
            })?,
            None => request.await,
        };

        let result = result.map_err(|e| self.classify_call_error(tool, e))?;

        if result.is_error.unwrap_or(false) {
            let output = ToolOutput::from_call_result(result);
            return Err(HostError::tool_call(&self.alias, tool, output.as_text()));
        }

        Ok(ToolOutput::from_call_result(result))
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        let mut closed = self.closed.clone();
        // Sender dropping counts as closed too
        let _ = closed.wait_for(|c| *c).await;
    }

    async fn until_closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|c| *c).await;
    }
}
