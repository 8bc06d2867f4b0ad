//! Live sessions and the holder task that keeps them attached
//!
//! A [`Session`] wraps one launched transport. Its holder task (spawned by
//! the registry) parks until the session is cancelled or the subprocess
//! goes away, so the connection stays open without anyone polling it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{HostError, HostResult};
use crate::transport::ToolTransport;
use crate::types::{ToolDescriptor, ToolOutput};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of one session
///
/// `Closed` and `Failed` are terminal; a fresh launch is the only way back
/// to a usable session for that alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Launch finished, not yet registered
    Connecting,
    /// Connected and usable
    Ready,
    /// Cancelled gracefully
    Closed,
    /// Subprocess exited unexpectedly
    Failed,
}

/// How the holder task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HolderExit {
    /// Cancelled via [`Session::close`] or registry shutdown
    Cancelled,
    /// The transport went down on its own
    TransportClosed,
}

/// A live connection to one tool-server subprocess
pub struct Session {
    alias: String,
    id: u64,
    transport: Arc<dyn ToolTransport>,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    holder: Mutex<Option<JoinHandle<()>>>,
    started_at: Instant,
}

impl Session {
    /// Wrap a freshly launched transport. Starts in `Connecting`; the
    /// registry flips it to `Ready` once the holder task is attached.
    pub(crate) fn new(alias: &str, transport: Arc<dyn ToolTransport>) -> Self {
        let (status, _) = watch::channel(SessionStatus::Connecting);
        Self {
            alias: alias.to_string(),
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            status,
            cancel: CancellationToken::new(),
            holder: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    /// Alias this session serves
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Unique id, used by the holder task to evict only itself
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Whether the session is still attached (holder not finished)
    pub fn is_live(&self) -> bool {
        matches!(
            self.status(),
            SessionStatus::Connecting | SessionStatus::Ready
        )
    }

    /// Seconds since the session was created
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub(crate) fn mark_ready(&self) {
        self.status.send_replace(SessionStatus::Ready);
    }

    pub(crate) async fn set_holder(&self, handle: JoinHandle<()>) {
        *self.holder.lock().await = Some(handle);
    }

    /// Query the server's tools
    pub async fn list_tools(&self) -> HostResult<Vec<ToolDescriptor>> {
        self.check_ready()?;
        self.transport.list_tools().await
    }

    /// Invoke one tool
    pub async fn call_tool(&self, tool: &str, args: Value) -> HostResult<ToolOutput> {
        self.check_ready()?;
        self.transport.call_tool(tool, args).await
    }

    fn check_ready(&self) -> HostResult<()> {
        match self.status() {
            SessionStatus::Ready => Ok(()),
            other => Err(HostError::transport(
                &self.alias,
                format!("session is {other:?}"),
            )),
        }
    }

    /// Park until cancellation or transport death, then settle the final
    /// state. Run inside the holder task.
    pub(crate) async fn hold(&self) -> HolderExit {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.transport.shutdown().await;
                self.status.send_replace(SessionStatus::Closed);
                tracing::debug!("Session '{}' closed", self.alias);
                HolderExit::Cancelled
            }
            _ = self.transport.until_closed() => {
                self.status.send_replace(SessionStatus::Failed);
                tracing::warn!("Tool server '{}' exited unexpectedly", self.alias);
                HolderExit::TransportClosed
            }
        }
    }

    /// Cancel the holder task and wait for it to finish
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.holder.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Holder task for '{}' ended abnormally: {e}", self.alias);
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("alias", &self.alias)
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}
