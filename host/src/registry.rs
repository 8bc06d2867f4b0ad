//! Session registry: alias → live session, with caching and recovery
//!
//! The registry is the only owner of the alias→session and alias→cache
//! maps. Sessions are created lazily under a per-alias mutex (so concurrent
//! first callers spawn exactly one subprocess), tool metadata is cached
//! with a TTL, and `call_tool` transparently reconnects once when a
//! session's transport has died underneath it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::{ConnectionParams, ConnectionStore};
use crate::error::{HostError, HostResult};
use crate::plan::ToolCaller;
use crate::session::{HolderExit, Session};
use crate::transport::TransportLauncher;
use crate::types::{ToolDescriptor, ToolOutput};

/// Alias of the built-in always-on server. It cannot be connected or
/// disconnected through the explicit lifecycle operations.
pub const DEFAULT_ALIAS: &str = "valet";

/// Default freshness window for cached tool metadata
pub const DEFAULT_TOOL_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default pause before the single reconnect attempt in `call_tool`
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Registry tunables
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Freshness window for cached tool metadata
    pub tool_cache_ttl: Duration,
    /// Pause before the single reconnect attempt in `call_tool`
    pub reconnect_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tool_cache_ttl: DEFAULT_TOOL_CACHE_TTL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Where an alias currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// A live session exists
    Connected,
    /// Known from configuration but not currently running
    Saved,
    /// Neither live nor configured
    Unknown,
}

/// Introspection record for one alias
#[derive(Debug, Clone, Serialize)]
pub struct ServerEntry {
    pub alias: String,
    pub state: ServerState,
    /// Present in the saved-server store
    pub saved: bool,
    /// Cached tool count, if metadata has been fetched
    pub tool_count: Option<usize>,
    pub uptime_secs: Option<u64>,
}

struct ToolCacheEntry {
    descriptors: Vec<ToolDescriptor>,
    expires_at: Instant,
}

type SessionMap = Arc<RwLock<HashMap<String, Arc<Session>>>>;
type CacheMap = Arc<RwLock<HashMap<String, ToolCacheEntry>>>;

/// Keyed store of live tool-server sessions
///
/// Constructed once per process with its collaborators injected; everything
/// that needs tool access holds a reference to it.
pub struct ServerRegistry {
    launcher: Arc<dyn TransportLauncher>,
    store: Arc<dyn ConnectionStore>,
    default_params: ConnectionParams,
    config: RegistryConfig,
    sessions: SessionMap,
    tool_cache: CacheMap,
    spawn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ServerRegistry {
    /// Registry with default tunables
    pub fn new(
        launcher: Arc<dyn TransportLauncher>,
        store: Arc<dyn ConnectionStore>,
        default_params: ConnectionParams,
    ) -> Self {
        Self::with_config(launcher, store, default_params, RegistryConfig::default())
    }

    /// Registry with explicit tunables
    pub fn with_config(
        launcher: Arc<dyn TransportLauncher>,
        store: Arc<dyn ConnectionStore>,
        default_params: ConnectionParams,
        config: RegistryConfig,
    ) -> Self {
        Self {
            launcher,
            store,
            default_params,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            tool_cache: Arc::new(RwLock::new(HashMap::new())),
            spawn_locks: Mutex::new(HashMap::new()),
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Return the live session for `alias`, launching one if needed.
    ///
    /// Launch failures leave nothing registered; the caller retries
    /// explicitly if it wants to.
    pub async fn ensure_session(&self, alias: &str) -> HostResult<Arc<Session>> {
        if let Some(session) = self.live_session(alias).await {
            return Ok(session);
        }

        let lock = self.spawn_lock(alias).await;
        let _guard = lock.lock().await;

        // Re-check under the lock so concurrent first callers observe
        // exactly one spawn
        if let Some(session) = self.live_session(alias).await {
            return Ok(session);
        }

        let params = self.resolve_params(alias)?;
        self.spawn_session(alias, &params).await
    }

    /// Explicitly connect a non-default alias.
    ///
    /// Rejects the default alias and any alias that still has a live
    /// session. With `save`, the params are persisted for later launches.
    pub async fn connect_server(
        &self,
        alias: &str,
        params: ConnectionParams,
        save: bool,
    ) -> HostResult<ServerEntry> {
        if alias == DEFAULT_ALIAS {
            return Err(HostError::ReservedAlias(alias.to_string()));
        }

        let lock = self.spawn_lock(alias).await;
        let _guard = lock.lock().await;

        if self.live_session(alias).await.is_some() {
            return Err(HostError::AlreadyConnected(alias.to_string()));
        }

        self.spawn_session(alias, &params).await?;
        if save {
            self.store.save(alias, &params)?;
        }
        Ok(self.server_entry(alias).await)
    }

    /// Disconnect an alias, optionally forgetting its saved params.
    ///
    /// Succeeds for an alias that is only saved (nothing to stop); errors
    /// with `NotConnected` when the alias is neither live nor saved.
    pub async fn disconnect_server(&self, alias: &str, forget: bool) -> HostResult<()> {
        if alias == DEFAULT_ALIAS {
            return Err(HostError::ReservedAlias(alias.to_string()));
        }

        let session = self.sessions.write().await.remove(alias);
        self.tool_cache.write().await.remove(alias);

        let was_live = session.is_some();
        if let Some(session) = session {
            session.close().await;
            tracing::info!("Tool server '{}' disconnected", alias);
        }

        let was_saved = self.store.load()?.contains_key(alias);
        if forget && was_saved {
            self.store.remove(alias)?;
            tracing::info!("Forgot saved server '{}'", alias);
        }

        if !was_live && !was_saved {
            return Err(HostError::NotConnected(alias.to_string()));
        }
        Ok(())
    }

    /// Cancel every holder task, wait for them all, clear every map
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        if !sessions.is_empty() {
            tracing::info!("Shutting down {} tool server(s)", sessions.len());
        }
        join_all(sessions.iter().map(|session| session.close())).await;

        self.tool_cache.write().await.clear();
        self.spawn_locks.lock().await.clear();
    }

    // ========================================================================
    // Tool access
    // ========================================================================

    /// Call a tool on an alias's server.
    ///
    /// A connectivity failure evicts the session and retries exactly once
    /// after a short delay; every other error propagates unmodified.
    pub async fn call_tool(&self, alias: &str, tool: &str, args: Value) -> HostResult<ToolOutput> {
        let session = self.ensure_session(alias).await?;
        match session.call_tool(tool, args.clone()).await {
            Ok(output) => Ok(output),
            Err(e) if e.is_connectivity() => {
                tracing::warn!(
                    "Transport to '{}' lost during '{}', reconnecting once: {}",
                    alias,
                    tool,
                    e
                );
                self.evict(alias, session.id()).await;
                session.close().await;

                tokio::time::sleep(self.config.reconnect_delay).await;
                let session = self.ensure_session(alias).await?;
                session.call_tool(tool, args).await
            }
            Err(e) => Err(e),
        }
    }

    /// List an alias's tools, served from the TTL cache when fresh.
    ///
    /// Concurrent refreshes are tolerated without locking; the operation
    /// is idempotent.
    pub async fn list_tools(&self, alias: &str) -> HostResult<Vec<ToolDescriptor>> {
        if let Some(entry) = self.tool_cache.read().await.get(alias) {
            if Instant::now() < entry.expires_at {
                return Ok(entry.descriptors.clone());
            }
        }

        let session = self.ensure_session(alias).await?;
        let descriptors = session.list_tools().await?;

        self.tool_cache.write().await.insert(
            alias.to_string(),
            ToolCacheEntry {
                descriptors: descriptors.clone(),
                expires_at: Instant::now() + self.config.tool_cache_ttl,
            },
        );
        tracing::debug!("Cached {} tool(s) for '{}'", descriptors.len(), alias);
        Ok(descriptors)
    }

    /// Tools of every known alias; unreachable servers are skipped with a
    /// warning rather than failing the aggregate.
    pub async fn list_all_tools(&self) -> Vec<(String, Vec<ToolDescriptor>)> {
        let mut all = Vec::new();
        for alias in self.aliases().await {
            match self.list_tools(&alias).await {
                Ok(descriptors) => all.push((alias, descriptors)),
                Err(e) => tracing::warn!("Failed to list tools from '{}': {}", alias, e),
            }
        }
        all
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Every alias the registry knows: the default, live sessions, and
    /// saved configurations
    pub async fn aliases(&self) -> Vec<String> {
        let mut set: BTreeSet<String> = BTreeSet::new();
        set.insert(DEFAULT_ALIAS.to_string());
        set.extend(self.sessions.read().await.keys().cloned());
        match self.store.load() {
            Ok(saved) => set.extend(saved.into_keys()),
            Err(e) => tracing::warn!("Failed to load saved servers: {}", e),
        }
        set.into_iter().collect()
    }

    /// Live + saved state for one alias
    pub async fn server_entry(&self, alias: &str) -> ServerEntry {
        let session = self.sessions.read().await.get(alias).cloned();
        let live = session.filter(|s| s.is_live());
        let saved = self
            .store
            .load()
            .map(|s| s.contains_key(alias))
            .unwrap_or(false);

        let state = if live.is_some() {
            ServerState::Connected
        } else if saved || alias == DEFAULT_ALIAS {
            ServerState::Saved
        } else {
            ServerState::Unknown
        };

        ServerEntry {
            alias: alias.to_string(),
            state,
            saved,
            tool_count: self
                .tool_cache
                .read()
                .await
                .get(alias)
                .map(|e| e.descriptors.len()),
            uptime_secs: live.map(|s| s.uptime_secs()),
        }
    }

    /// Entries for every known alias
    pub async fn list_servers(&self) -> Vec<ServerEntry> {
        let mut entries = Vec::new();
        for alias in self.aliases().await {
            entries.push(self.server_entry(&alias).await);
        }
        entries
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn spawn_lock(&self, alias: &str) -> Arc<Mutex<()>> {
        let mut locks = self.spawn_locks.lock().await;
        locks.entry(alias.to_string()).or_default().clone()
    }

    fn resolve_params(&self, alias: &str) -> HostResult<ConnectionParams> {
        if alias == DEFAULT_ALIAS {
            return Ok(self.default_params.clone());
        }
        self.store
            .load()?
            .remove(alias)
            .ok_or_else(|| HostError::UnknownAlias(alias.to_string()))
    }

    /// Live session for the alias, dropping any terminal leftover entry
    async fn live_session(&self, alias: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(alias).cloned()?;
        if session.is_live() {
            return Some(session);
        }
        self.evict(alias, session.id()).await;
        None
    }

    /// Remove the alias's session and cache entry, but only if the map
    /// still holds the session with the given id; a replacement registered
    /// in the meantime must survive.
    async fn evict(&self, alias: &str, id: u64) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(alias).is_some_and(|s| s.id() == id) {
            sessions.remove(alias);
        }
        drop(sessions);
        self.tool_cache.write().await.remove(alias);
    }

    /// Launch, attach the holder task, register. Caller holds the alias's
    /// spawn lock.
    async fn spawn_session(
        &self,
        alias: &str,
        params: &ConnectionParams,
    ) -> HostResult<Arc<Session>> {
        let transport = self.launcher.launch(alias, params).await?;
        let session = Arc::new(Session::new(alias, transport));

        let holder_session = session.clone();
        let sessions = self.sessions.clone();
        let cache = self.tool_cache.clone();
        let handle = tokio::spawn(async move {
            if holder_session.hold().await == HolderExit::TransportClosed {
                evict_if_current(&sessions, &cache, &holder_session).await;
            }
        });
        session.set_holder(handle).await;
        session.mark_ready();

        self.sessions
            .write()
            .await
            .insert(alias.to_string(), session.clone());
        tracing::info!("Tool server '{}' connected", alias);
        Ok(session)
    }
}

#[async_trait]
impl ToolCaller for ServerRegistry {
    async fn call(&self, alias: Option<&str>, tool: &str, args: Value) -> HostResult<ToolOutput> {
        self.call_tool(alias.unwrap_or(DEFAULT_ALIAS), tool, args)
            .await
    }
}

/// Holder-task half of eviction: runs outside `&self` because the holder
/// outlives any one registry borrow
async fn evict_if_current(sessions: &SessionMap, cache: &CacheMap, session: &Arc<Session>) {
    let alias = session.alias();
    let mut map = sessions.write().await;
    if map.get(alias).is_some_and(|current| current.id() == session.id()) {
        map.remove(alias);
        drop(map);
        cache.write().await.remove(alias);
        tracing::debug!("Evicted failed session for '{}'", alias);
    }
}
