//! Connection parameters and the saved-server store
//!
//! Non-default aliases are resolved through a [`ConnectionStore`], backed in
//! production by a `.valet-servers.json` file. The registry is the only
//! consumer; front-ends never touch the store directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

/// File name for the saved-server store
pub const SERVERS_FILE: &str = ".valet-servers.json";

/// How to spawn one tool server: command, arguments, optional working
/// directory and environment overrides. Immutable once a session is
/// created from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl ConnectionParams {
    /// Create params for a bare command with arguments
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment override
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Durable alias → [`ConnectionParams`] storage.
///
/// Consulted when resolving a non-default alias and updated by explicit
/// connect/disconnect lifecycle operations.
pub trait ConnectionStore: Send + Sync {
    /// Load the full saved mapping
    fn load(&self) -> HostResult<HashMap<String, ConnectionParams>>;

    /// Persist params for an alias, replacing any previous entry
    fn save(&self, alias: &str, params: &ConnectionParams) -> HostResult<()>;

    /// Remove a saved entry. Returns whether one existed.
    fn remove(&self, alias: &str) -> HostResult<bool>;
}

/// On-disk file shape: `{"servers": {alias: {command, args, ...}}}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedServers {
    #[serde(default)]
    servers: HashMap<String, ConnectionParams>,
}

/// JSON-file backed [`ConnectionStore`]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Use a specific file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locate the saved-server file.
    ///
    /// Search order:
    /// 1. Current directory and parent directories (walking up to root)
    /// 2. Global config at ~/.config/valet/
    /// 3. Fall back to the current directory (file created on first save)
    pub fn discover() -> Self {
        if let Some(path) = find_servers_file() {
            tracing::debug!("Using saved-server file: {}", path.display());
            return Self::new(path);
        }

        tracing::debug!("No {} found, will create in current directory", SERVERS_FILE);
        Self::new(PathBuf::from(SERVERS_FILE))
    }

    /// The path this store reads and writes
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> HostResult<SavedServers> {
        if !self.path.exists() {
            return Ok(SavedServers::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| HostError::Store(format!("read {}: {e}", self.path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| HostError::Store(format!("parse {}: {e}", self.path.display())))
    }

    fn write_all(&self, saved: &SavedServers) -> HostResult<()> {
        let content = serde_json::to_string_pretty(saved)
            .map_err(|e| HostError::Store(format!("serialize saved servers: {e}")))?;
        std::fs::write(&self.path, content)
            .map_err(|e| HostError::Store(format!("write {}: {e}", self.path.display())))
    }
}

impl ConnectionStore for JsonFileStore {
    fn load(&self) -> HostResult<HashMap<String, ConnectionParams>> {
        Ok(self.read_all()?.servers)
    }

    fn save(&self, alias: &str, params: &ConnectionParams) -> HostResult<()> {
        let mut saved = self.read_all()?;
        saved.servers.insert(alias.to_string(), params.clone());
        self.write_all(&saved)
    }

    fn remove(&self, alias: &str) -> HostResult<bool> {
        let mut saved = self.read_all()?;
        let existed = saved.servers.remove(alias).is_some();
        if existed {
            self.write_all(&saved)?;
        }
        Ok(existed)
    }
}

fn find_servers_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(SERVERS_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("valet").join(SERVERS_FILE);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}
