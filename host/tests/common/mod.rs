//! Fake collaborators for driving the registry without real subprocesses

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use valet_host::{
    ConnectionParams, ConnectionStore, HostError, HostResult, ServerRegistry, ToolDescriptor,
    ToolOutput, ToolTransport, TransportLauncher,
};

/// What a fake transport does when a tool is called
#[derive(Debug, Clone)]
pub enum CallBehavior {
    /// Return `Text("<tool> done")`
    Succeed,
    /// Always fail with a connectivity-class error
    FailTransport,
    /// Fail with a remote-reported tool error
    FailToolCall,
}

/// In-memory stand-in for one launched tool server
pub struct FakeTransport {
    alias: String,
    tools: Vec<ToolDescriptor>,
    behavior: Mutex<CallBehavior>,
    list_calls: AtomicUsize,
    call_log: Mutex<Vec<(String, Instant)>>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl FakeTransport {
    pub fn new(alias: &str) -> Arc<Self> {
        let (closed_tx, closed_rx) = watch::channel(false);
        Arc::new(Self {
            alias: alias.to_string(),
            tools: vec![ToolDescriptor {
                name: "echo".to_string(),
                description: Some("Echo a message".to_string()),
                input_schema: None,
            }],
            behavior: Mutex::new(CallBehavior::Succeed),
            list_calls: AtomicUsize::new(0),
            call_log: Mutex::new(Vec::new()),
            closed_tx,
            closed_rx,
        })
    }

    pub fn with_behavior(alias: &str, behavior: CallBehavior) -> Arc<Self> {
        let transport = Self::new(alias);
        transport.set_behavior(behavior);
        transport
    }

    pub fn set_behavior(&self, behavior: CallBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Simulate the subprocess dying
    pub fn kill(&self) {
        let _ = self.closed_tx.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }
}

#[async_trait]
impl ToolTransport for FakeTransport {
    async fn list_tools(&self) -> HostResult<Vec<ToolDescriptor>> {
        if self.is_closed() {
            return Err(HostError::transport(&self.alias, "connection closed"));
        }
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, tool: &str, _args: Value) -> HostResult<ToolOutput> {
        self.call_log
            .lock()
            .unwrap()
            .push((tool.to_string(), Instant::now()));

        if self.is_closed() {
            return Err(HostError::transport(&self.alias, "connection closed"));
        }
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            CallBehavior::Succeed => Ok(ToolOutput::Text(format!("{tool} done"))),
            CallBehavior::FailTransport => {
                Err(HostError::transport(&self.alias, "stream closed"))
            }
            CallBehavior::FailToolCall => {
                Err(HostError::tool_call(&self.alias, tool, "remote failure"))
            }
        }
    }

    async fn shutdown(&self) {
        let _ = self.closed_tx.send(true);
    }

    async fn until_closed(&self) {
        let mut closed = self.closed_rx.clone();
        let _ = closed.wait_for(|c| *c).await;
    }
}

/// Launcher handing out fake transports, with scripting hooks
pub struct FakeLauncher {
    /// Aliases in launch order
    launches: Mutex<Vec<String>>,
    /// Transports handed out, in launch order
    spawned: Mutex<Vec<Arc<FakeTransport>>>,
    /// Pre-scripted transports per alias, consumed before auto-creation
    scripted: Mutex<HashMap<String, VecDeque<Arc<FakeTransport>>>>,
    /// Aliases whose launch fails
    fail_aliases: Mutex<Vec<String>>,
    /// Artificial spawn+handshake time
    launch_delay: Duration,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            launches: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            fail_aliases: Mutex::new(Vec::new()),
            launch_delay: Duration::from_millis(50),
        })
    }

    /// Queue a specific transport for the alias's next launch
    pub fn script(&self, alias: &str, transport: Arc<FakeTransport>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(alias.to_string())
            .or_default()
            .push_back(transport);
    }

    /// Make launches for the alias fail
    pub fn refuse(&self, alias: &str) {
        self.fail_aliases.lock().unwrap().push(alias.to_string());
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn launches_for(&self, alias: &str) -> usize {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.as_str() == alias)
            .count()
    }

    /// Transport handed out by launch number (0-based)
    pub fn spawned(&self, index: usize) -> Arc<FakeTransport> {
        self.spawned.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl TransportLauncher for FakeLauncher {
    async fn launch(
        &self,
        alias: &str,
        _params: &ConnectionParams,
    ) -> HostResult<Arc<dyn ToolTransport>> {
        self.launches.lock().unwrap().push(alias.to_string());

        // Handshake takes a moment; concurrent callers must still observe
        // a single spawn
        tokio::time::sleep(self.launch_delay).await;

        if self.fail_aliases.lock().unwrap().iter().any(|a| a == alias) {
            return Err(HostError::launch(alias, "spawn refused"));
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(alias)
            .and_then(|queue| queue.pop_front());
        let transport = scripted.unwrap_or_else(|| FakeTransport::new(alias));

        self.spawned.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

/// In-memory [`ConnectionStore`]
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, ConnectionParams>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, alias: &str, params: ConnectionParams) {
        self.entries
            .lock()
            .unwrap()
            .insert(alias.to_string(), params);
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.lock().unwrap().contains_key(alias)
    }
}

impl ConnectionStore for MemoryStore {
    fn load(&self) -> HostResult<HashMap<String, ConnectionParams>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    fn save(&self, alias: &str, params: &ConnectionParams) -> HostResult<()> {
        self.insert(alias, params.clone());
        Ok(())
    }

    fn remove(&self, alias: &str) -> HostResult<bool> {
        Ok(self.entries.lock().unwrap().remove(alias).is_some())
    }
}

/// Registry wired to the given fakes with built-in default params
pub fn make_registry(launcher: Arc<FakeLauncher>, store: Arc<MemoryStore>) -> ServerRegistry {
    ServerRegistry::new(launcher, store, ConnectionParams::new("core-server", vec![]))
}

/// Params used when connecting extra servers in tests
pub fn extra_params() -> ConnectionParams {
    ConnectionParams::new("prog", vec!["--flag".to_string()])
}
