//! Plan executor scheduling, retry, and ordering behavior

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use valet_host::{execute_plan, HostError, HostResult, PlanStep, ToolCaller, ToolOutput};

/// Execution window of one recorded call
#[derive(Debug, Clone)]
struct CallWindow {
    tool: String,
    alias: Option<String>,
    started: Instant,
    finished: Instant,
}

impl CallWindow {
    fn overlaps(&self, other: &CallWindow) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// Scripted [`ToolCaller`] recording execution windows
#[derive(Default)]
struct FakeCaller {
    /// Simulated execution time per tool
    delays: HashMap<String, Duration>,
    /// Failures left per tool; `u32::MAX` fails forever
    failures: Mutex<HashMap<String, u32>>,
    windows: Mutex<Vec<CallWindow>>,
}

impl FakeCaller {
    fn new() -> Self {
        Self::default()
    }

    fn with_delay(mut self, tool: &str, delay: Duration) -> Self {
        self.delays.insert(tool.to_string(), delay);
        self
    }

    fn with_failures(self, tool: &str, count: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(tool.to_string(), count);
        self
    }

    fn windows(&self) -> Vec<CallWindow> {
        self.windows.lock().unwrap().clone()
    }

    fn windows_for(&self, tool: &str) -> Vec<CallWindow> {
        self.windows()
            .into_iter()
            .filter(|w| w.tool == tool)
            .collect()
    }
}

#[async_trait]
impl ToolCaller for FakeCaller {
    async fn call(&self, alias: Option<&str>, tool: &str, _args: Value) -> HostResult<ToolOutput> {
        let started = Instant::now();
        if let Some(delay) = self.delays.get(tool) {
            tokio::time::sleep(*delay).await;
        }
        self.windows.lock().unwrap().push(CallWindow {
            tool: tool.to_string(),
            alias: alias.map(str::to_string),
            started,
            finished: Instant::now(),
        });

        let mut failures = self.failures.lock().unwrap();
        if let Some(left) = failures.get_mut(tool) {
            if *left > 0 {
                if *left != u32::MAX {
                    *left -= 1;
                }
                return Err(HostError::tool_call(
                    alias.unwrap_or("valet"),
                    tool,
                    "scripted failure",
                ));
            }
        }
        Ok(ToolOutput::Text(format!("{tool} done")))
    }
}

#[tokio::test(start_paused = true)]
async fn test_results_keep_submission_order_with_parallel_batch() {
    // B is slower than C, so completion order differs from submission order
    let caller = FakeCaller::new()
        .with_delay("a", Duration::from_millis(50))
        .with_delay("b", Duration::from_millis(300))
        .with_delay("c", Duration::from_millis(100))
        .with_delay("d", Duration::from_millis(50));

    let steps = vec![
        PlanStep::new("a", json!({})),
        PlanStep::new("b", json!({})).parallel(),
        PlanStep::new("c", json!({})).parallel(),
        PlanStep::new("d", json!({})),
    ];

    let results = execute_plan(&caller, &steps).await;

    let order: Vec<&str> = results.iter().map(|r| r.tool.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c", "d"]);
    assert!(results.iter().all(|r| r.ok));

    // The parallel pair overlapped; the sequential steps did not
    let a = &caller.windows_for("a")[0];
    let b = &caller.windows_for("b")[0];
    let c = &caller.windows_for("c")[0];
    let d = &caller.windows_for("d")[0];
    assert!(b.overlaps(c));
    assert!(!a.overlaps(b));
    assert!(!a.overlaps(c));
    assert!(d.started >= b.finished);
    assert!(d.started >= c.finished);
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_is_half_second_then_one_second() {
    let caller = FakeCaller::new().with_failures("flaky", u32::MAX);
    let steps = vec![PlanStep::new("flaky", json!({}))];

    let results = execute_plan(&caller, &steps).await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].ok);
    assert!(results[0].error.as_deref().unwrap().contains("scripted failure"));
    assert!(results[0].data.is_none());

    // First attempt plus two retries, spaced 0.5s and 1.0s apart
    let attempts = caller.windows_for("flaky");
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts[1].started - attempts[0].started,
        Duration::from_millis(500)
    );
    assert_eq!(
        attempts[2].started - attempts[1].started,
        Duration::from_millis(1000)
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_within_retry_budget() {
    let caller = FakeCaller::new().with_failures("wobbly", 1);
    let steps = vec![PlanStep::new("wobbly", json!({}))];

    let results = execute_plan(&caller, &steps).await;

    assert!(results[0].ok);
    assert_eq!(caller.windows_for("wobbly").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failing_step_never_aborts_its_siblings() {
    let caller = FakeCaller::new().with_failures("bad", u32::MAX);
    let steps = vec![
        PlanStep::new("first", json!({})).parallel(),
        PlanStep::new("bad", json!({})).parallel(),
        PlanStep::new("last", json!({})),
    ];

    let results = execute_plan(&caller, &steps).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].ok);
    assert!(!results[1].ok);
    assert!(results[2].ok);
    // The failing step burned its full retry budget without stalling others
    assert_eq!(caller.windows_for("bad").len(), 3);
    assert_eq!(caller.windows_for("last").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_success_data_is_normalized_json() {
    let caller = FakeCaller::new();
    let steps = vec![PlanStep::new("status", json!({}))];

    let results = execute_plan(&caller, &steps).await;

    assert_eq!(
        results[0].data,
        Some(json!({"type": "text", "text": "status done"}))
    );
    assert!(results[0].error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_step_routing_and_default_alias() {
    let caller = FakeCaller::new();
    let steps = vec![
        PlanStep::new("ping", json!({})),
        PlanStep::new("scan", json!({})).on("obd"),
    ];

    let results = execute_plan(&caller, &steps).await;

    assert_eq!(results[0].alias, "valet");
    assert_eq!(results[1].alias, "obd");
    assert_eq!(caller.windows_for("ping")[0].alias, None);
    assert_eq!(caller.windows_for("scan")[0].alias.as_deref(), Some("obd"));
}

#[tokio::test(start_paused = true)]
async fn test_empty_plan_yields_no_results() {
    let caller = FakeCaller::new();
    let results = execute_plan(&caller, &[]).await;
    assert!(results.is_empty());
}
