//! Plan executor: declarative multi-step tool calls
//!
//! A plan is an ordered list of steps. Contiguous steps flagged `parallel`
//! run concurrently as one batch; everything else runs sequentially. Each
//! step is retried independently with exponential backoff, and a failing
//! step becomes an `ok: false` result instead of aborting its siblings.
//! Results always come back in the order the steps were submitted.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostResult;
use crate::registry::DEFAULT_ALIAS;
use crate::types::ToolOutput;

/// Retries per step after the first attempt
pub const MAX_STEP_RETRIES: u32 = 2;

/// First backoff delay; doubles on each retry
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// The call interface the executor schedules against.
///
/// Implemented by the session registry; `alias = None` routes to the
/// default server.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    /// Invoke one tool, resolving `None` to the default alias
    async fn call(&self, alias: Option<&str>, tool: &str, args: Value) -> HostResult<ToolOutput>;
}

/// One tool invocation within a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Target alias; defaults to the built-in server. Accepts the legacy
    /// `server` key on input.
    #[serde(default, alias = "server", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Tool to invoke
    pub tool: String,
    /// Argument object passed through to the tool
    #[serde(default = "empty_args")]
    pub args: Value,
    /// Whether this step may run concurrently with adjacent parallel steps
    #[serde(default)]
    pub parallel: bool,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

impl PlanStep {
    /// Sequential step against the default server
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            alias: None,
            tool: tool.into(),
            args,
            parallel: false,
        }
    }

    /// Route the step to a specific alias
    pub fn on(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Allow the step to run concurrently with its parallel neighbors
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

/// Accepted wire shapes for a submitted plan: a bare step array or an
/// object wrapping it under `steps`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PlanInput {
    /// `[{...}, {...}]`
    Steps(Vec<PlanStep>),
    /// `{"steps": [{...}, {...}]}`
    Wrapped { steps: Vec<PlanStep> },
}

impl PlanInput {
    /// Unwrap to the step list
    pub fn into_steps(self) -> Vec<PlanStep> {
        match self {
            Self::Steps(steps) | Self::Wrapped { steps } => steps,
        }
    }
}

/// Outcome of one step, in submission order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Tool the step invoked
    pub tool: String,
    /// Alias the call was routed to
    pub alias: String,
    /// Whether the step eventually succeeded
    pub ok: bool,
    /// Normalized tool output, when `ok`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Final error message, when not `ok`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Execute a plan against `caller`, returning one result per step in the
/// original order.
pub async fn execute_plan(caller: &dyn ToolCaller, steps: &[PlanStep]) -> Vec<StepResult> {
    let mut results = Vec::with_capacity(steps.len());
    let mut i = 0;

    while i < steps.len() {
        if !steps[i].parallel {
            results.push(run_with_retries(caller, &steps[i]).await);
            i += 1;
            continue;
        }

        // Maximal run of consecutive parallel steps becomes one batch
        let mut j = i;
        while j < steps.len() && steps[j].parallel {
            j += 1;
        }
        let batch = &steps[i..j];
        tracing::debug!("Executing {} plan step(s) concurrently", batch.len());

        let batch_results = join_all(batch.iter().map(|step| run_with_retries(caller, step))).await;
        results.extend(batch_results);
        i = j;
    }

    results
}

/// One step with its own retry budget. Failures are folded into the
/// result; this never returns an error.
async fn run_with_retries(caller: &dyn ToolCaller, step: &PlanStep) -> StepResult {
    let alias = step.alias.as_deref().unwrap_or(DEFAULT_ALIAS).to_string();
    let mut attempt = 0u32;
    let mut delay = INITIAL_BACKOFF;

    loop {
        match caller
            .call(step.alias.as_deref(), &step.tool, step.args.clone())
            .await
        {
            Ok(output) => {
                return StepResult {
                    tool: step.tool.clone(),
                    alias,
                    ok: true,
                    data: Some(output.to_json()),
                    error: None,
                }
            }
            Err(e) => {
                if attempt >= MAX_STEP_RETRIES {
                    return StepResult {
                        tool: step.tool.clone(),
                        alias,
                        ok: false,
                        data: None,
                        error: Some(e.to_string()),
                    };
                }
                tracing::debug!(
                    "Step '{}' attempt {} failed, retrying in {:?}: {}",
                    step.tool,
                    attempt + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}
