use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use surge_http::TransportErrorKind;

use crate::config::{StaggerPolicy, TestConfig};
use crate::executor::{PreparedStep, RequestExecutor};
use crate::gate::RunGate;
use crate::limiter::RateLimiter;
use crate::stats::{OutcomeClass, OutcomeRecord, RunStats};

/// Per-worker running counters. Outcomes are folded into the shared
/// aggregator as they happen; this is the worker's own tally, returned when
/// it exits.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub worker_id: u64,
    pub requests_issued: u64,
    pub requests_succeeded: u64,
    pub total_latency: Duration,
    pub errors: HashMap<TransportErrorKind, u64>,
}

impl WorkerState {
    fn new(worker_id: u64) -> Self {
        Self {
            worker_id,
            requests_issued: 0,
            requests_succeeded: 0,
            total_latency: Duration::ZERO,
            errors: HashMap::new(),
        }
    }

    fn observe(&mut self, outcome: &OutcomeRecord) {
        self.requests_issued += 1;
        self.total_latency += outcome.latency;
        match outcome.class {
            OutcomeClass::Success { .. } => self.requests_succeeded += 1,
            OutcomeClass::ApplicationError { .. } => {}
            OutcomeClass::Transport { kind } => {
                *self.errors.entry(kind).or_insert(0) += 1;
            }
        }
    }
}

#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub worker_id: u64,
    pub start_delay: Duration,
    pub config: Arc<TestConfig>,
    pub steps: Arc<Vec<PreparedStep>>,
    pub executor: Arc<RequestExecutor>,
    pub limiter: Arc<RateLimiter>,
    pub gate: Arc<RunGate>,
    pub stats: Arc<RunStats>,
}

/// Drives one concurrency unit through the step sequence until the gate
/// closes. Every wait (stagger delay, admission, think time) races the stop
/// signal so no new request starts after cancellation.
pub(crate) async fn worker_loop(ctx: WorkerContext) -> WorkerState {
    let mut state = WorkerState::new(ctx.worker_id);

    if !ctx.start_delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(ctx.start_delay) => {}
            _ = ctx.gate.stopped() => return state,
        }
    }
    tracing::debug!(worker_id = ctx.worker_id, "worker started");

    'run: loop {
        for step in ctx.steps.iter() {
            // Checkpoint: nothing starts past the deadline or after
            // cancellation; an in-flight request finishes on its own terms.
            if !ctx.gate.next() {
                break 'run;
            }

            tokio::select! {
                _ = ctx.limiter.acquire() => {}
                _ = ctx.gate.stopped() => break 'run,
            }

            let outcome = ctx.executor.execute(ctx.worker_id, step).await;
            state.observe(&outcome);
            if let Err(fault) = ctx.stats.record(&outcome) {
                tracing::error!(
                    worker_id = ctx.worker_id,
                    %fault,
                    "stopping worker after aggregation fault"
                );
                break 'run;
            }

            let think = ctx.config.scenario.think_time.sample();
            if !think.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(think) => {}
                    _ = ctx.gate.stopped() => break 'run,
                }
            }
        }
    }

    tracing::debug!(
        worker_id = ctx.worker_id,
        requests = state.requests_issued,
        succeeded = state.requests_succeeded,
        "worker finished"
    );
    state
}

/// Start delay for worker `index` (0-based) of `total` under the given
/// policy. `ramp` spreads starts linearly across the window; the first
/// worker always starts immediately.
pub(crate) fn start_delay(
    policy: StaggerPolicy,
    index: u64,
    total: u64,
    ramp_window: Duration,
) -> Duration {
    match policy {
        StaggerPolicy::Steady | StaggerPolicy::Spike => Duration::ZERO,
        StaggerPolicy::Ramp => {
            if total == 0 {
                return Duration::ZERO;
            }
            // Integer nanosecond math keeps delays exact at stage boundaries.
            let nanos = ramp_window.as_nanos().saturating_mul(index as u128) / total as u128;
            Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
        }
    }
}

/// Closed form for how many of `total` workers have started by `elapsed`
/// under the given policy.
pub fn workers_started_at(
    policy: StaggerPolicy,
    total: u64,
    ramp_window: Duration,
    elapsed: Duration,
) -> u64 {
    match policy {
        StaggerPolicy::Steady | StaggerPolicy::Spike => total,
        StaggerPolicy::Ramp => {
            if total == 0 {
                return 0;
            }
            if ramp_window.is_zero() || elapsed >= ramp_window {
                return total;
            }
            let started = elapsed.as_nanos().saturating_mul(total as u128) / ramp_window.as_nanos();
            (started.min(u64::MAX as u128) as u64 + 1).min(total)
        }
    }
}
