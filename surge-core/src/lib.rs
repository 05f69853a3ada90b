#![forbid(unsafe_code)]

mod capacity;
mod config;
mod error;
mod executor;
mod gate;
mod limiter;
mod progress;
mod run;
mod stats;
mod thresholds;
mod worker;

pub use capacity::{
    CPU_OVERHEAD_PERCENT, HARD_WORKER_CAP, MEMORY_PER_WORKER_BYTES, SATURATION_PERCENT,
    SafeConcurrency, SystemSnapshot, WORKERS_PER_CPU_PERCENT, capacity, capacity_for,
    sample_system,
};
pub use config::{RetryPolicy, Scenario, StaggerPolicy, Step, TestConfig, ThinkTime};
pub use error::{Error, Result};
pub use executor::{PreparedStep, RequestExecutor, prepare_steps};
pub use gate::RunGate;
pub use limiter::RateLimiter;
pub use progress::{LiveMetrics, ProgressFn, ProgressUpdate};
pub use run::{CancelHandle, RunPhase, Runner};
pub use stats::{LatencySummary, OutcomeClass, OutcomeRecord, RunStats, Summary, percentile};
pub use thresholds::{
    ThresholdExpr, ThresholdMetric, ThresholdOp, ThresholdViolation, evaluate_thresholds,
    parse_threshold_expr,
};
pub use worker::{WorkerState, workers_started_at};

pub use surge_http::{HttpClient, HttpRequest, HttpResponse, TransportErrorKind};
