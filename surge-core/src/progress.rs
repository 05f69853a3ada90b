use std::sync::Arc;
use std::time::Duration;

use crate::run::RunPhase;

/// Totals and interval figures observed during the last supervision tick.
#[derive(Debug, Clone)]
pub struct LiveMetrics {
    /// Total requests observed so far.
    pub requests_total: u64,

    /// Total successful requests observed so far.
    pub successful_total: u64,

    /// Total failed requests observed so far.
    pub failed_total: u64,

    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,

    /// Failed requests / total requests during the last interval (0..=1).
    pub error_rate_now: f64,

    /// Interval latency percentiles (ms), successful requests only.
    pub latency_p50_ms_now: Option<f64>,
    pub latency_p95_ms_now: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub phase: RunPhase,
    /// Workers spawned for the run (granted concurrency).
    pub workers: u64,
    pub metrics: LiveMetrics,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
