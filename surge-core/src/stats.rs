use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use surge_http::TransportErrorKind;

use crate::error::{Error, Result};

/// Terminal classification of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    /// A received response with status < 400 (redirects included).
    Success { status: u16 },

    /// A received 4xx/5xx: a complete HTTP exchange whose application-level
    /// outcome is failure. Never retried.
    ApplicationError { status: u16 },

    /// No usable response: timeout, connection failure, or similar.
    Transport { kind: TransportErrorKind },
}

impl OutcomeClass {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success { status } | Self::ApplicationError { status } => Some(*status),
            Self::Transport { .. } => None,
        }
    }
}

/// One executed step, produced by the executor and merged into `RunStats`
/// exactly once.
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    pub worker_id: u64,
    pub at: SystemTime,
    pub latency: Duration,
    /// Attempts actually consumed, the successful/terminal one included.
    pub attempts: u32,
    pub class: OutcomeClass,
}

/// Concurrency-safe sink for outcome records.
///
/// Counters are atomics, histograms live in sharded maps, and the raw
/// latency sample sits behind a mutex held only for the push — no critical
/// section spans a suspending operation.
#[derive(Debug)]
pub struct RunStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    status_codes: DashMap<u16, u64>,
    transport_errors: DashMap<TransportErrorKind, u64>,

    /// Raw latency sample (milliseconds) of successful requests, retained
    /// for the run's lifetime so the summary percentiles are exact order
    /// statistics. Very long or very high-rate runs would want a streaming
    /// estimator here instead.
    latencies_ms: Mutex<Vec<f64>>,

    /// Interval window feeding live progress percentiles only; the summary
    /// never reads it.
    latency_window_us: Mutex<Histogram<u64>>,
}

impl Default for RunStats {
    fn default() -> Self {
        // Track up to 60s in microseconds (with 3 sigfigs).
        let window = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)
            .unwrap_or_else(|err| panic!("failed to init histogram: {err}"));

        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            status_codes: DashMap::new(),
            transport_errors: DashMap::new(),
            latencies_ms: Mutex::new(Vec::new()),
            latency_window_us: Mutex::new(window),
        }
    }
}

impl RunStats {
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    /// Merges one outcome into the running totals. An invariant violation is
    /// a programming error in the producer, reported as `AggregationFault`.
    pub fn record(&self, outcome: &OutcomeRecord) -> Result<()> {
        if outcome.attempts == 0 {
            return Err(Error::AggregationFault(format!(
                "worker {} reported an outcome with zero attempts",
                outcome.worker_id
            )));
        }

        let latency_ms = outcome.latency.as_secs_f64() * 1000.0;
        if !latency_ms.is_finite() {
            return Err(Error::AggregationFault(format!(
                "worker {} reported a non-finite latency",
                outcome.worker_id
            )));
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match outcome.class {
            OutcomeClass::Success { status } => {
                self.successful_requests.fetch_add(1, Ordering::Relaxed);
                *self.status_codes.entry(status).or_insert(0) += 1;

                self.latencies_ms.lock().push(latency_ms);

                let us = (outcome.latency.as_micros().min(60_000_000) as u64).max(1);
                let _ = self.latency_window_us.lock().record(us);
            }
            OutcomeClass::ApplicationError { status } => {
                *self.status_codes.entry(status).or_insert(0) += 1;
            }
            OutcomeClass::Transport { kind } => {
                *self.transport_errors.entry(kind).or_insert(0) += 1;
            }
        }

        Ok(())
    }

    /// Live p50/p95 (ms) over the current interval window, which is reset on
    /// every call.
    pub fn take_latency_window_ms(&self) -> (Option<f64>, Option<f64>) {
        let mut window = self.latency_window_us.lock();

        #[allow(clippy::len_zero)]
        let out = if window.len() == 0 {
            (None, None)
        } else {
            let p50 = window.value_at_quantile(0.50) as f64 / 1000.0;
            let p95 = window.value_at_quantile(0.95) as f64 / 1000.0;
            (Some(p50), Some(p95))
        };

        window.reset();
        out
    }

    /// Point-in-time summary; callable mid-run for live totals and once,
    /// finally, at drain completion.
    pub fn snapshot(&self, elapsed: Duration) -> Summary {
        let total_requests = self.total_requests();
        let successful_requests = self.successful_requests();
        let secs = elapsed.as_secs_f64().max(1e-9);

        let (avg, p50, p95, p99) = {
            let mut sorted = self.latencies_ms.lock().clone();
            sorted.sort_by(f64::total_cmp);

            if sorted.is_empty() {
                (0.0, 0.0, 0.0, 0.0)
            } else {
                let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;
                (
                    avg,
                    percentile(&sorted, 0.50),
                    percentile(&sorted, 0.95),
                    percentile(&sorted, 0.99),
                )
            }
        };

        let status_codes: BTreeMap<u16, u64> = self
            .status_codes
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        let errors: BTreeMap<String, u64> = self
            .transport_errors
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();

        Summary {
            duration_seconds: elapsed.as_secs_f64(),
            total_requests,
            successful_requests,
            success_rate: if total_requests == 0 {
                0.0
            } else {
                successful_requests as f64 / total_requests as f64 * 100.0
            },
            requests_per_second: total_requests as f64 / secs,
            latency_ms: LatencySummary { avg, p50, p95, p99 },
            status_codes,
            errors,
        }
    }
}

/// Fixed percentile convention over an ascending sample: `floor(p * count)`
/// clamped to `count - 1`; a sample too small to resolve `p` yields the
/// maximum observed value.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let count = sorted.len();
    if count == 0 {
        return 0.0;
    }
    if (count as f64) < (1.0 / p).ceil() {
        return sorted[count - 1];
    }
    let index = ((p * count as f64).floor() as usize).min(count - 1);
    sorted[index]
}

/// Final run statistics in the stable external shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub duration_seconds: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    /// Percent of requests that completed with a status below 400.
    pub success_rate: f64,
    pub requests_per_second: f64,
    pub latency_ms: LatencySummary,
    pub status_codes: BTreeMap<u16, u64>,
    pub errors: BTreeMap<String, u64>,
}

/// Latency percentiles (ms) over successful requests only.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatencySummary {
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}
