use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::capacity;
use crate::config::TestConfig;
use crate::error::{Error, Result};
use crate::executor::{PreparedStep, RequestExecutor, prepare_steps};
use crate::gate::RunGate;
use crate::limiter::RateLimiter;
use crate::progress::{LiveMetrics, ProgressFn, ProgressUpdate};
use crate::stats::{RunStats, Summary};
use crate::worker::{WorkerContext, start_delay, worker_loop};
use surge_http::HttpClient;

/// Orchestrator state. `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Configured,
    CapacityChecked,
    Running,
    Draining,
    Complete,
    Failed,
}

#[derive(Debug)]
struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn new(phase: RunPhase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    fn set(&self, phase: RunPhase) {
        self.0.store(phase as u8, Ordering::SeqCst);
    }

    fn get(&self) -> RunPhase {
        match self.0.load(Ordering::SeqCst) {
            0 => RunPhase::Configured,
            1 => RunPhase::CapacityChecked,
            2 => RunPhase::Running,
            3 => RunPhase::Draining,
            4 => RunPhase::Complete,
            _ => RunPhase::Failed,
        }
    }
}

/// Explicit cancellation token; replaces process-signal hooks so shutdown
/// stays portable and testable.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    gate: Arc<RunGate>,
}

impl CancelHandle {
    /// Requests a graceful stop: workers finish their in-flight requests and
    /// the run drains to a normal `Summary`.
    pub fn cancel(&self) {
        self.gate.stop();
    }
}

/// Top-level entry point for one load-test run.
pub struct Runner {
    config: Arc<TestConfig>,
    steps: Arc<Vec<PreparedStep>>,
    gate: Arc<RunGate>,
    phase: Arc<PhaseCell>,
    stats: Arc<RunStats>,
    limiter: Arc<RateLimiter>,
    progress: Option<ProgressFn>,
}

impl Runner {
    /// Validates the configuration up front; an invalid config never reaches
    /// the orchestrator states.
    pub fn new(config: TestConfig) -> Result<Self> {
        config.validate()?;
        let steps = Arc::new(prepare_steps(&config)?);
        let limiter = Arc::new(RateLimiter::new(config.rate));

        Ok(Self {
            config: Arc::new(config),
            steps,
            gate: Arc::new(RunGate::new()),
            phase: Arc::new(PhaseCell::new(RunPhase::Configured)),
            stats: Arc::new(RunStats::default()),
            limiter,
            progress: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            gate: self.gate.clone(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase.get()
    }

    /// Runs to completion: capacity check, staggered spawn, supervision,
    /// drain, snapshot. Always yields a `Summary` for a run that got past
    /// the capacity gate, even at 0% success.
    pub async fn run(&self) -> Result<Summary> {
        let safe = match capacity::capacity(self.config.concurrency).await {
            Ok(safe) => safe,
            Err(err) => {
                self.phase.set(RunPhase::Failed);
                return Err(err);
            }
        };
        self.phase.set(RunPhase::CapacityChecked);

        let workers = self.config.concurrency.min(safe.granted);
        if workers < self.config.concurrency {
            tracing::info!(
                requested = self.config.concurrency,
                granted = workers,
                memory_ceiling = safe.memory_ceiling,
                cpu_ceiling = safe.cpu_ceiling,
                "reduced concurrency to fit host resources"
            );
        }

        let executor = Arc::new(RequestExecutor::new(
            HttpClient::default(),
            self.config.timeout,
            self.config.retry.clone(),
        ));

        let ramp_window = self.config.duration.mul_f64(self.config.ramp_fraction);
        let started = Instant::now();
        self.gate.open(started, self.config.duration);
        self.phase.set(RunPhase::Running);
        tracing::info!(
            target = %self.config.target,
            workers,
            duration = ?self.config.duration,
            rate = ?self.config.rate,
            stagger = %self.config.stagger,
            "run started"
        );

        let mut handles = Vec::with_capacity(workers as usize);
        for index in 0..workers {
            let ctx = WorkerContext {
                worker_id: index + 1,
                start_delay: start_delay(self.config.stagger, index, workers, ramp_window),
                config: self.config.clone(),
                steps: self.steps.clone(),
                executor: executor.clone(),
                limiter: self.limiter.clone(),
                gate: self.gate.clone(),
                stats: self.stats.clone(),
            };
            handles.push(tokio::spawn(worker_loop(ctx)));
        }

        self.supervise(started, workers).await;

        self.gate.stop();
        self.phase.set(RunPhase::Draining);
        tracing::info!("draining workers");

        let mut issued = 0u64;
        let mut all_workers_returned = true;
        for handle in handles {
            match handle.await {
                Ok(state) => {
                    issued += state.requests_issued;
                }
                Err(err) if err.is_panic() => {
                    // One broken worker must not take the run down; its
                    // outcomes were already folded as they happened.
                    all_workers_returned = false;
                    tracing::error!(%err, "worker task panicked; continuing with remaining workers");
                }
                Err(err) => {
                    self.phase.set(RunPhase::Failed);
                    return Err(Error::Join(err));
                }
            }
        }

        let elapsed = started.elapsed();
        let summary = self.stats.snapshot(elapsed);

        if all_workers_returned && issued != summary.total_requests {
            self.phase.set(RunPhase::Failed);
            return Err(Error::AggregationFault(format!(
                "workers issued {issued} requests but {} were recorded",
                summary.total_requests
            )));
        }

        self.phase.set(RunPhase::Complete);
        tracing::info!(
            total = summary.total_requests,
            success_rate = summary.success_rate,
            rps = summary.requests_per_second,
            "run complete"
        );
        Ok(summary)
    }

    /// Waits out the run: once per second sample interval throughput, feed
    /// the limiter's adaptive factor, and emit progress; ends at the
    /// deadline or on external cancellation.
    async fn supervise(&self, started: Instant, workers: u64) {
        let deadline = tokio::time::Instant::from_std(started + self.config.duration);
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tick = 0u64;
        let mut last_at = started;
        let mut last_total = 0u64;
        let mut last_successful = 0u64;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = self.gate.stopped() => break,
                _ = interval.tick() => {
                    tick = tick.saturating_add(1);
                    let now = Instant::now();
                    let dt = now.duration_since(last_at);
                    last_at = now;

                    let total = self.stats.total_requests();
                    let successful = self.stats.successful_requests();
                    let delta_total = total.saturating_sub(last_total);
                    let delta_successful = successful.saturating_sub(last_successful);
                    last_total = total;
                    last_successful = successful;

                    let secs = dt.as_secs_f64().max(1e-9);
                    let rps_now = delta_total as f64 / secs;
                    self.limiter.adjust(rps_now);

                    if let Some(progress) = &self.progress {
                        let delta_failed = delta_total.saturating_sub(delta_successful);
                        let error_rate_now = if delta_total == 0 {
                            0.0
                        } else {
                            delta_failed as f64 / delta_total as f64
                        };
                        let (p50_now, p95_now) = self.stats.take_latency_window_ms();

                        progress(ProgressUpdate {
                            tick,
                            elapsed: started.elapsed(),
                            phase: self.phase.get(),
                            workers,
                            metrics: LiveMetrics {
                                requests_total: total,
                                successful_total: successful,
                                failed_total: total.saturating_sub(successful),
                                rps_now,
                                error_rate_now,
                                latency_p50_ms_now: p50_now,
                                latency_p95_ms_now: p95_now,
                            },
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_round_trip_through_the_cell() {
        let cell = PhaseCell::new(RunPhase::Configured);
        for phase in [
            RunPhase::Configured,
            RunPhase::CapacityChecked,
            RunPhase::Running,
            RunPhase::Draining,
            RunPhase::Complete,
            RunPhase::Failed,
        ] {
            cell.set(phase);
            assert_eq!(cell.get(), phase);
        }
    }

    #[test]
    fn phase_display_is_screaming_snake_case() {
        assert_eq!(RunPhase::CapacityChecked.to_string(), "CAPACITY_CHECKED");
        assert_eq!(RunPhase::Complete.to_string(), "COMPLETE");
    }
}
