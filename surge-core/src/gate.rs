use std::pin::pin;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Shared run deadline plus cooperative stop signal.
///
/// Workers call `next` at the top of every step, before admission; the
/// orchestrator (or an external cancel handle) calls `stop`. An in-flight
/// request is never aborted — the gate only prevents new ones from starting.
#[derive(Debug, Default)]
pub struct RunGate {
    deadline: OnceLock<Instant>,
    stopped: AtomicBool,
    notify: Notify,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, started: Instant, duration: Duration) {
        let _ = self.deadline.set(started + duration);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// True while a new request may still be started.
    pub fn next(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        match self.deadline.get() {
            Some(deadline) => Instant::now() < *deadline,
            None => true,
        }
    }

    /// Resolves once the stop signal fires. Deadline expiry is detected at
    /// the per-step `next` checkpoint, not here.
    pub async fn stopped(&self) {
        loop {
            if self.is_stopped() {
                return;
            }

            // Register interest before the re-check so a concurrent `stop`
            // cannot slip between the flag load and the wait.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}
