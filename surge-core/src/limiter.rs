use std::sync::Mutex;
use std::time::{Duration, Instant};

const ADJUST_GAIN: f64 = 0.1;
const ADJUST_MIN: f64 = 0.5;
const ADJUST_MAX: f64 = 2.0;

/// Token-bucket admission control shared by every worker of a run.
///
/// Tokens refill continuously at `target_rate * performance_factor` and cap
/// at one second's worth. `adjust` nudges the factor toward what the target
/// service actually sustains, smoothed to avoid oscillation.
#[derive(Debug)]
pub struct RateLimiter {
    inner: Option<Inner>,
}

#[derive(Debug)]
struct Inner {
    target_rate: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    performance_factor: f64,
}

impl Bucket {
    fn refill(&mut self, cap: f64, rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = cap.min(self.tokens + elapsed * rate);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// `None` disables admission control: every `acquire` returns immediately.
    pub fn new(target_rate: Option<f64>) -> Self {
        let inner = target_rate.map(|target_rate| Inner {
            target_rate,
            // Start empty so a run cannot open with a full burst of tokens.
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
                performance_factor: 1.0,
            }),
        });
        Self { inner }
    }

    pub fn is_unlimited(&self) -> bool {
        self.inner.is_none()
    }

    pub async fn acquire(&self) {
        self.acquire_weight(1.0).await;
    }

    /// Suspends until `weight` tokens are available, then debits them.
    ///
    /// Refill-decide-debit happens under a single lock acquisition so two
    /// acquirers can never both observe and spend the same balance; waiters
    /// sleep their computed deficit outside the lock and re-enter.
    pub async fn acquire_weight(&self, weight: f64) {
        let Some(inner) = &self.inner else { return };

        loop {
            let wait = {
                let mut bucket = inner
                    .bucket
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());

                let rate = (inner.target_rate * bucket.performance_factor).max(1e-9);
                bucket.refill(inner.target_rate, rate);

                if bucket.tokens >= weight {
                    bucket.tokens -= weight;
                    return;
                }

                Duration::from_secs_f64((weight - bucket.tokens) / rate)
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Feeds back the observed throughput:
    /// `factor = 0.9*factor + 0.1*clamp(target/observed, 0.5, 2.0)`.
    pub fn adjust(&self, observed_rate: f64) {
        let Some(inner) = &self.inner else { return };
        if !observed_rate.is_finite() || observed_rate <= 0.0 {
            return;
        }

        let mut bucket = inner
            .bucket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let correction = (inner.target_rate / observed_rate).clamp(ADJUST_MIN, ADJUST_MAX);
        bucket.performance_factor =
            (1.0 - ADJUST_GAIN) * bucket.performance_factor + ADJUST_GAIN * correction;
    }

    pub fn performance_factor(&self) -> Option<f64> {
        self.inner.as_ref().map(|inner| {
            inner
                .bucket
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .performance_factor
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn unlimited_acquire_returns_immediately() {
        let limiter = RateLimiter::new(None);
        assert!(limiter.is_unlimited());

        let started = Instant::now();
        for _ in 0..10_000 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn admissions_track_the_target_rate() {
        let limiter = Arc::new(RateLimiter::new(Some(100.0)));
        let admitted = Arc::new(AtomicU64::new(0));
        let window = Duration::from_secs(2);

        let mut tasks = Vec::new();
        let deadline = Instant::now() + window;
        for _ in 0..4 {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            tasks.push(tokio::spawn(async move {
                while Instant::now() < deadline {
                    limiter.acquire().await;
                    admitted.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // 100 req/s over 2s => ~200 admissions, within a generous tolerance
        // for scheduler jitter.
        let total = admitted.load(Ordering::Relaxed);
        assert!(
            (150..=230).contains(&total),
            "expected ~200 admissions, got {total}"
        );
    }

    #[tokio::test]
    async fn concurrent_acquirers_never_overdraw() {
        let limiter = Arc::new(RateLimiter::new(Some(50.0)));
        let admitted = Arc::new(AtomicU64::new(0));
        let deadline = Instant::now() + Duration::from_secs(1);

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            tasks.push(tokio::spawn(async move {
                while Instant::now() < deadline {
                    limiter.acquire().await;
                    admitted.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // 50 tokens/s over 1s; more than ~60 means a balance was double-spent.
        assert!(admitted.load(Ordering::Relaxed) <= 60);
    }

    #[tokio::test]
    async fn adjust_raises_the_factor_when_throughput_lags() {
        let limiter = RateLimiter::new(Some(100.0));
        for _ in 0..50 {
            limiter.adjust(50.0);
        }
        let factor = limiter.performance_factor().unwrap();
        assert!(factor > 1.5 && factor <= ADJUST_MAX, "factor={factor}");
    }

    #[tokio::test]
    async fn adjust_is_clamped_and_ignores_nonsense() {
        let limiter = RateLimiter::new(Some(100.0));
        limiter.adjust(0.0);
        limiter.adjust(f64::NAN);
        assert_eq!(limiter.performance_factor(), Some(1.0));

        for _ in 0..200 {
            limiter.adjust(1.0);
        }
        let factor = limiter.performance_factor().unwrap();
        assert!(factor <= ADJUST_MAX + f64::EPSILON);
    }
}
