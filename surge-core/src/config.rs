use std::time::Duration;

use rand::Rng as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Immutable description of one load-test run. Built (and validated) once;
/// no engine component mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Base URL every step path is appended to.
    pub target: Url,

    /// Requested number of concurrent workers. The resource governor may
    /// grant fewer.
    #[serde(default = "default_concurrency")]
    pub concurrency: u64,

    #[serde(default = "default_duration")]
    pub duration: Duration,

    /// Target request rate in requests/sec. `None` means unlimited.
    #[serde(default)]
    pub rate: Option<f64>,

    /// Per-request timeout, applied to every attempt individually.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    #[serde(default)]
    pub scenario: Scenario,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub stagger: StaggerPolicy,

    /// Fraction of the run duration over which `ramp` staggers worker starts.
    #[serde(default = "default_ramp_fraction")]
    pub ramp_fraction: f64,
}

fn default_concurrency() -> u64 {
    100
}

fn default_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_ramp_fraction() -> f64 {
    0.3
}

impl TestConfig {
    pub fn new(target: Url) -> Self {
        Self {
            target,
            concurrency: default_concurrency(),
            duration: default_duration(),
            rate: None,
            timeout: default_timeout(),
            scenario: Scenario::default(),
            retry: RetryPolicy::default(),
            stagger: StaggerPolicy::default(),
            ramp_fraction: default_ramp_fraction(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.scheme() != "http" && self.target.scheme() != "https" {
            return Err(Error::InvalidTarget(self.target.to_string()));
        }
        if self.target.host_str().is_none() {
            return Err(Error::InvalidTarget(self.target.to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidConcurrency);
        }
        if self.duration.is_zero() {
            return Err(Error::InvalidDuration);
        }
        if let Some(rate) = self.rate
            && !(rate > 0.0 && rate.is_finite())
        {
            return Err(Error::InvalidRate);
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidTimeout);
        }
        if !(self.ramp_fraction > 0.0 && self.ramp_fraction <= 1.0) {
            return Err(Error::InvalidRampFraction);
        }

        self.scenario.validate()?;
        self.retry.validate()
    }

    /// Absolute URL for a step path: the trimmed base plus the path, so a
    /// target of `http://host/api` keeps its prefix for every step.
    pub fn step_url(&self, path: &str) -> String {
        let base = self.target.as_str().trim_end_matches('/');
        format!("{base}{path}")
    }
}

/// Ordered step sequence each worker loops through, with a think-time pause
/// between steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub steps: Vec<Step>,

    #[serde(default)]
    pub think_time: ThinkTime,
}

impl Default for Scenario {
    fn default() -> Self {
        // One unauthenticated GET at the base path.
        Self {
            steps: vec![Step::default()],
            think_time: ThinkTime::default(),
        }
    }
}

impl Scenario {
    fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::EmptyScenario);
        }

        for (index, step) in self.steps.iter().enumerate() {
            if http::Method::from_bytes(step.method.to_ascii_uppercase().as_bytes()).is_err() {
                return Err(Error::InvalidMethod {
                    index,
                    method: step.method.clone(),
                });
            }
            if !step.path.is_empty() && !step.path.starts_with('/') {
                return Err(Error::InvalidPath {
                    index,
                    path: step.path.clone(),
                });
            }
        }

        self.think_time.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(default = "default_method")]
    pub method: String,

    /// Path appended to the target base URL; empty means the base itself.
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub headers: Vec<(String, String)>,

    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Default for Step {
    fn default() -> Self {
        Self {
            method: default_method(),
            path: String::new(),
            headers: Vec::new(),
            body: None,
        }
    }
}

/// Pause between scenario steps, sampled uniformly from [min_ms, max_ms].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThinkTime {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self {
            min_ms: 100,
            max_ms: 500,
        }
    }
}

impl ThinkTime {
    pub fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    fn validate(self) -> Result<()> {
        if self.min_ms > self.max_ms {
            return Err(Error::InvalidThinkTime);
        }
        Ok(())
    }

    pub fn sample(self) -> Duration {
        if self.max_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Transport-level retry budget for one step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,

    /// Backoff slept before attempt 2, 3, …; the last entry repeats if the
    /// attempt cap outruns the schedule.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: vec![
                Duration::from_millis(100),
                Duration::from_millis(500),
                Duration::from_millis(1000),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Vec::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidRetryPolicy);
        }
        Ok(())
    }

    /// Delay slept before the given 1-based attempt. The first attempt is
    /// always immediate.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 || self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let index = ((attempt - 2) as usize).min(self.backoff.len() - 1);
        self.backoff[index]
    }
}

/// When each worker begins issuing requests relative to run start.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StaggerPolicy {
    /// Every worker starts at t=0.
    #[default]
    Steady,

    /// Same as `steady`: maximal concurrency from the first instant.
    Spike,

    /// Worker starts spread linearly across the ramp window.
    Ramp,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn base_config() -> TestConfig {
        TestConfig::new(Url::parse("http://127.0.0.1:8080").unwrap())
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = base_config();
        cfg.validate().unwrap();
        assert_eq!(cfg.scenario.steps.len(), 1);
        assert_eq!(cfg.scenario.steps[0].method, "GET");
        assert_eq!(cfg.scenario.think_time.min_ms, 100);
        assert_eq!(cfg.scenario.think_time.max_ms, 500);
    }

    #[test]
    fn rejects_zero_concurrency_and_duration() {
        let mut cfg = base_config();
        cfg.concurrency = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConcurrency)));

        let mut cfg = base_config();
        cfg.duration = Duration::ZERO;
        assert!(matches!(cfg.validate(), Err(Error::InvalidDuration)));
    }

    #[test]
    fn rejects_empty_scenario() {
        let mut cfg = base_config();
        cfg.scenario.steps.clear();
        assert!(matches!(cfg.validate(), Err(Error::EmptyScenario)));
    }

    #[test]
    fn rejects_bad_step_method_and_path() {
        let mut cfg = base_config();
        cfg.scenario.steps[0].method = "G E T".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(Error::InvalidMethod { index: 0, .. })
        ));

        let mut cfg = base_config();
        cfg.scenario.steps[0].path = "health".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(Error::InvalidPath { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_inverted_think_time() {
        let mut cfg = base_config();
        cfg.scenario.think_time = ThinkTime {
            min_ms: 500,
            max_ms: 100,
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidThinkTime)));
    }

    #[test]
    fn rejects_out_of_range_ramp_fraction() {
        let mut cfg = base_config();
        cfg.ramp_fraction = 0.0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidRampFraction)));

        let mut cfg = base_config();
        cfg.ramp_fraction = 1.5;
        assert!(matches!(cfg.validate(), Err(Error::InvalidRampFraction)));
    }

    #[test]
    fn rejects_non_positive_rate() {
        let mut cfg = base_config();
        cfg.rate = Some(0.0);
        assert!(matches!(cfg.validate(), Err(Error::InvalidRate)));
    }

    #[test]
    fn step_url_keeps_base_path_prefix() {
        let mut cfg = TestConfig::new(Url::parse("http://host:8080/api/").unwrap());
        cfg.scenario.steps[0].path = "/health".to_string();
        assert_eq!(cfg.step_url("/health"), "http://host:8080/api/health");
        assert_eq!(cfg.step_url(""), "http://host:8080/api");
    }

    #[test]
    fn retry_delay_repeats_last_backoff_entry() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_before(1), Duration::ZERO);
        assert_eq!(retry.delay_before(2), Duration::from_millis(100));
        assert_eq!(retry.delay_before(3), Duration::from_millis(500));
        assert_eq!(retry.delay_before(4), Duration::from_millis(1000));
        assert_eq!(retry.delay_before(9), Duration::from_millis(1000));
    }

    #[test]
    fn think_time_sample_stays_in_range() {
        let think = ThinkTime {
            min_ms: 10,
            max_ms: 20,
        };
        for _ in 0..100 {
            let d = think.sample();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert_eq!(ThinkTime::none().sample(), Duration::ZERO);
    }

    #[test]
    fn stagger_policy_parses_from_strings() {
        use std::str::FromStr;
        assert_eq!(StaggerPolicy::from_str("ramp").unwrap(), StaggerPolicy::Ramp);
        assert_eq!(
            StaggerPolicy::from_str("spike").unwrap(),
            StaggerPolicy::Spike
        );
        assert_eq!(StaggerPolicy::default(), StaggerPolicy::Steady);
    }
}
