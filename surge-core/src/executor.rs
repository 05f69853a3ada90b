use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;

use crate::config::{RetryPolicy, TestConfig};
use crate::error::{Error, Result};
use crate::stats::{OutcomeClass, OutcomeRecord};
use surge_http::{HttpClient, HttpRequest};

/// A scenario step resolved against the target: parsed method, absolute URL,
/// frozen headers and body.
#[derive(Debug, Clone)]
pub struct PreparedStep {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

pub fn prepare_steps(config: &TestConfig) -> Result<Vec<PreparedStep>> {
    config
        .scenario
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let method = http::Method::from_bytes(step.method.to_ascii_uppercase().as_bytes())
                .map_err(|_| Error::InvalidMethod {
                    index,
                    method: step.method.clone(),
                })?;
            if !step.path.is_empty() && !step.path.starts_with('/') {
                return Err(Error::InvalidPath {
                    index,
                    path: step.path.clone(),
                });
            }

            Ok(PreparedStep {
                method,
                url: config.step_url(&step.path),
                headers: step.headers.clone(),
                body: step
                    .body
                    .as_deref()
                    .map(|body| Bytes::copy_from_slice(body.as_bytes()))
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// Executes single steps to a terminal outcome: bounded timeout, bounded
/// retry with a fixed backoff schedule, classification.
#[derive(Debug)]
pub struct RequestExecutor {
    client: HttpClient,
    timeout: Duration,
    retry: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(client: HttpClient, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            timeout,
            retry,
        }
    }

    /// Any received HTTP response (4xx/5xx and redirects included) is
    /// terminal; only timeouts and connection-level failures are retried, up
    /// to the attempt cap. Latency spans the whole execution, first attempt
    /// start to final outcome.
    pub async fn execute(&self, worker_id: u64, step: &PreparedStep) -> OutcomeRecord {
        let started = Instant::now();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let backoff = self.retry.delay_before(attempt);
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }

            let req = HttpRequest {
                method: step.method.clone(),
                url: step.url.clone(),
                headers: step.headers.clone(),
                body: step.body.clone(),
                timeout: Some(self.timeout),
            };

            let class = match self.client.request(req).await {
                Ok(res) => {
                    if res.status < 400 {
                        OutcomeClass::Success { status: res.status }
                    } else {
                        OutcomeClass::ApplicationError { status: res.status }
                    }
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    tracing::debug!(
                        worker_id,
                        attempt,
                        url = %step.url,
                        error = %err,
                        "retrying after transport failure"
                    );
                    continue;
                }
                Err(err) => OutcomeClass::Transport { kind: err.kind() },
            };

            return OutcomeRecord {
                worker_id,
                at: SystemTime::now(),
                latency: started.elapsed(),
                attempts: attempt,
                class,
            };
        }
    }
}
