pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid target url: {0}")]
    InvalidTarget(String),

    #[error("scenario must contain at least one step")]
    EmptyScenario,

    #[error("step {index}: invalid http method `{method}`")]
    InvalidMethod { index: usize, method: String },

    #[error("step {index}: path must be empty or start with `/`, got `{path}`")]
    InvalidPath { index: usize, path: String },

    #[error("`concurrency` must be a positive integer")]
    InvalidConcurrency,

    #[error("`duration` must be positive")]
    InvalidDuration,

    #[error("`rate` must be a positive, finite number")]
    InvalidRate,

    #[error("`timeout` must be positive")]
    InvalidTimeout,

    #[error("think time range must satisfy min <= max")]
    InvalidThinkTime,

    #[error("retry policy must allow at least one attempt")]
    InvalidRetryPolicy,

    #[error("`ramp_fraction` must be within (0, 1]")]
    InvalidRampFraction,

    #[error("insufficient system resources: cpu {cpu:.1}% used, memory {memory:.1}% used")]
    InsufficientResources { cpu: f32, memory: f32 },

    #[error("metrics invariant violated: {0}")]
    AggregationFault(String),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
