use std::time::Duration;
use typed_builder::TypedBuilder;

/// How many times an id is polled before giving up.
pub const RETRY_COUNTS: u32 = 5;

pub const DEFAULT_TOPIC: &str = "generator_events";

/// Bounded polling of the shared id stream.
#[derive(Debug, Clone, TypedBuilder)]
pub struct IdRetryPolicy {
    #[builder(default = RETRY_COUNTS)]
    pub attempts: u32,
    /// Pause after an empty poll.
    #[builder(default = Duration::from_millis(10))]
    pub backoff: Duration,
}

impl Default for IdRetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PipelineConfig {
    /// Topic stamped on every outbox message.
    #[builder(default = DEFAULT_TOPIC.to_string(), setter(into))]
    pub topic: String,
    #[builder(default)]
    pub id_retry: IdRetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct BatchConfig {
    /// Upper bound on items generated concurrently.
    #[builder(default = 8)]
    pub max_workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
