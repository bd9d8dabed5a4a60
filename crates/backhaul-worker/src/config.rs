//! Worker configuration

use std::time::Duration;

/// Default pause between dial attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default dial attempt ceiling
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Configuration for the worker session
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Master address (host:port)
    pub master_addr: String,

    /// Identifier sent in the handshake frame
    pub worker_id: String,

    /// Pause between dial attempts; zero means "use the default"
    pub retry_interval: Duration,

    /// Maximum number of dial attempts; zero means "use the default"
    pub retry_max_attempts: u32,
}

impl WorkerConfig {
    pub fn new(master_addr: impl Into<String>) -> Self {
        Self {
            master_addr: master_addr.into(),
            worker_id: String::new(),
            retry_interval: Duration::ZERO,
            retry_max_attempts: 0,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = attempts;
        self
    }

    /// Fill unset fields with defaults. Idempotent; applied once at init.
    pub(crate) fn apply_defaults(&mut self) {
        if self.retry_interval.is_zero() {
            self.retry_interval = DEFAULT_RETRY_INTERVAL;
        }
        if self.retry_max_attempts == 0 {
            self.retry_max_attempts = DEFAULT_RETRY_MAX_ATTEMPTS;
        }
        if self.worker_id.is_empty() {
            self.worker_id = format!("worker-{}", uuid::Uuid::new_v4());
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("localhost:7070")
    }
}
