//! Queue and dispatcher timeouts.

use serde::Deserialize;
use std::time::Duration;

/// Timeouts applied to module queues.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// How long a client waits for a module's response.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// How long a worker's long-poll waits for a request.
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    /// How long an empty queue nobody polls is kept before it is dropped.
    /// Queues of configured modules are always kept.
    #[serde(default = "default_idle_queue_timeout_ms")]
    pub idle_queue_timeout_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            idle_queue_timeout_ms: default_idle_queue_timeout_ms(),
        }
    }
}

impl QueueSettings {
    /// Response timeout as a [`Duration`].
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Dequeue timeout as a [`Duration`].
    #[must_use]
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    /// Idle queue timeout as a [`Duration`].
    #[must_use]
    pub fn idle_queue_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_queue_timeout_ms)
    }
}

fn default_response_timeout_ms() -> u64 {
    60_000
}

fn default_dequeue_timeout_ms() -> u64 {
    10_000
}

fn default_idle_queue_timeout_ms() -> u64 {
    300_000
}
