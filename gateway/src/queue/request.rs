//! Queued work items.

use crate::queue::payload::RequestPayload;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command a module receives when it is asked to shut down.
pub const QUIT_COMMAND: &str = "quit";

/// A request waiting on a named queue for a module worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Unique request id used to correlate the module's response.
    pub reqid: String,
    /// Request type; the payload command.
    pub reqtype: Option<String>,
    /// What the module should process.
    pub payload: RequestPayload,
}

impl QueuedRequest {
    /// Wraps a payload with a fresh request id.
    #[must_use]
    pub fn new(payload: RequestPayload) -> Self {
        Self {
            reqid: Uuid::new_v4().to_string(),
            reqtype: payload.command.clone(),
            payload,
        }
    }

    /// Returns the request type, or an empty string.
    #[must_use]
    pub fn command(&self) -> &str {
        self.reqtype.as_deref().unwrap_or_default()
    }

    /// Returns `true` if this is a quit command aimed at `module_id`.
    #[must_use]
    pub fn is_quit_for(&self, module_id: &str) -> bool {
        self.command().eq_ignore_ascii_case(QUIT_COMMAND)
            && self
                .payload
                .value("moduleId")
                .is_some_and(|id| id.eq_ignore_ascii_case(module_id))
    }
}
