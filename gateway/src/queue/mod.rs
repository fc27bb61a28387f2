//! Named module queues and the request/response dispatcher.

pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod request;
pub mod service;

pub use dispatcher::CommandDispatcher;
pub use error::{DispatchError, QueueError};
pub use payload::{PayloadValue, RequestFormFile, RequestPayload};
pub use request::{QUIT_COMMAND, QueuedRequest};
pub use service::{PendingResult, QueueService};
