//! Sends a payload to a module queue and waits for the answer.

use crate::queue::error::DispatchError;
use crate::queue::payload::RequestPayload;
use crate::queue::request::QueuedRequest;
use crate::queue::service::QueueService;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Request/response front end over [`QueueService`].
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    queues: Arc<QueueService>,
    timeout: Duration,
}

impl CommandDispatcher {
    /// Creates a dispatcher that gives modules `timeout` to answer.
    #[must_use]
    pub fn new(queues: Arc<QueueService>, timeout: Duration) -> Self {
        Self { queues, timeout }
    }

    /// The underlying queue service.
    #[must_use]
    pub fn queues(&self) -> &Arc<QueueService> {
        &self.queues
    }

    /// Response timeout applied to every request.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queues `payload` on `queue_name` and returns the raw module response.
    ///
    /// # Errors
    ///
    /// Fails on timeout, caller cancellation, a duplicate request id or an
    /// empty response body.
    pub async fn send_request(
        &self,
        queue_name: &str,
        payload: RequestPayload,
        cancel: &CancellationToken,
    ) -> Result<String, DispatchError> {
        self.dispatch(queue_name, payload, cancel)
            .await
            .map(|(_, body)| body)
    }

    /// Like [`send_request`](Self::send_request) but parses the body as a JSON object.
    ///
    /// # Errors
    ///
    /// Everything `send_request` can return, plus [`DispatchError::InvalidJson`].
    pub async fn send_request_json(
        &self,
        queue_name: &str,
        payload: RequestPayload,
        cancel: &CancellationToken,
    ) -> Result<Map<String, Value>, DispatchError> {
        let (reqid, body) = self.dispatch(queue_name, payload, cancel).await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(DispatchError::InvalidJson(reqid)),
        }
    }

    async fn dispatch(
        &self,
        queue_name: &str,
        payload: RequestPayload,
        cancel: &CancellationToken,
    ) -> Result<(String, String), DispatchError> {
        let request = QueuedRequest::new(payload);
        let reqid = request.reqid.clone();

        // The slot must exist before a worker can see the request.
        let mut pending = self.queues.register(&reqid).map_err(|_| {
            DispatchError::DuplicateRequest {
                reqid: reqid.clone(),
                queue: queue_name.to_owned(),
            }
        })?;
        self.queues.enqueue(queue_name, request);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DispatchError::Cancelled(reqid.clone())),
            waited = tokio::time::timeout(self.timeout, pending.wait()) => match waited {
                Err(_) => Err(DispatchError::Timeout(reqid.clone())),
                Ok(None) => Err(DispatchError::EmptyResponse(reqid.clone())),
                Ok(Some(body)) if body.trim().is_empty() => {
                    Err(DispatchError::EmptyResponse(reqid.clone()))
                }
                Ok(Some(body)) => Ok(body),
            },
        };

        if let Err(err) = &outcome {
            if err.is_timeout() {
                metrics::counter!("meshgate_dispatch_timeouts_total").increment(1);
            }
            warn!(queue = %queue_name, reqid = %reqid, error = %err, "Request produced no response");
        }
        outcome.map(|body| (reqid, body))
    }
}
