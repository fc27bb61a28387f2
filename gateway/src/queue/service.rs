//! Named request queues and response correlation.
//!
//! Each module type pulls work from its own named queue. Callers register a
//! one-shot slot for the request id before the request becomes visible to a
//! worker, so a response posted immediately after dequeue is never lost. The
//! slot removes itself from the table when the waiter drops it, which also
//! lets dequeue skip work nobody is waiting for anymore.
//!
//! Queues named only by worker polls are dropped again once they sit empty
//! and unwatched for a while. Queues of configured modules stay.

use crate::queue::error::QueueError;
use crate::queue::request::QueuedRequest;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Commands too chatty to trace on every call.
const QUIET_COMMANDS: &[&str] = &[
    "list-custom",
    "get_module_status",
    "status",
    "get_status",
    "get_command_status",
];

type PendingTable = DashMap<String, oneshot::Sender<Option<String>>>;

fn is_quiet(command: &str) -> bool {
    QUIET_COMMANDS
        .iter()
        .any(|quiet| quiet.eq_ignore_ascii_case(command))
}

/// A caller's claim on the response to one request.
///
/// Dropping the handle removes the correlation slot.
#[derive(Debug)]
pub struct PendingResult {
    reqid: String,
    receiver: oneshot::Receiver<Option<String>>,
    table: Arc<PendingTable>,
}

impl PendingResult {
    /// Request id this slot answers for.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.reqid
    }

    /// Waits for the module response.
    ///
    /// Returns `None` if the response body was empty or the slot was torn down.
    pub async fn wait(&mut self) -> Option<String> {
        (&mut self.receiver).await.ok().flatten()
    }
}

impl Drop for PendingResult {
    fn drop(&mut self) {
        self.table.remove(&self.reqid);
    }
}

/// One named FIFO. The receiver mutex is fair, so concurrent workers are
/// served in the order they started waiting.
#[derive(Debug)]
struct NamedQueue {
    sender: mpsc::UnboundedSender<QueuedRequest>,
    receiver: Mutex<mpsc::UnboundedReceiver<QueuedRequest>>,
    queued: AtomicUsize,
    waiters: AtomicUsize,
    pinned: AtomicBool,
    last_used: parking_lot::Mutex<Instant>,
}

impl NamedQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            queued: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
            pinned: AtomicBool::new(false),
            last_used: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn is_idle(&self, idle: Duration, now: Instant) -> bool {
        !self.pinned.load(Ordering::Acquire)
            && self.waiters.load(Ordering::Acquire) == 0
            && self.queued.load(Ordering::Acquire) == 0
            && now.saturating_duration_since(*self.last_used.lock()) >= idle
    }
}

/// A worker waiting on a queue; keeps the queue from being pruned.
struct Waiting(Arc<NamedQueue>);

impl Drop for Waiting {
    fn drop(&mut self) {
        self.0.touch();
        self.0.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

/// In-memory named queues plus the request/response correlation table.
#[derive(Debug, Default)]
pub struct QueueService {
    queues: DashMap<String, Arc<NamedQueue>>,
    pending: Arc<PendingTable>,
}

impl QueueService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on the named queue, creating it if needed. The map entry
    /// stays locked meanwhile, so pruning cannot race with `f`.
    fn with_queue<R>(&self, queue_name: &str, f: impl FnOnce(&Arc<NamedQueue>) -> R) -> R {
        let queue = self
            .queues
            .entry(queue_name.to_lowercase())
            .or_insert_with(|| Arc::new(NamedQueue::new()));
        queue.touch();
        f(&queue)
    }

    /// Creates the queue if it does not exist yet and keeps it for good.
    pub fn ensure_queue_exists(&self, queue_name: &str) {
        self.with_queue(queue_name, |queue| queue.pinned.store(true, Ordering::Release));
    }

    /// Drops queues that hold no requests, have no waiting worker, were never
    /// pinned and have not been used for `idle`. Returns how many went.
    pub fn prune_idle(&self, idle: Duration) -> usize {
        self.prune_idle_at(idle, Instant::now())
    }

    /// [`prune_idle`](Self::prune_idle) as of `now`.
    pub fn prune_idle_at(&self, idle: Duration, now: Instant) -> usize {
        let before = self.queues.len();
        self.queues.retain(|name, queue| {
            let keep = !queue.is_idle(idle, now);
            if !keep {
                debug!(queue = %name, "Dropping idle queue");
            }
            keep
        });
        before.saturating_sub(self.queues.len())
    }

    /// Prunes idle queues every `idle` until `token` is cancelled.
    pub async fn run_idle_sweep(self: Arc<Self>, idle: Duration, token: CancellationToken) {
        let mut interval = tokio::time::interval(idle.max(Duration::from_secs(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    let pruned = self.prune_idle(idle);
                    if pruned > 0 {
                        debug!(pruned, "Idle queues pruned");
                    }
                }
            }
        }
    }

    /// Names of all queues created so far.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Registers a correlation slot for `reqid`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DuplicateRequestId`] if a slot for this id is already live.
    pub fn register(&self, reqid: &str) -> Result<PendingResult, QueueError> {
        match self.pending.entry(reqid.to_owned()) {
            Entry::Occupied(_) => Err(QueueError::DuplicateRequestId(reqid.to_owned())),
            Entry::Vacant(slot) => {
                let (sender, receiver) = oneshot::channel();
                slot.insert(sender);
                Ok(PendingResult {
                    reqid: reqid.to_owned(),
                    receiver,
                    table: Arc::clone(&self.pending),
                })
            }
        }
    }

    /// Appends a request to the named queue, creating the queue if needed.
    pub fn enqueue(&self, queue_name: &str, request: QueuedRequest) {
        let reqid = request.reqid.clone();
        let quiet = is_quiet(request.command());
        let command = request.command().to_owned();

        let sent = self.with_queue(queue_name, |queue| {
            queue.queued.fetch_add(1, Ordering::AcqRel);
            let sent = queue.sender.send(request).is_ok();
            if !sent {
                queue.queued.fetch_sub(1, Ordering::AcqRel);
            }
            sent
        });
        if !sent {
            warn!(queue = %queue_name, reqid = %reqid, "Queue receiver closed, request dropped");
            return;
        }

        metrics::counter!("meshgate_queue_enqueued_total", "queue" => queue_name.to_lowercase())
            .increment(1);
        if !quiet {
            trace!(queue = %queue_name, reqid = %reqid, command = %command, "Request queued");
        }
    }

    /// Waits for the next live request on the named queue.
    ///
    /// Requests whose caller has stopped waiting are discarded. Returns `None`
    /// when `cancel` fires first.
    pub async fn dequeue(
        &self,
        queue_name: &str,
        cancel: &CancellationToken,
    ) -> Option<QueuedRequest> {
        let waiting = self.with_queue(queue_name, |queue| {
            queue.waiters.fetch_add(1, Ordering::AcqRel);
            Waiting(Arc::clone(queue))
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            request = self.next_live_request(&waiting.0) => {
                if let Some(request) = &request {
                    metrics::counter!(
                        "meshgate_queue_dequeued_total",
                        "queue" => queue_name.to_lowercase()
                    )
                    .increment(1);
                    if !is_quiet(request.command()) {
                        trace!(
                            queue = %queue_name,
                            reqid = %request.reqid,
                            command = %request.command(),
                            "Request dequeued"
                        );
                    }
                }
                request
            }
        }
    }

    async fn next_live_request(&self, queue: &NamedQueue) -> Option<QueuedRequest> {
        let mut receiver = queue.receiver.lock().await;
        while let Some(request) = receiver.recv().await {
            queue.queued.fetch_sub(1, Ordering::AcqRel);
            if self.is_pending(&request.reqid) {
                return Some(request);
            }
            debug!(reqid = %request.reqid, "Skipping request nobody is waiting for");
        }
        None
    }

    /// Returns `true` while someone is still waiting on `reqid`.
    #[must_use]
    pub fn is_pending(&self, reqid: &str) -> bool {
        self.pending
            .get(reqid)
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Delivers a module response to whoever waits on `reqid`.
    ///
    /// Returns `false` for unknown, expired or already answered requests.
    pub fn set_result(&self, reqid: &str, body: Option<String>) -> bool {
        let Some((_, sender)) = self.pending.remove(reqid) else {
            debug!(reqid = %reqid, "No caller waiting for response");
            return false;
        };

        log_response(reqid, body.as_deref());

        if sender.send(body).is_err() {
            debug!(reqid = %reqid, "Caller stopped waiting before the response arrived");
            return false;
        }
        true
    }
}

fn log_response(reqid: &str, body: Option<&str>) {
    let response = body
        .and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok())
        .unwrap_or_default();
    let command = response["command"].as_str().unwrap_or_default();
    if is_quiet(command) {
        return;
    }

    let module = response["moduleName"]
        .as_str()
        .or_else(|| response["moduleId"].as_str())
        .unwrap_or("(unknown module)");
    info!(
        reqid = %reqid,
        module = %module,
        command = %command,
        message = response["message"].as_str().unwrap_or_default(),
        process_ms = response["processMs"].as_u64(),
        "Response received"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::payload::RequestPayload;
    use std::time::Duration;

    fn request(command: &str) -> QueuedRequest {
        QueuedRequest::new(RequestPayload::new(command))
    }

    #[tokio::test]
    async fn dequeue_preserves_fifo_order() {
        let service = QueueService::new();
        let mut slots = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let req = request("detect");
            slots.push(service.register(&req.reqid).unwrap());
            ids.push(req.reqid.clone());
            service.enqueue("Vision_Queue", req);
        }

        let cancel = CancellationToken::new();
        for id in ids {
            let got = service.dequeue("vision_queue", &cancel).await.unwrap();
            assert_eq!(got.reqid, id);
        }
    }

    #[tokio::test]
    async fn dequeue_returns_none_when_cancelled() {
        let service = QueueService::new();
        let cancel = CancellationToken::new();
        let waiter = {
            let cancel = cancel.clone();
            async move { service.dequeue("empty_queue", &cancel).await }
        };
        let handle = tokio::spawn(waiter);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert!(handle.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_skips_abandoned_requests() {
        let service = QueueService::new();
        let abandoned = request("detect");
        let live = request("detect");

        let slot = service.register(&abandoned.reqid).unwrap();
        service.enqueue("q", abandoned);
        drop(slot);

        let _live_slot = service.register(&live.reqid).unwrap();
        let live_id = live.reqid.clone();
        service.enqueue("q", live);

        let got = service
            .dequeue("q", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(got.reqid, live_id);
    }

    #[tokio::test]
    async fn set_result_succeeds_once() {
        let service = QueueService::new();
        let mut slot = service.register("r1").unwrap();

        assert!(service.set_result("r1", Some("{\"success\":true}".into())));
        assert!(!service.set_result("r1", Some("{}".into())));
        assert_eq!(slot.wait().await.as_deref(), Some("{\"success\":true}"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let service = QueueService::new();
        let _slot = service.register("dup").unwrap();

        assert_eq!(
            service.register("dup").unwrap_err(),
            QueueError::DuplicateRequestId("dup".into())
        );
    }

    #[test]
    fn dropping_the_slot_cleans_the_table() {
        let service = QueueService::new();
        let slot = service.register("gone").unwrap();
        assert_eq!(service.pending_count(), 1);

        drop(slot);

        assert_eq!(service.pending_count(), 0);
        assert!(!service.set_result("gone", None));
    }

    #[tokio::test]
    async fn each_request_reaches_exactly_one_worker() {
        let service = Arc::new(QueueService::new());
        let mut slots = Vec::new();
        for _ in 0..20 {
            let req = request("detect");
            slots.push(service.register(&req.reqid).unwrap());
            service.enqueue("shared", req);
        }

        let mut workers = Vec::new();
        for _ in 0..4 {
            let service = Arc::clone(&service);
            workers.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let mut seen = Vec::new();
                while let Ok(Some(req)) = tokio::time::timeout(
                    Duration::from_millis(50),
                    service.dequeue("shared", &cancel),
                )
                .await
                {
                    seen.push(req.reqid);
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn polled_queues_are_pruned_once_idle() {
        let service = Arc::new(QueueService::new());
        service.ensure_queue_exists("vision_queue");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(service.dequeue("made_up_name", &cancel).await.is_none());
        assert_eq!(service.queue_names(), vec!["made_up_name", "vision_queue"]);

        let idle = Duration::from_secs(60);
        assert_eq!(service.prune_idle_at(idle, Instant::now()), 0);
        assert_eq!(service.prune_idle_at(idle, Instant::now() + idle), 1);
        assert_eq!(service.queue_names(), vec!["vision_queue"]);
    }

    #[tokio::test]
    async fn busy_queues_survive_pruning() {
        let service = Arc::new(QueueService::new());
        let idle = Duration::from_secs(60);

        let req = request("detect");
        let _slot = service.register(&req.reqid).unwrap();
        service.enqueue("backlog", req);

        let cancel = CancellationToken::new();
        let worker = {
            let service = Arc::clone(&service);
            let cancel = cancel.clone();
            tokio::spawn(async move { service.dequeue("watched", &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(service.prune_idle_at(idle, Instant::now() + idle), 0);

        cancel.cancel();
        assert!(worker.await.unwrap().is_none());
        assert_eq!(service.prune_idle_at(idle, Instant::now() + idle), 1);
        assert_eq!(service.queue_names(), vec!["backlog"]);

        let got = service.dequeue("backlog", &CancellationToken::new()).await;
        assert!(got.is_some());
        assert_eq!(service.prune_idle_at(idle, Instant::now() + idle), 1);
        assert!(service.queue_names().is_empty());
    }
}
