//! Per-bucket request queue.

use crate::{HttpResponse, Payload};
use cordial_error::{RestError, RestErrorKind, RestResult};
use cordial_rate_limit::Route;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

/// Where a request's result is delivered.
pub(crate) type Responder = oneshot::Sender<RestResult<HttpResponse>>;

/// A request waiting in, or taken from, a bucket lane.
///
/// Owned by the queue until dispatched, then by the lane worker until a
/// terminal result is sent or it is pushed back for another attempt.
#[derive(Debug)]
pub struct QueuedRequest {
    id: u64,
    route: Route,
    payload: Payload,
    responder: Responder,
    enqueued_at: Instant,
    attempts: u32,
}

impl QueuedRequest {
    pub(crate) fn new(id: u64, route: Route, payload: Payload, responder: Responder) -> Self {
        Self {
            id,
            route,
            payload,
            responder,
            enqueued_at: Instant::now(),
            attempts: 0,
        }
    }

    /// Router-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Target route.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Request body and options.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// When the request entered the router.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Failed transient attempts so far. Rate-limited attempts are not counted.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// The caller dropped its handle.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }

    /// Resolves once the caller drops its handle.
    pub(crate) async fn abandoned(&mut self) {
        self.responder.closed().await
    }

    /// Deliver the terminal result.
    pub(crate) fn respond(self, result: RestResult<HttpResponse>) {
        // The caller may have dropped its handle
        let _ = self.responder.send(result);
    }

    pub(crate) fn fail(self, kind: RestErrorKind) {
        self.respond(Err(RestError::new(kind)));
    }
}

/// FIFO queue of requests for one bucket.
#[derive(Debug)]
pub struct RequestQueue {
    items: VecDeque<QueuedRequest>,
    capacity: usize,
}

impl RequestQueue {
    /// Create a queue holding at most `capacity` new submissions.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a new submission.
    ///
    /// Hands the request back when the queue is at capacity.
    pub fn push_back(&mut self, request: QueuedRequest) -> Result<(), QueuedRequest> {
        if self.items.len() >= self.capacity {
            return Err(request);
        }
        self.items.push_back(request);
        Ok(())
    }

    /// Put a request back at the head for another attempt.
    ///
    /// Ignores capacity; the request already held a place in line.
    pub fn push_front(&mut self, request: QueuedRequest) {
        trace!(id = request.id, "Request re-enqueued at head");
        self.items.push_front(request);
    }

    /// Take the oldest request.
    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        self.items.pop_front()
    }

    /// Remove a still-queued request by id.
    pub fn remove(&mut self, id: u64) -> Option<QueuedRequest> {
        let index = self.items.iter().position(|r| r.id == id)?;
        self.items.remove(index)
    }

    /// Take every queued request.
    pub fn drain(&mut self) -> Vec<QueuedRequest> {
        self.items.drain(..).collect()
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of new submissions held at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
