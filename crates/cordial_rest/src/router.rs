//! Bucket-aware request router.
//!
//! Every bucket gets a lane: a FIFO queue drained by one worker task, one
//! dispatch at a time. Lanes run independently so a limited bucket never
//! stalls unrelated traffic. The shared [`GlobalRateLimiter`] gates them all.
//!
//! Lock order is lane map shard, then lane state, then bucket record, then
//! shared bucket map shard. Nothing is held across an await.

use crate::queue::{QueuedRequest, RequestQueue};
use crate::{HttpResponse, HttpTransport, Payload};
use cordial_error::{RestError, RestErrorKind, RestResult};
use cordial_rate_limit::{
    Admission, BucketKey, GlobalRateLimiter, RateLimitBucket, RateLimitHeaders, RestConfig, Route,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// Delay used when a 429 carries no retry information.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

type SharedBucket = Arc<Mutex<RateLimitBucket>>;

/// Routes requests through per-bucket lanes.
///
/// Cloning is cheap; clones share every lane and limiter.
///
/// # Example
///
/// ```rust,ignore
/// use cordial_rest::{Payload, ReqwestTransport, RequestRouter, routes};
/// use cordial_rate_limit::RestConfig;
///
/// let config = RestConfig::default();
/// let transport = ReqwestTransport::new(&token, &config)?;
/// let router = RequestRouter::new(transport, config);
///
/// let route = routes::MESSAGE_CREATE.bind(&[channel_id])?;
/// let response = router
///     .submit(route, Payload::json(serde_json::json!({"content": "hello"})))
///     .await?;
/// ```
#[derive(Clone)]
pub struct RequestRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    transport: Arc<dyn HttpTransport>,
    config: RestConfig,
    global: GlobalRateLimiter,
    lanes: DashMap<BucketKey, Arc<Lane>>,
    shared_buckets: DashMap<BucketKey, SharedBucket>,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

struct Lane {
    key: BucketKey,
    state: Mutex<LaneState>,
    notify: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct LaneState {
    queue: RequestQueue,
    in_flight: bool,
    parked: Option<Parked>,
    bucket: SharedBucket,
    server_hash: Option<String>,
}

/// A request taken off the queue but not yet on the wire.
struct Parked {
    id: u64,
    cancelled: bool,
    wake: Arc<Notify>,
}

enum Next {
    Request(QueuedRequest),
    Idle,
    Shutdown,
}

enum Wake {
    Elapsed,
    Cancelled,
    Abandoned,
    Shutdown,
}

impl RequestRouter {
    /// Create a router over a transport.
    pub fn new(transport: impl HttpTransport + 'static, config: RestConfig) -> Self {
        let global = config.global_limiter();
        Self::with_global_limiter(transport, config, global)
    }

    /// Create a router with an explicit global limiter.
    pub fn with_global_limiter(
        transport: impl HttpTransport + 'static,
        config: RestConfig,
        global: GlobalRateLimiter,
    ) -> Self {
        info!(
            max_retries = config.max_retries(),
            queue_capacity = config.queue_capacity(),
            "Creating request router"
        );
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(RouterInner {
                transport: Arc::new(transport),
                config,
                global,
                lanes: DashMap::new(),
                shared_buckets: DashMap::new(),
                next_id: AtomicU64::new(1),
                shutdown,
            }),
        }
    }

    /// Queue a request on its bucket lane.
    ///
    /// Must be called from within a Tokio runtime. Never blocks; the returned
    /// handle resolves once the request reaches a terminal outcome.
    pub fn submit(&self, route: Route, payload: Payload) -> RequestHandle {
        let (tx, rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request = QueuedRequest::new(id, route, payload, tx);

        if self.is_shut_down() {
            request.fail(RestErrorKind::Shutdown);
            return RequestHandle {
                id,
                lane: Weak::new(),
                rx,
            };
        }

        let key = request.route().bucket_key();
        trace!(id, bucket = %key, path = %request.route().path(), "Submitting request");

        // Pushing under the map entry keeps eviction from racing the submission
        let lane = {
            let entry = self
                .inner
                .lanes
                .entry(key.clone())
                .or_insert_with(|| RouterInner::spawn_lane(&self.inner, key));
            let lane = Arc::clone(entry.value());
            let pushed = lane.state.lock().queue.push_back(request);
            if let Err(rejected) = pushed {
                warn!(bucket = %lane.key, "Bucket queue full, rejecting request");
                rejected.fail(RestErrorKind::QueueFull {
                    bucket: lane.key.to_string(),
                    capacity: *self.inner.config.queue_capacity(),
                });
            }
            lane
        };
        lane.notify.notify_one();

        RequestHandle {
            id,
            lane: Arc::downgrade(&lane),
            rx,
        }
    }

    /// Submit a request and decode its JSON response.
    #[instrument(skip(self, payload), fields(path = %route.path()))]
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        route: Route,
        payload: Payload,
    ) -> RestResult<T> {
        let response = self.submit(route, payload).await?;
        response.json()
    }

    /// Global limiter shared by every lane.
    pub fn global(&self) -> &GlobalRateLimiter {
        &self.inner.global
    }

    /// Router settings.
    pub fn config(&self) -> &RestConfig {
        &self.inner.config
    }

    /// Number of live bucket lanes.
    pub fn lane_count(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Queued plus in-flight requests for a bucket.
    pub fn pending(&self, key: &BucketKey) -> usize {
        self.inner
            .lanes
            .get(key)
            .map(|lane| {
                let state = lane.state.lock();
                state.queue.len() + usize::from(state.in_flight)
            })
            .unwrap_or(0)
    }

    /// Copy of the window state a bucket lane currently uses.
    pub fn bucket_snapshot(&self, key: &BucketKey) -> Option<RateLimitBucket> {
        let lane = self.inner.lanes.get(key)?;
        let bucket = Arc::clone(&lane.state.lock().bucket);
        let snapshot = bucket.lock().clone();
        Some(snapshot)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Stop accepting requests and wind down every lane.
    ///
    /// Queued requests fail with `Shutdown`; requests already on the wire
    /// complete. Returns once every lane worker has exited.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Shutting down request router");
        self.inner.shutdown.send_replace(true);

        let lanes: Vec<Arc<Lane>> = self
            .inner
            .lanes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for lane in &lanes {
            lane.notify.notify_one();
        }
        for lane in &lanes {
            let task = lane.task.lock().take();
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(bucket = %lane.key, error = %e, "Bucket lane task failed");
                }
            }
            for request in lane.state.lock().queue.drain() {
                request.fail(RestErrorKind::Shutdown);
            }
        }

        self.inner.lanes.clear();
        self.inner.shared_buckets.clear();
        debug!(lanes = lanes.len(), "Request router stopped");
    }
}

impl std::fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRouter")
            .field("lanes", &self.inner.lanes.len())
            .field("global", &self.inner.global)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl RouterInner {
    fn spawn_lane(inner: &Arc<Self>, key: BucketKey) -> Arc<Lane> {
        debug!(bucket = %key, "Creating bucket lane");
        let lane = Arc::new(Lane {
            key,
            state: Mutex::new(LaneState {
                queue: RequestQueue::new(*inner.config.queue_capacity()),
                in_flight: false,
                parked: None,
                bucket: SharedBucket::default(),
                server_hash: None,
            }),
            notify: Notify::new(),
            task: Mutex::new(None),
        });
        let task = tokio::spawn(Self::run_lane(Arc::clone(inner), Arc::clone(&lane)));
        *lane.task.lock() = Some(task);
        lane
    }

    async fn run_lane(inner: Arc<Self>, lane: Arc<Lane>) {
        let mut shutdown = inner.shutdown.subscribe();
        let idle_timeout = inner.config.bucket_idle_timeout();
        trace!(bucket = %lane.key, "Bucket lane started");

        loop {
            let closed = *shutdown.borrow();
            match lane.next_request(closed) {
                Next::Request(request) => {
                    inner.dispatch(&lane, request, &mut shutdown).await;
                    let mut state = lane.state.lock();
                    state.in_flight = false;
                    state.parked = None;
                }
                Next::Shutdown => {
                    for request in lane.state.lock().queue.drain() {
                        request.fail(RestErrorKind::Shutdown);
                    }
                    break;
                }
                Next::Idle => {
                    tokio::select! {
                        _ = lane.notify.notified() => {}
                        _ = shutdown.wait_for(|closed| *closed) => {}
                        _ = tokio::time::sleep(idle_timeout) => {
                            if inner.evict(&lane) {
                                break;
                            }
                        }
                    }
                }
            }
        }
        trace!(bucket = %lane.key, "Bucket lane stopped");
    }

    /// Drive one request until it completes or goes back on the queue.
    async fn dispatch(
        &self,
        lane: &Lane,
        mut request: QueuedRequest,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let cancel = lane.park(request.id());
        loop {
            let now = Instant::now();
            let admission = match self.global.try_admit(now) {
                Admission::Granted => lane.bucket().lock().try_admit(now),
                deferred => deferred,
            };
            let Admission::Deferred(wait) = admission else {
                break;
            };

            debug!(bucket = %lane.key, id = request.id(), ?wait, "Request deferred by rate limit");
            match Self::wait(wait, &mut request, &cancel, shutdown).await {
                Wake::Elapsed => {}
                Wake::Cancelled => {
                    request.fail(RestErrorKind::Cancelled);
                    return;
                }
                Wake::Abandoned => {
                    trace!(id = request.id(), "Request abandoned before dispatch");
                    return;
                }
                Wake::Shutdown => {
                    request.fail(RestErrorKind::Shutdown);
                    return;
                }
            }
        }

        if request.is_abandoned() {
            trace!(id = request.id(), "Request abandoned before dispatch");
            return;
        }
        // Past this point the request is on the wire and cannot be withdrawn
        if lane.unpark(request.id()) {
            request.fail(RestErrorKind::Cancelled);
            return;
        }

        let permit = self.global.acquire().await;
        let outcome = self
            .transport
            .execute(request.route(), request.payload())
            .await;
        let observed_at = Instant::now();
        drop(permit);

        match outcome {
            Ok(response) => self.handle_response(lane, request, response, observed_at, shutdown).await,
            Err(e) => {
                debug!(bucket = %lane.key, error = %e, "Transport failure");
                self.retry_or_fail(lane, request, None, e.message, shutdown).await
            }
        }
    }

    async fn handle_response(
        &self,
        lane: &Lane,
        request: QueuedRequest,
        response: HttpResponse,
        observed_at: Instant,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let status = response.status();
        let mut headers = response.rate_limit();
        if status == 429 {
            headers = headers.with_rate_limited_body(response.body());
        }

        self.global.update(&headers, observed_at);
        let bucket = self.rebind_bucket(lane, &request, &headers);
        bucket.lock().update(&headers, observed_at);

        trace!(
            bucket = %lane.key,
            status,
            remaining = ?headers.remaining,
            reset_after = ?headers.reset_after,
            "Response received"
        );

        match status {
            429 => {
                let retry_after = headers
                    .retry_after
                    .or(headers.reset_after)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                if headers.global {
                    self.global.rate_limited_for(retry_after, observed_at);
                } else {
                    bucket.lock().exhaust(retry_after, observed_at);
                }
                warn!(
                    bucket = %lane.key,
                    global = headers.global,
                    ?retry_after,
                    "Rate limited, re-enqueueing request"
                );
                lane.requeue(request);
            }
            500..=599 => {
                let message = format!("Server error {}: {}", status, response.text());
                self.retry_or_fail(lane, request, Some(status), message, shutdown)
                    .await
            }
            200..=399 => request.respond(Ok(response)),
            _ => {
                debug!(bucket = %lane.key, status, "Request failed permanently");
                request.fail(RestErrorKind::Permanent {
                    status,
                    body: response.text(),
                });
            }
        }
    }

    async fn retry_or_fail(
        &self,
        lane: &Lane,
        mut request: QueuedRequest,
        status: Option<u16>,
        message: String,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let attempts = request.record_failure();
        if attempts > *self.config.max_retries() {
            warn!(bucket = %lane.key, attempts, error = %message, "Retries exhausted");
            request.fail(RestErrorKind::Transient {
                status,
                attempts,
                message,
            });
            return;
        }

        let delay = self.config.backoff().delay(attempts);
        debug!(bucket = %lane.key, attempts, ?delay, "Retrying after transient failure");
        let cancel = lane.park(request.id());
        match Self::wait(delay, &mut request, &cancel, shutdown).await {
            Wake::Elapsed => lane.requeue(request),
            Wake::Cancelled => request.fail(RestErrorKind::Cancelled),
            Wake::Abandoned => trace!(id = request.id(), "Request abandoned during backoff"),
            Wake::Shutdown => request.fail(RestErrorKind::Shutdown),
        }
    }

    async fn wait(
        duration: Duration,
        request: &mut QueuedRequest,
        cancel: &Notify,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Wake {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Wake::Elapsed,
            _ = cancel.notified() => Wake::Cancelled,
            _ = request.abandoned() => Wake::Abandoned,
            _ = shutdown.wait_for(|closed| *closed) => Wake::Shutdown,
        }
    }

    /// Point the lane at the server's shared bucket record when one is named.
    fn rebind_bucket(
        &self,
        lane: &Lane,
        request: &QueuedRequest,
        headers: &RateLimitHeaders,
    ) -> SharedBucket {
        let mut state = lane.state.lock();
        let hash = match &headers.bucket {
            Some(hash) if state.server_hash.as_deref() != Some(hash.as_str()) => hash,
            _ => return Arc::clone(&state.bucket),
        };

        let shared_key = BucketKey::from_hash(hash, request.route().major().as_deref());
        let current = state.bucket.lock().clone();
        let shared = Arc::clone(
            self.shared_buckets
                .entry(shared_key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(current)))
                .value(),
        );
        debug!(bucket = %lane.key, shared = %shared_key, "Bucket bound to server hash");

        state.bucket = Arc::clone(&shared);
        state.server_hash = Some(hash.clone());
        shared
    }

    /// Remove an idle lane. Fails if anything was queued in the meantime.
    fn evict(&self, lane: &Arc<Lane>) -> bool {
        let removed = self
            .lanes
            .remove_if(&lane.key, |_, current| {
                Arc::ptr_eq(current, lane) && current.is_idle()
            })
            .is_some();

        if removed {
            // Release this lane's hold on any shared record before pruning
            drop(std::mem::take(&mut lane.state.lock().bucket));
            self.shared_buckets
                .retain(|_, bucket| Arc::strong_count(bucket) > 1);
            debug!(bucket = %lane.key, "Evicted idle bucket lane");
        }
        removed
    }
}

impl Lane {
    fn next_request(&self, closed: bool) -> Next {
        if closed {
            return Next::Shutdown;
        }
        let mut state = self.state.lock();
        while let Some(request) = state.queue.pop_front() {
            if request.is_abandoned() {
                trace!(id = request.id(), "Skipping abandoned request");
                continue;
            }
            state.in_flight = true;
            return Next::Request(request);
        }
        Next::Idle
    }

    fn bucket(&self) -> SharedBucket {
        Arc::clone(&self.state.lock().bucket)
    }

    /// Mark a request as waiting outside the queue so it stays cancellable.
    fn park(&self, id: u64) -> Arc<Notify> {
        let wake = Arc::new(Notify::new());
        self.state.lock().parked = Some(Parked {
            id,
            cancelled: false,
            wake: Arc::clone(&wake),
        });
        wake
    }

    /// Clear the parked slot. Returns true if the request was cancelled.
    fn unpark(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        match state.parked.take() {
            Some(parked) if parked.id == id => parked.cancelled,
            other => {
                state.parked = other;
                false
            }
        }
    }

    fn requeue(&self, request: QueuedRequest) {
        let mut state = self.state.lock();
        let cancelled = match state.parked.take() {
            Some(parked) if parked.id == request.id() => parked.cancelled,
            other => {
                state.parked = other;
                false
            }
        };
        if cancelled {
            drop(state);
            debug!(bucket = %self.key, id = request.id(), "Request cancelled");
            request.fail(RestErrorKind::Cancelled);
        } else {
            state.queue.push_front(request);
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && !state.in_flight
    }

    fn cancel(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        if let Some(request) = state.queue.remove(id) {
            drop(state);
            debug!(bucket = %self.key, id, "Request cancelled");
            request.fail(RestErrorKind::Cancelled);
            return true;
        }
        match state.parked.as_mut() {
            Some(parked) if parked.id == id && !parked.cancelled => {
                debug!(bucket = %self.key, id, "Cancelling request waiting to be sent");
                parked.cancelled = true;
                parked.wake.notify_one();
                true
            }
            _ => false,
        }
    }
}

/// Pending result of a submitted request.
///
/// Await it for the response. Dropping it abandons the request if it has not
/// been dispatched yet.
#[derive(Debug)]
pub struct RequestHandle {
    id: u64,
    lane: Weak<Lane>,
    rx: oneshot::Receiver<RestResult<HttpResponse>>,
}

impl RequestHandle {
    /// Router-assigned request id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Withdraw the request if it has not been sent yet.
    ///
    /// Works while the request is queued or waiting on a rate limit or retry
    /// backoff. On success the handle resolves to `Cancelled`. Returns
    /// `false` once the request is on the wire or has finished.
    pub fn cancel(&self) -> bool {
        self.lane
            .upgrade()
            .is_some_and(|lane| lane.cancel(self.id))
    }
}

impl Future for RequestHandle {
    type Output = RestResult<HttpResponse>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| Err(RestError::new(RestErrorKind::Shutdown)))
        })
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane").field("key", &self.key).finish()
    }
}
