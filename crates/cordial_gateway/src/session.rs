//! One shard's gateway session.
//!
//! A session is a single task that owns its link and drives the lifecycle
//! `Connecting -> AwaitingHello -> Handshaking -> Ready`, dropping to
//! `Reconnecting` whenever the link fails. Session id and sequence survive
//! reconnects so the next handshake can resume; they are only discarded when
//! the server refuses the session.
//!
//! Everything a session reacts to (inbound frames, heartbeat and handshake
//! timers, identify admission and caller commands) is polled from one
//! `select!`, so the session state needs no locks.

use crate::{
    Frame, GatewayConnection, GatewayEvent, GatewayPayload, GatewayTransport, IdentifyOptions,
    Opcode, ReadyInfo, ReconnectReason, ShardId,
};
use cordial_error::{GatewayError, GatewayErrorKind, GatewayResult, is_fatal_close_code};
use cordial_rate_limit::{Backoff, GatewayConfig, IdentifyLimiter};
use futures_util::future::BoxFuture;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_retry2::strategy::jitter_range;
use tracing::{debug, error, info, instrument, trace, warn};

/// Close code that keeps the session resumable.
const CLOSE_RESUMABLE: u16 = 4000;
/// Close code that ends the session server-side.
const CLOSE_NORMAL: u16 = 1000;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum SessionState {
    /// Not connected and not trying to
    #[display("disconnected")]
    Disconnected,
    /// Opening the link
    #[display("connecting")]
    Connecting,
    /// Link open, waiting for Hello
    #[display("awaiting hello")]
    AwaitingHello,
    /// Identify or Resume in progress
    #[display("handshaking")]
    Handshaking,
    /// Receiving events
    #[display("ready")]
    Ready,
    /// Waiting out the backoff before the next connect
    #[display("reconnecting")]
    Reconnecting,
}

/// Snapshot of a session, published on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Shard
    pub shard: ShardId,
    /// Lifecycle state
    pub state: SessionState,
    /// Session id, once READY has been seen
    pub session_id: Option<String>,
    /// Highest dispatch sequence seen
    pub sequence: Option<u64>,
    /// Heartbeat interval from the last Hello
    pub heartbeat_interval: Option<Duration>,
    /// Round trip of the last acknowledged heartbeat
    pub latency: Option<Duration>,
    /// When the last heartbeat ACK arrived
    pub last_ack: Option<Instant>,
}

impl SessionInfo {
    fn new(shard: ShardId) -> Self {
        Self {
            shard,
            state: SessionState::Disconnected,
            session_id: None,
            sequence: None,
            heartbeat_interval: None,
            latency: None,
            last_ack: None,
        }
    }
}

/// Instructions from the owner of a session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Send a payload once the session is ready
    Send(GatewayPayload),
    /// Drop the link and resume on a new one
    Reconnect,
    /// Close the link and stop
    Shutdown,
}

/// Owner's handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    shard: ShardId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    info: watch::Receiver<SessionInfo>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Shard served by this session.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Queue a payload; it is sent once the session is ready.
    pub fn send(&self, payload: GatewayPayload) -> GatewayResult<()> {
        self.command(SessionCommand::Send(payload))
    }

    /// Drop the current link and resume on a new one.
    pub fn reconnect(&self) -> GatewayResult<()> {
        self.command(SessionCommand::Reconnect)
    }

    fn command(&self, command: SessionCommand) -> GatewayResult<()> {
        self.commands
            .send(command)
            .map_err(|_| GatewayError::new(GatewayErrorKind::Shutdown))
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.info.borrow().state
    }

    /// Current snapshot.
    pub fn info(&self) -> SessionInfo {
        self.info.borrow().clone()
    }

    /// Watch snapshots as they change.
    pub fn subscribe(&self) -> watch::Receiver<SessionInfo> {
        self.info.clone()
    }

    /// Close the link and wait for the session task to finish.
    #[instrument(skip(self), fields(shard = %self.shard))]
    pub async fn shutdown(&mut self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Session task failed");
            }
        }
    }
}

/// How one link ended.
#[derive(Debug)]
enum Exit {
    Shutdown,
    Fatal(GatewayErrorKind),
    Reconnect {
        resumable: bool,
        reason: ReconnectReason,
    },
}

/// Per-link heartbeat and handshake bookkeeping.
#[derive(Default)]
struct Link {
    interval: Option<Duration>,
    next_beat: Option<Instant>,
    awaiting_ack: bool,
    missed: u32,
    sent_at: Option<Instant>,
    deadline: Option<Instant>,
    identify: Option<BoxFuture<'static, ()>>,
}

/// The task-side state of one shard's session.
pub struct ConnectionSession {
    shard: ShardId,
    options: Arc<IdentifyOptions>,
    config: GatewayConfig,
    backoff: Backoff,
    transport: Arc<dyn GatewayTransport>,
    limiter: Arc<IdentifyLimiter>,
    outbound_quota: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    info: watch::Sender<SessionInfo>,
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    gateway_url: String,
    pending: VecDeque<GatewayPayload>,
    failures: u32,
}

impl ConnectionSession {
    /// Start a session task for `shard`.
    ///
    /// `gateway_url` is used for cold connects; resumes use the URL from
    /// READY when the server supplied one.
    pub fn spawn(
        shard: ShardId,
        options: Arc<IdentifyOptions>,
        config: GatewayConfig,
        gateway_url: String,
        transport: Arc<dyn GatewayTransport>,
        limiter: Arc<IdentifyLimiter>,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (info_tx, info_rx) = watch::channel(SessionInfo::new(shard));
        let per_minute = NonZeroU32::new(*config.outbound_per_minute()).unwrap_or(NonZeroU32::MIN);

        let session = Self {
            shard,
            options,
            backoff: config.backoff(),
            config,
            transport,
            limiter,
            outbound_quota: RateLimiter::direct(Quota::per_minute(per_minute)),
            commands: command_rx,
            events,
            info: info_tx,
            session_id: None,
            sequence: None,
            resume_url: None,
            gateway_url,
            pending: VecDeque::new(),
            failures: 0,
        };

        let task = tokio::spawn(session.run());
        SessionHandle {
            shard,
            commands: command_tx,
            info: info_rx,
            task: Some(task),
        }
    }

    #[instrument(skip(self), fields(shard = %self.shard))]
    async fn run(mut self) {
        info!("Starting gateway session");
        let fatal = loop {
            let url = self.connect_url();
            self.set_state(SessionState::Connecting);
            debug!(%url, resumable = self.can_resume(), "Connecting");

            let transport = Arc::clone(&self.transport);
            let connect = transport.connect(&url);
            tokio::pin!(connect);
            let connected = loop {
                tokio::select! {
                    result = &mut connect => break Some(result),
                    command = self.commands.recv() => {
                        if self.absorb(command) {
                            break None;
                        }
                    }
                }
            };

            let exit = match connected {
                None => Exit::Shutdown,
                Some(Ok(mut conn)) => {
                    self.set_state(SessionState::AwaitingHello);
                    self.drive(conn.as_mut()).await
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Gateway connect failed");
                    Exit::Reconnect {
                        resumable: true,
                        reason: ReconnectReason::Failure(e.kind),
                    }
                }
            };

            match exit {
                Exit::Shutdown => break None,
                Exit::Fatal(kind) => {
                    error!(error = %kind, "Gateway session ended");
                    break Some(kind);
                }
                Exit::Reconnect { resumable, reason } => {
                    if !resumable {
                        self.set_state(SessionState::Disconnected);
                        self.reset_session();
                    }
                    self.failures += 1;
                    let exhausted = self
                        .config
                        .max_retries()
                        .is_some_and(|max| self.failures > max);
                    if exhausted {
                        error!(failures = self.failures, %reason, "Giving up on gateway session");
                        break Some(GatewayErrorKind::Connection(format!(
                            "Gave up after {} failed attempts: {}",
                            self.failures, reason
                        )));
                    }

                    let resumable = self.can_resume();
                    info!(attempt = self.failures, resumable, %reason, "Reconnecting");
                    self.set_state(SessionState::Reconnecting);
                    self.emit(GatewayEvent::Reconnecting {
                        shard: self.shard,
                        attempt: self.failures,
                        resumable,
                        reason,
                    });

                    if self.wait_backoff().await {
                        break None;
                    }
                }
            }
        };

        self.set_state(SessionState::Disconnected);
        self.emit(GatewayEvent::Disconnected {
            shard: self.shard,
            fatal,
        });
        info!("Gateway session stopped");
    }

    /// Sleep out the reconnect backoff. Returns true if told to shut down.
    async fn wait_backoff(&mut self) -> bool {
        let delay = self.backoff.delay(self.failures);
        debug!(?delay, "Waiting before reconnect");
        let wake = sleep(delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => return false,
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Reconnect) => return false,
                        other => {
                            if self.absorb(other) {
                                return true;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Handle a command while not connected. Returns true on shutdown.
    fn absorb(&mut self, command: Option<SessionCommand>) -> bool {
        match command {
            Some(SessionCommand::Send(payload)) => {
                self.pending.push_back(payload);
                false
            }
            Some(SessionCommand::Reconnect) => false,
            Some(SessionCommand::Shutdown) | None => true,
        }
    }

    async fn drive(&mut self, conn: &mut dyn GatewayConnection) -> Exit {
        let mut link = Link {
            deadline: Some(Instant::now() + self.config.hello_timeout()),
            ..Link::default()
        };

        loop {
            let beat_at = link.next_beat;
            let deadline = link.deadline;
            let identifying = link.identify.is_some();

            tokio::select! {
                frame = conn.recv() => {
                    let outcome = match frame {
                        Some(Ok(Frame::Text(text))) => self.handle_text(&text, &mut link, conn).await,
                        Some(Ok(Frame::Close { code, reason })) => {
                            // The peer already closed; nothing left to send.
                            return self.classify_close(code, reason);
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Gateway link failed");
                            return Exit::Reconnect {
                                resumable: true,
                                reason: ReconnectReason::Failure(e.kind),
                            };
                        }
                        None => {
                            warn!("Gateway link dropped");
                            return Exit::Reconnect {
                                resumable: true,
                                reason: ReconnectReason::Failure(GatewayErrorKind::Connection(
                                    "link dropped".to_string(),
                                )),
                            };
                        }
                    };
                    if let Some(exit) = outcome {
                        return self.leave(conn, exit).await;
                    }
                }
                _ = sleep_until(beat_at.unwrap_or_else(Instant::now)), if beat_at.is_some() => {
                    if link.awaiting_ack {
                        link.missed += 1;
                        if link.missed >= 2 {
                            warn!(missed = link.missed, "Heartbeats not acknowledged, link is a zombie");
                            let exit = Exit::Reconnect {
                                resumable: true,
                                reason: ReconnectReason::Failure(GatewayErrorKind::HeartbeatTimeout),
                            };
                            return self.leave(conn, exit).await;
                        }
                    }
                    if let Some(exit) = self.heartbeat(&mut link, conn).await {
                        return self.leave(conn, exit).await;
                    }
                    link.next_beat = link.interval.map(|interval| Instant::now() + interval);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let stage = if link.interval.is_some() { "READY" } else { "Hello" };
                    warn!(stage, "Handshake timed out");
                    let exit = Exit::Reconnect {
                        resumable: true,
                        reason: ReconnectReason::Failure(GatewayErrorKind::Handshake(format!(
                            "No {} before deadline",
                            stage
                        ))),
                    };
                    return self.leave(conn, exit).await;
                }
                _ = wait_identify(&mut link.identify), if identifying => {
                    link.identify = None;
                    let payload = GatewayPayload::identify(&self.options, self.shard);
                    info!("Identifying");
                    if let Err(e) = self.send(conn, &payload).await {
                        return self.link_failed(e);
                    }
                    link.deadline = link.interval.map(|interval| Instant::now() + interval * 2);
                }
                command = self.commands.recv() => {
                    let exit = match command {
                        Some(SessionCommand::Send(payload)) => {
                            self.pending.push_back(payload);
                            if self.state() == SessionState::Ready {
                                if let Err(e) = self.flush(conn).await {
                                    return self.link_failed(e);
                                }
                            }
                            continue;
                        }
                        Some(SessionCommand::Reconnect) => Exit::Reconnect {
                            resumable: true,
                            reason: ReconnectReason::Requested,
                        },
                        Some(SessionCommand::Shutdown) | None => Exit::Shutdown,
                    };
                    return self.leave(conn, exit).await;
                }
            }
        }
    }

    /// React to one inbound text frame. Returns an exit if the link is done.
    async fn handle_text(
        &mut self,
        text: &str,
        link: &mut Link,
        conn: &mut dyn GatewayConnection,
    ) -> Option<Exit> {
        let payload = match GatewayPayload::from_text(text) {
            Ok(payload) => payload,
            Err(e) => {
                // Unknown opcodes and garbage are skipped, not fatal.
                warn!(error = %e, "Dropping undecodable frame");
                return None;
            }
        };
        trace!(op = ?payload.op, seq = ?payload.s, event = ?payload.t, "Received frame");

        match payload.op {
            Opcode::Hello => {
                let Some(hello) = payload.hello() else {
                    warn!("Hello without heartbeat interval");
                    return Some(Exit::Reconnect {
                        resumable: true,
                        reason: ReconnectReason::Failure(GatewayErrorKind::InvalidPayload(
                            "Hello without heartbeat interval".to_string(),
                        )),
                    });
                };
                let interval = Duration::from_millis(hello.heartbeat_interval);
                link.interval = Some(interval);
                link.next_beat = Some(Instant::now() + jitter_range(0.0, 1.0)(interval));
                link.deadline = None;
                self.info.send_modify(|info| info.heartbeat_interval = Some(interval));
                self.set_state(SessionState::Handshaking);
                debug!(?interval, "Received Hello");

                match (&self.session_id, self.sequence) {
                    (Some(session_id), Some(sequence)) => {
                        let resume = GatewayPayload::resume(self.options.token(), session_id, sequence);
                        info!(sequence, "Resuming");
                        if let Err(e) = self.send(conn, &resume).await {
                            return Some(link_failure(e));
                        }
                        link.deadline = Some(Instant::now() + interval * 2);
                    }
                    _ => {
                        let limiter = Arc::clone(&self.limiter);
                        link.identify = Some(Box::pin(async move { limiter.reserve().await }));
                    }
                }
                None
            }
            Opcode::HeartbeatAck => {
                let now = Instant::now();
                let latency = link.sent_at.map(|sent| now.duration_since(sent));
                link.awaiting_ack = false;
                link.missed = 0;
                trace!(?latency, "Heartbeat acknowledged");
                self.info.send_modify(|info| {
                    info.latency = latency;
                    info.last_ack = Some(now);
                });
                None
            }
            Opcode::Heartbeat => {
                debug!("Server requested heartbeat");
                self.heartbeat(link, conn).await
            }
            Opcode::Reconnect => {
                info!("Server requested reconnect");
                Some(Exit::Reconnect {
                    resumable: true,
                    reason: ReconnectReason::ServerRequested,
                })
            }
            Opcode::InvalidSession => {
                let resumable = payload.invalid_session_resumable().unwrap_or(false);
                warn!(resumable, "Session invalidated");
                Some(Exit::Reconnect {
                    resumable,
                    reason: ReconnectReason::InvalidSession,
                })
            }
            Opcode::Dispatch => self.dispatch(payload, link, conn).await,
            other => {
                debug!(op = ?other, "Ignoring unexpected opcode");
                None
            }
        }
    }

    async fn dispatch(
        &mut self,
        payload: GatewayPayload,
        link: &mut Link,
        conn: &mut dyn GatewayConnection,
    ) -> Option<Exit> {
        if let Some(seq) = payload.s {
            match self.sequence {
                Some(current) if seq <= current => {
                    trace!(seq, current, "Sequence did not advance");
                }
                _ => {
                    self.sequence = Some(seq);
                    self.info.send_modify(|info| info.sequence = Some(seq));
                }
            }
        }

        let name = payload.t.clone().unwrap_or_default();
        let established = match name.as_str() {
            "READY" => match serde_json::from_value::<ReadyInfo>(payload.d.clone()) {
                Ok(ready) => {
                    info!(session_id = %ready.session_id, "Session ready");
                    self.session_id = Some(ready.session_id.clone());
                    self.resume_url = ready.resume_gateway_url;
                    self.info
                        .send_modify(|info| info.session_id = Some(ready.session_id.clone()));
                    Some(GatewayEvent::Ready {
                        shard: self.shard,
                        session_id: ready.session_id,
                    })
                }
                Err(e) => {
                    warn!(error = %e, "READY without session id");
                    None
                }
            },
            "RESUMED" => {
                info!(sequence = ?self.sequence, "Session resumed");
                Some(GatewayEvent::Resumed { shard: self.shard })
            }
            _ => None,
        };

        self.emit(GatewayEvent::Dispatch {
            shard: self.shard,
            name,
            sequence: payload.s,
            data: payload.d,
        });

        if let Some(event) = established {
            link.deadline = None;
            self.failures = 0;
            self.set_state(SessionState::Ready);
            self.emit(event);
            if let Err(e) = self.flush(conn).await {
                return Some(link_failure(e));
            }
        }
        None
    }

    async fn heartbeat(&mut self, link: &mut Link, conn: &mut dyn GatewayConnection) -> Option<Exit> {
        let payload = GatewayPayload::heartbeat(self.sequence);
        if let Err(e) = self.send(conn, &payload).await {
            return Some(link_failure(e));
        }
        link.awaiting_ack = true;
        link.sent_at = Some(Instant::now());
        None
    }

    /// Send queued caller payloads through the outbound quota.
    async fn flush(&mut self, conn: &mut dyn GatewayConnection) -> GatewayResult<()> {
        while let Some(payload) = self.pending.pop_front() {
            self.outbound_quota.until_ready().await;
            debug!(frame = %payload.redacted(), "Sending caller payload");
            if let Err(e) = self.send(conn, &payload).await {
                self.pending.push_front(payload);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn send(
        &self,
        conn: &mut dyn GatewayConnection,
        payload: &GatewayPayload,
    ) -> GatewayResult<()> {
        match payload.op {
            Opcode::Heartbeat => trace!(seq = ?self.sequence, "Sending heartbeat"),
            _ => debug!(frame = %payload.redacted(), "Sending frame"),
        }
        conn.send(payload.to_text()?).await
    }

    fn classify_close(&mut self, code: u16, reason: String) -> Exit {
        let kind = GatewayErrorKind::Closed { code, reason };
        if is_fatal_close_code(code) {
            return Exit::Fatal(kind);
        }
        // Invalid sequence and session timeout void the session.
        let resumable = !matches!(code, 4007 | 4009);
        warn!(code, resumable, "Gateway closed the link");
        Exit::Reconnect {
            resumable,
            reason: ReconnectReason::Failure(kind),
        }
    }

    fn link_failed(&self, e: GatewayError) -> Exit {
        warn!(error = %e, "Gateway link failed");
        link_failure(e)
    }

    /// Close our side of the link in a way that matches `exit`.
    async fn leave(&self, conn: &mut dyn GatewayConnection, exit: Exit) -> Exit {
        let code = match &exit {
            Exit::Reconnect {
                resumable: true, ..
            } => CLOSE_RESUMABLE,
            _ => CLOSE_NORMAL,
        };
        if let Err(e) = conn.close(code, "").await {
            debug!(error = %e, code, "Close handshake failed");
        }
        exit
    }

    fn reset_session(&mut self) {
        let had_session = self.session_id.is_some() || self.sequence.is_some();
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
        self.info.send_modify(|info| {
            info.session_id = None;
            info.sequence = None;
        });
        if had_session {
            info!("Session discarded, next handshake identifies");
            self.emit(GatewayEvent::SessionReset { shard: self.shard });
        }
    }

    fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    fn connect_url(&self) -> String {
        let base = match (&self.resume_url, self.can_resume()) {
            (Some(url), true) => url.as_str(),
            _ => self.gateway_url.as_str(),
        };
        self.config.connect_url(base)
    }

    fn state(&self) -> SessionState {
        self.info.borrow().state
    }

    fn set_state(&self, state: SessionState) {
        self.info.send_if_modified(|info| {
            if info.state == state {
                return false;
            }
            trace!(from = %info.state, to = %state, "Session state change");
            info.state = state;
            true
        });
    }

    fn emit(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            trace!("Event consumer is gone");
        }
    }
}

fn link_failure(e: GatewayError) -> Exit {
    Exit::Reconnect {
        resumable: true,
        reason: ReconnectReason::Failure(e.kind),
    }
}

async fn wait_identify(identify: &mut Option<BoxFuture<'static, ()>>) {
    match identify.as_mut() {
        Some(wait) => wait.await,
        None => std::future::pending().await,
    }
}
