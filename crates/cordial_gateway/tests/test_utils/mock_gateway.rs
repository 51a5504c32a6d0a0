//! In-memory gateway links.

use async_trait::async_trait;
use cordial_error::{GatewayError, GatewayErrorKind, GatewayResult, HttpError};
use cordial_gateway::{Frame, GatewayConnection, GatewayPayload, GatewayTransport, Opcode};
use cordial_rate_limit::Route;
use cordial_rest::{HttpResponse, HttpTransport, Payload};
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

const WAIT: Duration = Duration::from_secs(600);

/// Something the session wrote to a link.
#[derive(Debug, Clone)]
pub enum Sent {
    Text { payload: GatewayPayload, at: Instant },
    Close(u16),
}

/// Server end of one link.
pub struct MockServer {
    pub url: String,
    inbound: mpsc::UnboundedSender<Frame>,
    outbound: mpsc::UnboundedReceiver<Sent>,
}

#[allow(dead_code)]
impl MockServer {
    pub fn push(&self, frame: Value) {
        let _ = self.inbound.send(Frame::Text(frame.to_string()));
    }

    pub fn hello(&self, interval_ms: u64) {
        self.push(json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}));
    }

    pub fn dispatch(&self, name: &str, seq: u64, data: Value) {
        self.push(json!({"op": 0, "t": name, "s": seq, "d": data}));
    }

    pub fn ready(&self, session_id: &str, seq: u64) {
        self.dispatch(
            "READY",
            seq,
            json!({
                "session_id": session_id,
                "resume_gateway_url": "wss://resume.test",
                "shard": [0, 1],
            }),
        );
    }

    pub fn resumed(&self, seq: u64) {
        self.dispatch("RESUMED", seq, Value::Null);
    }

    pub fn heartbeat_ack(&self) {
        self.push(json!({"op": 11}));
    }

    pub fn request_heartbeat(&self) {
        self.push(json!({"op": 1, "d": null}));
    }

    pub fn request_reconnect(&self) {
        self.push(json!({"op": 7, "d": null}));
    }

    pub fn invalid_session(&self, resumable: bool) {
        self.push(json!({"op": 9, "d": resumable}));
    }

    pub fn close(&self, code: u16) {
        let _ = self.inbound.send(Frame::Close {
            code,
            reason: format!("closed with {}", code),
        });
    }

    pub async fn next_sent(&mut self) -> Sent {
        timeout(WAIT, self.outbound.recv())
            .await
            .expect("session never wrote to the link")
            .expect("link was dropped")
    }

    /// Next frame with `op`, skipping heartbeats unless asked for.
    pub async fn expect_op(&mut self, op: Opcode) -> (GatewayPayload, Instant) {
        loop {
            match self.next_sent().await {
                Sent::Text { payload, at } if payload.op == op => return (payload, at),
                Sent::Text { payload, .. } if payload.op == Opcode::Heartbeat => continue,
                other => panic!("expected {:?}, got {:?}", op, other),
            }
        }
    }

    /// Next close code, skipping text frames.
    pub async fn expect_close(&mut self) -> u16 {
        loop {
            if let Sent::Close(code) = self.next_sent().await {
                return code;
            }
        }
    }

    /// Hello, Identify, READY.
    pub async fn handshake(&mut self, session_id: &str) -> GatewayPayload {
        self.hello(41_250);
        let (identify, _) = self.expect_op(Opcode::Identify).await;
        self.ready(session_id, 1);
        identify
    }
}

/// Gateway transport whose links are handed to the test.
pub struct MockGatewayTransport {
    servers: mpsc::UnboundedSender<MockServer>,
    refuse: AtomicBool,
    connects: AtomicUsize,
}

#[allow(dead_code)]
impl MockGatewayTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            servers: tx,
            refuse: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    /// Every connect attempt fails.
    pub fn refusing() -> Arc<Self> {
        let (transport, _) = Self::new();
        transport.refuse.store(true, Ordering::SeqCst);
        transport
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayTransport for MockGatewayTransport {
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn GatewayConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GatewayError::new(GatewayErrorKind::Connection(
                "connection refused".to_string(),
            )));
        }
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let server = MockServer {
            url: url.to_string(),
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        if self.servers.send(server).is_err() {
            return Err(GatewayError::new(GatewayErrorKind::Connection(
                "test stopped accepting links".to_string(),
            )));
        }
        Ok(Box::new(MockConnection {
            inbound: inbound_rx,
            outbound: outbound_tx,
            closed: false,
        }))
    }
}

struct MockConnection {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Sent>,
    closed: bool,
}

#[async_trait]
impl GatewayConnection for MockConnection {
    async fn send(&mut self, text: String) -> GatewayResult<()> {
        let payload = GatewayPayload::from_text(&text)?;
        let _ = self.outbound.send(Sent::Text {
            payload,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn recv(&mut self) -> Option<GatewayResult<Frame>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, _reason: &str) -> GatewayResult<()> {
        self.closed = true;
        let _ = self.outbound.send(Sent::Close(code));
        Ok(())
    }
}

/// HTTP transport answering `GET /gateway/bot`.
pub struct GatewayBotTransport {
    body: Value,
}

#[allow(dead_code)]
impl GatewayBotTransport {
    pub fn new(url: &str, shards: u32, total: u32, remaining: u32) -> Arc<Self> {
        Arc::new(Self {
            body: json!({
                "url": url,
                "shards": shards,
                "session_start_limit": {
                    "total": total,
                    "remaining": remaining,
                    "reset_after": 60_000,
                    "max_concurrency": 1,
                },
            }),
        })
    }
}

#[async_trait]
impl HttpTransport for GatewayBotTransport {
    async fn execute(&self, route: &Route, _payload: &Payload) -> Result<HttpResponse, HttpError> {
        assert_eq!(route.path(), "/gateway/bot");
        Ok(HttpResponse::new(200, HeaderMap::new(), self.body.to_string()))
    }
}
