//! Scriptable in-memory transport.

use async_trait::async_trait;
use cordial_error::HttpError;
use cordial_rate_limit::Route;
use cordial_rest::{HttpResponse, HttpTransport, Payload};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type Handler = Box<dyn Fn(&Route, usize) -> Result<HttpResponse, HttpError> + Send + Sync>;

/// A request the transport saw.
#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub at: Instant,
}

/// Transport answering every request through a handler.
///
/// The handler receives the route and the zero-based index of the call
/// across the whole transport.
pub struct MockTransport {
    handler: Handler,
    calls: Mutex<Vec<Call>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new(
        handler: impl Fn(&Route, usize) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always answers 200 with an empty object.
    pub fn ok() -> Arc<Self> {
        Self::new(|_, _| Ok(ok_response()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, route: &Route, _payload: &Payload) -> Result<HttpResponse, HttpError> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push(Call {
                path: route.path().clone(),
                at: Instant::now(),
            });
            calls.len() - 1
        };
        (self.handler)(route, index)
    }
}

/// Build a response from header pairs and a body.
pub fn response(status: u16, headers: &[(&'static str, String)], body: &str) -> HttpResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_static(*name),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    HttpResponse::new(status, map, body.to_string())
}

pub fn ok_response() -> HttpResponse {
    response(200, &[], "{}")
}

/// 200 carrying bucket window headers.
#[allow(dead_code)]
pub fn bucket_response(limit: u32, remaining: u32, reset_after: Duration) -> HttpResponse {
    response(
        200,
        &[
            ("x-ratelimit-limit", limit.to_string()),
            ("x-ratelimit-remaining", remaining.to_string()),
            ("x-ratelimit-reset-after", format!("{:.3}", reset_after.as_secs_f64())),
        ],
        "{}",
    )
}
