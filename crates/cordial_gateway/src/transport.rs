//! Websocket seam between sessions and the network.

use async_trait::async_trait;
use cordial_error::{GatewayError, GatewayErrorKind, GatewayResult};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, instrument, trace};

/// A frame received from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON text frame
    Text(String),
    /// Close frame
    Close {
        /// Close code (1005 when the peer sent none)
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Opens gateway links.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Open a link to `url`.
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn GatewayConnection>>;
}

/// One open gateway link.
///
/// `recv` must be cancel safe; sessions poll it inside `select!`.
#[async_trait]
pub trait GatewayConnection: Send {
    /// Send a text frame.
    async fn send(&mut self, text: String) -> GatewayResult<()>;

    /// Next frame, or `None` once the link is gone.
    async fn recv(&mut self) -> Option<GatewayResult<Frame>>;

    /// Close the link with `code`.
    async fn close(&mut self, code: u16, reason: &str) -> GatewayResult<()>;
}

/// tokio-tungstenite transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl GatewayTransport for TungsteniteTransport {
    #[instrument(skip(self))]
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn GatewayConnection>> {
        let (stream, response) = connect_async(url).await.map_err(|e| {
            GatewayError::new(GatewayErrorKind::Connection(format!(
                "Failed to connect to {}: {}",
                url, e
            )))
        })?;
        debug!(status = %response.status(), "Gateway link open");
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl GatewayConnection for TungsteniteConnection {
    async fn send(&mut self, text: String) -> GatewayResult<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                GatewayError::new(GatewayErrorKind::Connection(format!(
                    "Failed to send frame: {}",
                    e
                )))
            })
    }

    async fn recv(&mut self) -> Option<GatewayResult<Frame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => {
                    return Some(Err(GatewayError::new(GatewayErrorKind::Connection(
                        format!("Failed to read frame: {}", e),
                    ))));
                }
            };
            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                Message::Binary(bytes) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map(Frame::Text)
                            .map_err(|e| {
                                GatewayError::new(GatewayErrorKind::InvalidPayload(format!(
                                    "Binary frame is not UTF-8: {}",
                                    e
                                )))
                            }),
                    );
                }
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(Frame::Close { code, reason }));
                }
                other => trace!(?other, "Ignoring control frame"),
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> GatewayResult<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream.close(Some(frame)).await.map_err(|e| {
            GatewayError::new(GatewayErrorKind::Connection(format!(
                "Failed to close link: {}",
                e
            )))
        })
    }
}
