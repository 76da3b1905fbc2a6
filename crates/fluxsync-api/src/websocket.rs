//! WebSocket streaming transport.
//!
//! Each streamer is one WebSocket connection. The client opens a
//! subscription with a channel list, waits for the server's `ack`, and then
//! reads `frame` messages until the connection drops or is closed.
//!
//! # Example
//!
//! ```rust,ignore
//! use fluxsync_api::{ConnectionConfig, Transport, WebSocketTransport};
//! use url::Url;
//!
//! let config = ConnectionConfig::new(Url::parse("ws://localhost:9090/stream")?);
//! let transport = WebSocketTransport::new(config);
//!
//! let mut streamer = transport.open_streamer(&["sy_node_1_control".into()]).await?;
//! while let Some(frame) = streamer.next().await {
//!     println!("{:?}", frame?.channels());
//! }
//! streamer.close().await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::frame::Frame;
use crate::transport::{Streamer, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── ConnectionConfig ─────────────────────────────────────────────────

/// Where and how to open streamers.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Streaming endpoint, e.g. `ws://localhost:9090/api/v1/frame/stream`.
    pub url: Url,

    /// Optional basic-auth username.
    pub username: Option<String>,

    /// Password paired with `username`.
    pub password: Option<SecretString>,

    /// How long to wait for the server to acknowledge a subscription.
    /// Default: 10s.
    pub open_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            username: None,
            password: None,
            open_timeout: Duration::from_secs(10),
        }
    }

    /// `Authorization` header value, if credentials are configured.
    fn authorization(&self) -> Option<String> {
        let username = self.username.as_deref()?;
        let password = self
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_owned())
            .unwrap_or_default();
        let token = STANDARD.encode(format!("{username}:{password}"));
        Some(format!("Basic {token}"))
    }
}

// ── Wire messages ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage<'a> {
    Open { channels: &'a [String] },
    Update { channels: &'a [String] },
    Close,
}

impl ClientMessage<'_> {
    fn to_message(&self) -> Result<Message, Error> {
        let text = serde_json::to_string(self).map_err(|e| Error::Protocol {
            message: e.to_string(),
            body: String::new(),
        })?;
        Ok(Message::Text(text.into()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerMessage {
    Ack,
    Frame { frame: Frame },
    Error { message: String },
}

fn parse_server_message(text: &str) -> Result<ServerMessage, Error> {
    serde_json::from_str(text).map_err(|e| Error::Protocol {
        message: e.to_string(),
        body: text.to_owned(),
    })
}

/// A refused upgrade keeps its HTTP status; anything else is a plain
/// connect failure.
fn connect_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response) => Error::HandshakeRejected {
            status: response.status().as_u16(),
        },
        other => Error::WebSocketConnect(other.to_string()),
    }
}

fn closed_error(frame: Option<&tungstenite::protocol::CloseFrame>) -> Error {
    match frame {
        Some(cf) => Error::WebSocketClosed {
            code: cf.code.into(),
            reason: cf.reason.as_str().to_owned(),
        },
        None => Error::WebSocketClosed {
            code: 1005,
            reason: "no close payload".into(),
        },
    }
}

// ── WebSocketTransport ───────────────────────────────────────────────

/// [`Transport`] that opens one WebSocket connection per streamer.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    config: ConnectionConfig,
}

impl WebSocketTransport {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn connect(&self) -> Result<WsStream, Error> {
        let url = &self.config.url;
        tracing::info!(url = %url, "Connecting to WebSocket");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(auth) = self.config.authorization() {
            request = request.with_header("Authorization", auth);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(connect_error)?;

        tracing::info!("WebSocket connected");
        Ok(ws_stream)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open_streamer(&self, channels: &[String]) -> Result<Box<dyn Streamer>, Error> {
        let ws_stream = self.connect().await?;
        let (mut sink, mut stream) = ws_stream.split();

        sink.send(ClientMessage::Open { channels }.to_message()?)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let timeout = self.config.open_timeout;
        match tokio::time::timeout(timeout, wait_for_ack(&mut stream)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        tracing::debug!(?channels, "Streamer acknowledged");
        Ok(Box::new(WebSocketStreamer {
            sink,
            stream,
            closed: false,
        }))
    }
}

/// Read until the server acknowledges the subscription.
async fn wait_for_ack(stream: &mut SplitStream<WsStream>) -> Result<(), Error> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match parse_server_message(&text)? {
                ServerMessage::Ack => return Ok(()),
                ServerMessage::Error { message } => return Err(Error::Server { message }),
                ServerMessage::Frame { .. } => {
                    tracing::debug!("Frame received before acknowledgement, dropping");
                }
            },
            Some(Ok(Message::Close(frame))) => return Err(closed_error(frame.as_ref())),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            None => return Err(Error::StreamEnded),
        }
    }
}

// ── WebSocketStreamer ────────────────────────────────────────────────

/// One open WebSocket subscription.
pub struct WebSocketStreamer {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    closed: bool,
}

#[async_trait]
impl Streamer for WebSocketStreamer {
    async fn next(&mut self) -> Option<Result<Frame, Error>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match parse_server_message(&text) {
                    Ok(ServerMessage::Frame { frame }) => return Some(Ok(frame)),
                    Ok(ServerMessage::Error { message }) => {
                        return Some(Err(Error::Server { message }));
                    }
                    // Acks for `update` carry nothing.
                    Ok(ServerMessage::Ack) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed server message");
                    }
                },
                Ok(Message::Ping(_)) => {
                    // tungstenite handles pong replies automatically
                    tracing::trace!("WebSocket ping");
                }
                Ok(Message::Close(frame)) => {
                    if let Some(ref cf) = frame {
                        tracing::info!(
                            code = %cf.code,
                            reason = %cf.reason,
                            "WebSocket close frame received"
                        );
                    }
                    self.closed = true;
                    return Some(Err(closed_error(frame.as_ref())));
                }
                Ok(_) => {
                    // Binary, Pong, Frame -- ignore
                }
                Err(e) => return Some(Err(Error::WebSocketConnect(e.to_string()))),
            }
        }
    }

    async fn update(&mut self, channels: &[String]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::StreamerClosed);
        }
        self.sink
            .send(ClientMessage::Update { channels }.to_message()?)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let sent = self.sink.send(ClientMessage::Close.to_message()?).await;
        let closed = self.sink.close().await;
        sent.and(closed)
            .map_err(|e| Error::WebSocketConnect(e.to_string()))
    }
}
