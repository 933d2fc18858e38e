//! Duplex channel to a node.
//!
//! [`Transport::open`] starts a connection attempt and immediately returns a
//! [`SocketHandle`]: frames to write go into `outbound`, and everything the
//! socket does (open, text messages, close, errors) comes back on `events` in
//! arrival order. The node never touches the WebSocket directly, which keeps
//! it testable with an in-memory transport.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::{Error, Result};

/// Close code used when the socket dies without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// What to connect to.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// A frame written to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Something that happened on the socket.
#[derive(Debug)]
pub enum SocketEvent {
    Open,
    Message(String),
    Close { code: u16, reason: String },
    Error(Error),
}

pub struct SocketHandle {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Opens duplex channels.
pub trait Transport: Send + Sync {
    /// Starts connecting. Errors here mean the request itself was unusable;
    /// network failures are reported later as [`SocketEvent::Error`] followed by
    /// [`SocketEvent::Close`].
    fn open(&self, request: ConnectRequest) -> Result<SocketHandle>;
}

/// Default transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
    fn open(&self, request: ConnectRequest) -> Result<SocketHandle> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(Box::new)?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::validation(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::validation(format!("invalid header value for {name}: {e}")))?;
            ws_request.headers_mut().insert(name, value);
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<SocketEvent>();
        let url = request.url;

        tokio::spawn(async move {
            debug!("🔌 Conectando a {}", url);
            let ws = match connect_async(ws_request).await {
                Ok((ws, response)) => {
                    trace!(status = ?response.status(), "WebSocket handshake");
                    ws
                }
                Err(e) => {
                    error!("❌ Error conectando a {}: {}", url, e);
                    let _ = events_tx.send(SocketEvent::Error(Error::from(Box::new(e))));
                    let _ = events_tx.send(SocketEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    });
                    return;
                }
            };

            let (mut write, mut read) = ws.split();
            let _ = events_tx.send(SocketEvent::Open);

            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => match frame {
                        Some(Frame::Text(text)) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                warn!("⚠️ Error enviando frame: {}", e);
                                let _ = events_tx.send(SocketEvent::Error(Error::from(Box::new(e))));
                            }
                        }
                        Some(Frame::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            };
                            let _ = write.send(Message::Close(Some(frame))).await;
                            break;
                        }
                        // Node dropped the handle.
                        None => {
                            let _ = write.close().await;
                            break;
                        }
                    },
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let _ = events_tx.send(SocketEvent::Message(text.to_string()));
                        }
                        Some(Ok(Message::Binary(data))) => {
                            match String::from_utf8(data.to_vec()) {
                                Ok(text) => {
                                    let _ = events_tx.send(SocketEvent::Message(text));
                                }
                                Err(_) => trace!("Frame binario ignorado"),
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((ABNORMAL_CLOSURE, String::new()));
                            let _ = events_tx.send(SocketEvent::Close { code, reason });
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = events_tx.send(SocketEvent::Error(Error::from(Box::new(e))));
                            let _ = events_tx.send(SocketEvent::Close {
                                code: ABNORMAL_CLOSURE,
                                reason: String::new(),
                            });
                            break;
                        }
                        None => {
                            let _ = events_tx.send(SocketEvent::Close {
                                code: ABNORMAL_CLOSURE,
                                reason: String::new(),
                            });
                            break;
                        }
                    },
                }
            }
            debug!("🔌 Socket cerrado: {}", url);
        });

        Ok(SocketHandle {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}
