//! Connection Module
//!
//! Owns the WebSocket lifecycle. Opening a connection spawns one receive task
//! that forwards every non-empty text frame to an [`InboundHandler`] while the
//! caller keeps the write half for sending. Supports both TLS and non-TLS
//! endpoints using tokio-tungstenite.
//!
//! The receive task is tied to a cancellation token: closing the connection,
//! a read error, or the peer closing all cancel it, and [`Connection::close`]
//! waits for the task to finish before returning.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection error types
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("Invalid header {0:?}")]
    InvalidHeader(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection is closed")]
    Closed,
}

/// Receiver of inbound application frames
pub trait InboundHandler: Send + Sync + 'static {
    fn on_inbound(&self, frame: &str);
}

/// State shared between the owner and the receive task
struct Shared {
    writer: Mutex<SplitSink<WsStream, Message>>,
    open: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    /// Mark the connection closed. Only the first caller sends the close frame.
    async fn shutdown(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(None)).await {
            log::debug!("Close frame not delivered: {}", e);
        }
    }
}

/// One open WebSocket session
pub struct Connection {
    shared: Arc<Shared>,
    receiver: Option<JoinHandle<()>>,
}

impl Connection {
    /// Connect to `url`, attaching each `"Name: value"` header, and start the
    /// receive task feeding `handler`.
    pub async fn open(
        url: &str,
        headers: &[String],
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Self, ConnectionError> {
        let request = build_request(url, headers)?;
        log::debug!("Connecting to {}", url);

        let ws_stream = if url.starts_with("wss://") {
            connect_tls(request).await?
        } else {
            let (ws_stream, _) = connect_async(request).await?;
            ws_stream
        };

        let (write, read) = ws_stream.split();
        let shared = Arc::new(Shared {
            writer: Mutex::new(write),
            open: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        });
        let receiver = tokio::spawn(receive_loop(read, Arc::clone(&shared), handler));

        Ok(Self {
            shared,
            receiver: Some(receiver),
        })
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Write one text frame. A failed write closes the connection.
    pub async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }

        let result = self.shared.writer.lock().await.send(Message::Text(text)).await;
        if let Err(e) = result {
            log::error!("Failed to write to connection: {}", e);
            self.shared.shutdown().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the connection and wait for the receive task to exit.
    ///
    /// Safe to call any number of times.
    pub async fn close(&mut self) {
        self.shared.shutdown().await;

        if let Some(receiver) = self.receiver.take() {
            if let Err(e) = receiver.await {
                log::warn!("Receive task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.open.store(false, Ordering::Release);
        self.shared.cancel.cancel();
    }
}

/// Connect with TLS
async fn connect_tls(request: Request) -> Result<WsStream, ConnectionError> {
    let connector = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| ConnectionError::Tls(e.to_string()))?;

    let (ws_stream, _) = tokio_tungstenite::connect_async_tls_with_config(
        request,
        None,
        false,
        Some(tokio_tungstenite::Connector::NativeTls(connector)),
    )
    .await?;

    Ok(ws_stream)
}

/// Build the handshake request with the extra headers applied
pub(crate) fn build_request(url: &str, headers: &[String]) -> Result<Request, ConnectionError> {
    let mut request = url.into_client_request()?;

    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| ConnectionError::InvalidHeader(header.clone()))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| ConnectionError::InvalidHeader(header.clone()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| ConnectionError::InvalidHeader(header.clone()))?;
        request.headers_mut().append(name, value);
    }

    Ok(request)
}

async fn receive_loop(
    mut read: SplitStream<WsStream>,
    shared: Arc<Shared>,
    handler: Arc<dyn InboundHandler>,
) {
    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            next = read.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                // Empty frames are keepalives, not application messages.
                if !text.is_empty() {
                    handler.on_inbound(&text);
                }
            }
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) if !text.is_empty() => handler.on_inbound(text),
                Ok(_) => {}
                Err(_) => log::debug!("Ignoring non UTF-8 binary frame ({} bytes)", data.len()),
            },
            Some(Ok(Message::Close(frame))) => {
                log::debug!("Connection closed by peer: {:?}", frame);
                break;
            }
            // Ping, Pong and raw frames
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::error!("Receive loop failed: {}", e);
                break;
            }
            None => break,
        }
    }

    shared.shutdown().await;
}
