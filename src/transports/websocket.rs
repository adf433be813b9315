//! Signaling over a WebSocket, using `tokio-tungstenite`.
//!
//! Available with the `transport-websocket` feature (on by default). `ws://`
//! and `wss://` URLs both work.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), channel_express::ChannelExpressError> {
//! use channel_express::{SignalingClient, SignalingConfig, WebSocketTransport};
//!
//! let transport = WebSocketTransport::connect("wss://signaling.example.com/ws").await?;
//! let client = SignalingClient::start(transport, SignalingConfig::new("my-application"));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};

use crate::error::ChannelExpressError;
use crate::transport::Transport;

/// The WebSocket stream type produced by [`WebSocketTransport::connect`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn connect_error(e: WsError) -> ChannelExpressError {
    let kind = match &e {
        WsError::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    ChannelExpressError::Io(std::io::Error::new(kind, e))
}

/// [`Transport`] over one WebSocket connection.
///
/// Each signaling message travels in one frame. Text frames are passed
/// through; binary frames are accepted when they hold valid UTF-8. `recv` is
/// cancel-safe.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Connect to the signaling endpoint at `url`.
    ///
    /// # Errors
    ///
    /// [`ChannelExpressError::Io`] if the URL is invalid or the handshake
    /// fails. I/O error kinds are preserved.
    pub async fn connect(url: &str) -> Result<Self, ChannelExpressError> {
        debug!(%url, "connecting to signaling endpoint");
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(connect_error)?;
        info!(%url, status = %response.status(), "signaling connection established");
        Ok(Self::from_stream(stream))
    }

    /// Like [`connect`](Self::connect), failing with
    /// [`ChannelExpressError::Timeout`] after `timeout`.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: Duration,
    ) -> Result<Self, ChannelExpressError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| ChannelExpressError::Timeout)?
    }

    /// Wrap a stream set up elsewhere (custom TLS, proxies, extra headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Returns `true` after [`close`](Transport::close) or once the service
    /// closed the connection.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), ChannelExpressError> {
        if self.closed {
            return Err(ChannelExpressError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| ChannelExpressError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelExpressError>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "signaling endpoint closed the connection");
                    self.closed = true;
                    return None;
                }
                // Pongs are queued by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                    self.closed = true;
                    return None;
                }
                Err(e) => return Some(Err(ChannelExpressError::TransportReceive(e.to_string()))),
            }
        }
        self.closed = true;
        None
    }

    async fn close(&mut self) -> Result<(), ChannelExpressError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client shut down".into(),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ChannelExpressError::TransportSend(e.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;

    /// Serve exactly one WebSocket connection with `service`.
    async fn serve_once<F, Fut>(service: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            service(tokio_tungstenite::accept_async(tcp).await.unwrap()).await;
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn invalid_url_is_an_io_error() {
        let err = WebSocketTransport::connect("signaling").await.unwrap_err();
        assert!(matches!(err, ChannelExpressError::Io(_)));
    }

    #[tokio::test]
    async fn unanswered_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted_tx, accepted_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            // Accept the connection but never answer the handshake.
            let (tcp, _) = listener.accept().await.unwrap();
            let _ = accepted_tx.send(());
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(tcp);
        });

        let err = WebSocketTransport::connect_with_timeout(
            &format!("ws://{addr}"),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChannelExpressError::Timeout), "{err}");
        assert!(accepted_rx.await.is_ok());
    }

    #[tokio::test]
    async fn text_and_utf8_binary_frames_are_delivered() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Text(r#"{"type":"pcast.StreamEnded"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Binary(vec![0xFF, 0xFE].into()))
                .await
                .unwrap();
            ws.send(Message::Binary(br#"{"type":"chat.RoomEvent"}"#.to_vec().into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"type":"pcast.StreamEnded"}"#
        );
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"type":"chat.RoomEvent"}"#
        );
        assert!(transport.recv().await.is_none());
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn close_sends_normal_close_frame() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let url = serve_once(|mut ws| async move {
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Close(Some(close)) = frame {
                    let _ = seen_tx.send(close.code);
                    break;
                }
            }
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(seen_rx.await.unwrap(), CloseCode::Normal);
        assert!(matches!(
            transport.send("{}".into()).await.unwrap_err(),
            ChannelExpressError::TransportClosed
        ));
    }

    #[tokio::test]
    async fn requests_reach_the_service() {
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let reply = text.replace("pcast.Authenticate", "pcast.AuthenticateResponse");
                ws.send(Message::Text(reply.into())).await.unwrap();
            }
        })
        .await;

        let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let mut transport = WebSocketTransport::from_stream(stream);
        transport
            .send(r#"{"type":"pcast.Authenticate"}"#.into())
            .await
            .unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"type":"pcast.AuthenticateResponse"}"#
        );
    }
}
