//! Transport abstraction for the signaling connection.
//!
//! The [`Transport`] trait defines a bidirectional text message channel between
//! the client and the signaling service. Every message is one JSON document, so
//! implementations handle framing internally (WebSocket frames, length-prefixed
//! TCP, in-process channels in tests).
//!
//! # Connection Setup
//!
//! Connecting is NOT part of this trait. Construct a connected transport
//! externally, then hand it to [`SignalingClient::start`](crate::client::SignalingClient::start).
//! Reconnecting a dropped connection is likewise the transport's own business.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use channel_express::error::ChannelExpressError;
//! use channel_express::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ChannelExpressError> {
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ChannelExpressError>> {
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ChannelExpressError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ChannelExpressError;

/// A bidirectional text message transport for the signaling protocol.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the client polls it
/// inside `tokio::select!`. Channel-based implementations are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON text message to the service.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelExpressError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), ChannelExpressError>;

    /// Receive the next JSON text message from the service.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly
    async fn recv(&mut self) -> Option<Result<String, ChannelExpressError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), ChannelExpressError>;
}
