//! Transports connecting a client stream to a session.
//!
//! A session only sees [`SessionTransport`]: it sends [`Delta`]s and reads
//! [`ClientMessage`]s. Wire encoding lives in the implementation.
//!
//! - [`channel`]: in-process transport over `tokio` channels.
//! - `tonic`: delta ADS over gRPC (feature `transport-tonic`).

use std::future::Future;

use crate::error::Result;
use crate::message::ClientMessage;
use crate::reconcile::Delta;

pub mod channel;

#[cfg(feature = "transport-tonic")]
pub mod tonic;

/// One bidirectional client stream.
pub trait SessionTransport: Send + 'static {
    /// Push a delta to the client.
    ///
    /// Returning `Ok` means the delta was handed off; it says nothing about
    /// whether the client applied it.
    fn send(&mut self, delta: &Delta) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next client message.
    ///
    /// Returns:
    /// - `Ok(Some(msg))` - Received a message.
    /// - `Ok(None)` - The client closed the stream.
    /// - `Err(_)` - The stream failed.
    fn recv(&mut self) -> impl Future<Output = Result<Option<ClientMessage>>> + Send;

    /// Release the stream. Called once when the session closes.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
