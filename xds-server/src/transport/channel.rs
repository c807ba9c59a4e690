//! In-process transport over `tokio` channels.
//!
//! Useful for embedding the server next to its clients and for tests: the
//! [`ClientEnd`] plays the client, the [`ChannelTransport`] is handed to
//! [`SessionManager::accept`](crate::SessionManager::accept).

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::ClientMessage;
use crate::reconcile::Delta;
use crate::registry::Subscription;
use crate::resource::TypeUrl;
use crate::transport::SessionTransport;

/// Create a connected transport pair. `buffer` bounds each direction.
pub fn channel(buffer: usize) -> (ChannelTransport, ClientEnd) {
    let (delta_tx, delta_rx) = mpsc::channel(buffer);
    let (message_tx, message_rx) = mpsc::channel(buffer);

    (
        ChannelTransport {
            deltas: Some(delta_tx),
            messages: message_rx,
        },
        ClientEnd {
            messages: message_tx,
            deltas: delta_rx,
        },
    )
}

/// Server side of an in-process stream.
#[derive(Debug)]
pub struct ChannelTransport {
    deltas: Option<mpsc::Sender<Delta>>,
    messages: mpsc::Receiver<ClientMessage>,
}

impl SessionTransport for ChannelTransport {
    async fn send(&mut self, delta: &Delta) -> Result<()> {
        let deltas = self.deltas.as_ref().ok_or(Error::StreamClosed)?;
        deltas
            .send(delta.clone())
            .await
            .map_err(|_| Error::StreamClosed)
    }

    async fn recv(&mut self) -> Result<Option<ClientMessage>> {
        Ok(self.messages.recv().await)
    }

    async fn close(&mut self) {
        self.deltas = None;
        self.messages.close();
    }
}

/// Client side of an in-process stream.
///
/// Dropping it ends the session.
#[derive(Debug)]
pub struct ClientEnd {
    messages: mpsc::Sender<ClientMessage>,
    deltas: mpsc::Receiver<Delta>,
}

impl ClientEnd {
    /// Send a raw message to the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] once the session has closed.
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.messages
            .send(msg)
            .await
            .map_err(|_| Error::StreamClosed)
    }

    /// Replace the interest set for a type.
    pub async fn subscribe(
        &self,
        type_url: impl Into<TypeUrl>,
        subscription: Subscription,
    ) -> Result<()> {
        self.send(ClientMessage::Subscribe {
            type_url: type_url.into(),
            subscription,
        })
        .await
    }

    /// Subscribe to every resource of a type.
    pub async fn subscribe_all(&self, type_url: impl Into<TypeUrl>) -> Result<()> {
        self.send(ClientMessage::subscribe_all(type_url)).await
    }

    /// Drop interest in a type.
    pub async fn unsubscribe(&self, type_url: impl Into<TypeUrl>) -> Result<()> {
        self.send(ClientMessage::Unsubscribe {
            type_url: type_url.into(),
        })
        .await
    }

    /// Accept a received delta.
    pub async fn ack(&self, delta: &Delta) -> Result<()> {
        self.send(ClientMessage::ack(delta.type_url.clone(), delta.version))
            .await
    }

    /// Reject a received delta.
    pub async fn nack(&self, delta: &Delta, message: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::nack(
            delta.type_url.clone(),
            delta.version,
            message,
        ))
        .await
    }

    /// Wait for the next delta. `None` once the session has closed.
    pub async fn recv(&mut self) -> Option<Delta> {
        self.deltas.recv().await
    }

    /// The next delta if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delta> {
        self.deltas.try_recv().ok()
    }
}
