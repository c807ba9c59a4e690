//! Session lifecycle events.
//!
//! Every session reports connects, disconnects, pushes and client
//! responses to an [`Observer`]. The default [`TracingObserver`] turns them
//! into `tracing` events; embedders can plug in their own to feed metrics.

use std::fmt;

use crate::resource::TypeUrl;
use crate::session::SessionId;
use crate::version::Version;

/// Something that happened on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A client connected.
    SessionConnected {
        /// The new session.
        session: SessionId,
        /// The identifier the client presented.
        client_id: String,
    },
    /// A session finished closing.
    SessionClosed {
        /// The closed session.
        session: SessionId,
        /// Why it closed, if it was not a clean disconnect.
        reason: Option<String>,
    },
    /// A delta was handed to the transport.
    DeltaSent {
        /// The receiving session.
        session: SessionId,
        /// The resource type.
        type_url: TypeUrl,
        /// The version the delta brings the client to.
        version: Version,
        /// Number of added resources.
        added: usize,
        /// Number of updated resources.
        updated: usize,
        /// Number of removed names.
        removed: usize,
    },
    /// A client accepted a version.
    AckReceived {
        /// The acking session.
        session: SessionId,
        /// The resource type.
        type_url: TypeUrl,
        /// The accepted version.
        version: Version,
    },
    /// A client rejected a version.
    NackReceived {
        /// The nacking session.
        session: SessionId,
        /// The resource type.
        type_url: TypeUrl,
        /// The rejected version.
        version: Version,
        /// The error reported by the client.
        message: String,
    },
}

/// Receives [`SessionEvent`]s.
///
/// Called inline on the session task, so implementations must not block.
pub trait Observer: Send + Sync + 'static {
    /// Handle one event.
    fn on_event(&self, event: &SessionEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::SessionConnected { session, client_id } => {
                tracing::info!(%session, %client_id, "session connected");
            }
            SessionEvent::SessionClosed {
                session,
                reason: None,
            } => {
                tracing::info!(%session, "session closed");
            }
            SessionEvent::SessionClosed {
                session,
                reason: Some(reason),
            } => {
                tracing::warn!(%session, %reason, "session closed");
            }
            SessionEvent::DeltaSent {
                session,
                type_url,
                version,
                added,
                updated,
                removed,
            } => {
                tracing::debug!(
                    %session,
                    %type_url,
                    %version,
                    added,
                    updated,
                    removed,
                    "delta sent"
                );
            }
            SessionEvent::AckReceived {
                session,
                type_url,
                version,
            } => {
                tracing::debug!(%session, %type_url, %version, "ack received");
            }
            SessionEvent::NackReceived {
                session,
                type_url,
                version,
                message,
            } => {
                tracing::warn!(%session, %type_url, %version, %message, "nack received");
            }
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionConnected { session, client_id } => {
                write!(f, "session {session} connected ({client_id})")
            }
            Self::SessionClosed { session, reason } => match reason {
                Some(reason) => write!(f, "session {session} closed: {reason}"),
                None => write!(f, "session {session} closed"),
            },
            Self::DeltaSent {
                session,
                type_url,
                version,
                added,
                updated,
                removed,
            } => write!(
                f,
                "session {session} sent {type_url} v{version} (+{added} ~{updated} -{removed})"
            ),
            Self::AckReceived {
                session,
                type_url,
                version,
            } => write!(f, "session {session} acked {type_url} v{version}"),
            Self::NackReceived {
                session,
                type_url,
                version,
                message,
            } => write!(f, "session {session} nacked {type_url} v{version}: {message}"),
        }
    }
}
