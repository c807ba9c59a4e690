//! Error types for the xDS server.

use thiserror::Error;

use crate::resource::TypeUrl;
use crate::version::Version;

/// Error type for the xDS server.
///
/// Every variant is scoped to a single session or a single call. None of
/// them is fatal to the process.
#[derive(Debug, Error)]
pub enum Error {
    /// An ack or nack named a version that was never sent to the session.
    #[error("ack references unknown version {version} of {type_url}")]
    UnknownVersionAck {
        /// The acked resource type.
        type_url: TypeUrl,
        /// The version named by the client.
        version: Version,
    },

    /// Unsubscribe for a type the session never subscribed to.
    #[error("no subscription for {type_url}")]
    SubscriptionNotFound {
        /// The resource type.
        type_url: TypeUrl,
    },

    /// The client kept rejecting the same resource type.
    #[error("{type_url} rejected {attempts} times, giving up")]
    RetryCeilingExceeded {
        /// The rejected resource type.
        type_url: TypeUrl,
        /// Number of consecutive nacks.
        attempts: usize,
    },

    /// Sending to or receiving from the client failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer closed the stream.
    #[error("stream closed")]
    StreamClosed,

    /// The session was cancelled from the server side.
    #[error("session cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type alias for xDS server operations.
pub type Result<T> = std::result::Result<T, Error>;
