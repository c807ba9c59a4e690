//! Crate-owned protocol message types.
//!
//! These types are independent of any wire format and form the boundary
//! between the session logic and a transport. The codec layer converts them
//! to and from the Envoy delta discovery protos.

use crate::registry::Subscription;
use crate::resource::TypeUrl;
use crate::version::Version;

/// A message from a client to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Replace the client's interest in a resource type.
    Subscribe {
        /// The resource type.
        type_url: TypeUrl,
        /// The names of interest, or a wildcard.
        subscription: Subscription,
    },
    /// Drop all interest in a resource type.
    Unsubscribe {
        /// The resource type.
        type_url: TypeUrl,
    },
    /// Accept or reject a version sent by the server.
    Ack(AckRecord),
}

impl ClientMessage {
    /// Subscribe to every resource of a type.
    pub fn subscribe_all(type_url: impl Into<TypeUrl>) -> Self {
        Self::Subscribe {
            type_url: type_url.into(),
            subscription: Subscription::Wildcard,
        }
    }

    /// Accept `version` of a type.
    pub fn ack(type_url: impl Into<TypeUrl>, version: Version) -> Self {
        Self::Ack(AckRecord {
            type_url: type_url.into(),
            version,
            result: AckResult::Accepted,
        })
    }

    /// Reject `version` of a type.
    pub fn nack(type_url: impl Into<TypeUrl>, version: Version, message: impl Into<String>) -> Self {
        Self::Ack(AckRecord {
            type_url: type_url.into(),
            version,
            result: AckResult::Rejected(ErrorDetail {
                code: 3, // INVALID_ARGUMENT
                message: message.into(),
            }),
        })
    }
}

/// A client's response to a pushed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    /// The resource type.
    pub type_url: TypeUrl,
    /// The version being acknowledged.
    pub version: Version,
    /// Whether the client applied it.
    pub result: AckResult,
}

impl AckRecord {
    /// Returns true for an ack, false for a nack.
    pub fn is_accepted(&self) -> bool {
        matches!(self.result, AckResult::Accepted)
    }
}

/// Outcome reported by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckResult {
    /// The client applied the version.
    Accepted,
    /// The client rejected the version and keeps its previous state.
    Rejected(ErrorDetail),
}

/// Error details attached to a nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// gRPC status code.
    pub code: i32,
    /// Error message.
    pub message: String,
}

/// A delta discovery request as received from the wire.
///
/// Subscription changes here are incremental; the [`RequestDecoder`]
/// folds them into the full interest sets carried by [`ClientMessage`].
///
/// [`RequestDecoder`]: crate::codec::RequestDecoder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaRequest {
    /// Identifier of the node making the request, if given.
    pub node_id: Option<String>,
    /// Type URL of the resources concerned.
    pub type_url: String,
    /// Names to add to the interest set. `"*"` adds the wildcard.
    pub resource_names_subscribe: Vec<String>,
    /// Names to drop from the interest set. `"*"` drops the wildcard.
    pub resource_names_unsubscribe: Vec<String>,
    /// Nonce of the response being acked or nacked, empty if none.
    pub response_nonce: String,
    /// Present when the request is a nack.
    pub error_detail: Option<ErrorDetail>,
}
