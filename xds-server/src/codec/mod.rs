//! Conversions between the wire protocol and session messages.
//!
//! Delta discovery requests change a client's interest incrementally and
//! piggyback acks on the same message. The [`RequestDecoder`] keeps the
//! per-stream interest state and turns each [`DeltaRequest`] into the
//! [`ClientMessage`]s a session understands. Conversion to and from the
//! Envoy protos lives in `ProstCodec` (feature `codegen-prost`).

use std::collections::{BTreeSet, HashMap};

use crate::message::{AckRecord, AckResult, ClientMessage, DeltaRequest};
use crate::registry::Subscription;
use crate::resource::TypeUrl;
use crate::version::Version;

#[cfg(feature = "codegen-prost")]
pub mod prost;

/// Resource name that stands for "every resource of the type".
pub const WILDCARD: &str = "*";

/// The nonce identifying a response that carries `version`.
///
/// Acks echo it back, so [`RequestDecoder`] parses it as a version.
pub fn nonce_for(version: Version) -> String {
    version.to_string()
}

/// Interest in one type as accumulated over a stream.
#[derive(Debug, Default)]
struct Interest {
    wildcard: bool,
    names: BTreeSet<String>,
    /// What the session was last told.
    current: Option<Subscription>,
}

impl Interest {
    fn subscription(&self) -> Option<Subscription> {
        if self.wildcard {
            Some(Subscription::Wildcard)
        } else if self.names.is_empty() {
            None
        } else {
            Some(Subscription::Named(self.names.clone()))
        }
    }
}

/// Folds incremental delta requests into session messages.
///
/// One decoder per client stream.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    interest: HashMap<TypeUrl, Interest>,
}

impl RequestDecoder {
    /// A decoder for a new stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one request.
    ///
    /// An ack or nack, if present, comes first, followed by at most one
    /// subscription change. The first request for a type with no names
    /// subscribes to the whole type.
    pub fn decode(&mut self, request: DeltaRequest) -> Vec<ClientMessage> {
        let mut messages = Vec::new();

        if request.type_url.is_empty() {
            tracing::warn!("ignoring delta request without a type url");
            return messages;
        }
        let type_url = TypeUrl::from(request.type_url);

        if !request.response_nonce.is_empty() {
            match request.response_nonce.parse::<Version>() {
                Ok(version) => {
                    let result = match request.error_detail {
                        Some(detail) => AckResult::Rejected(detail),
                        None => AckResult::Accepted,
                    };
                    messages.push(ClientMessage::Ack(AckRecord {
                        type_url: type_url.clone(),
                        version,
                        result,
                    }));
                }
                Err(_) => {
                    tracing::warn!(
                        %type_url,
                        nonce = %request.response_nonce,
                        "ignoring ack with malformed nonce"
                    );
                }
            }
        }

        let first = !self.interest.contains_key(type_url.as_str());
        let unchanged = request.resource_names_subscribe.is_empty()
            && request.resource_names_unsubscribe.is_empty();
        if !first && unchanged {
            return messages;
        }

        let interest = self.interest.entry(type_url.clone()).or_default();
        if first && request.resource_names_subscribe.is_empty() {
            interest.wildcard = true;
        }
        for name in request.resource_names_subscribe {
            if name == WILDCARD {
                interest.wildcard = true;
            } else {
                interest.names.insert(name);
            }
        }
        for name in &request.resource_names_unsubscribe {
            if name == WILDCARD {
                interest.wildcard = false;
            } else {
                interest.names.remove(name);
            }
        }

        let next = interest.subscription();
        if next == interest.current {
            return messages;
        }
        interest.current.clone_from(&next);
        messages.push(match next {
            Some(subscription) => ClientMessage::Subscribe {
                type_url,
                subscription,
            },
            None => ClientMessage::Unsubscribe { type_url },
        });
        messages
    }
}
