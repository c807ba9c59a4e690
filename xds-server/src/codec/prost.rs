//! Prost-based codec using envoy-types.

use envoy_types::pb::envoy::service::discovery::v3 as discovery;
use envoy_types::pb::google::protobuf::Any;

use crate::codec::nonce_for;
use crate::message::{DeltaRequest, ErrorDetail};
use crate::reconcile::Delta;

/// A codec that uses prost/envoy-types for serialization.
///
/// Each resource's payload is sent as the value of a `google.protobuf.Any`
/// tagged with the delta's type URL, and its content hash (hex) as the
/// resource version.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProstCodec;

impl ProstCodec {
    /// Build the envoy response for `delta`.
    pub fn to_response(&self, delta: &Delta, nonce: &str) -> discovery::DeltaDiscoveryResponse {
        let type_url = delta.type_url.to_string();
        let resources = delta
            .added
            .iter()
            .chain(&delta.updated)
            .map(|resource| discovery::Resource {
                name: resource.name().to_owned(),
                version: resource.hash().to_hex(),
                resource: Some(Any {
                    type_url: type_url.clone(),
                    value: resource.payload().to_vec(),
                }),
                ..Default::default()
            })
            .collect();

        discovery::DeltaDiscoveryResponse {
            system_version_info: delta.version.to_string(),
            resources,
            type_url,
            removed_resources: delta.removed.clone(),
            nonce: nonce.to_owned(),
            ..Default::default()
        }
    }

    /// Build the envoy response for `delta` with the nonce derived from its
    /// version.
    pub fn to_versioned_response(&self, delta: &Delta) -> discovery::DeltaDiscoveryResponse {
        self.to_response(delta, &nonce_for(delta.version))
    }

    /// Convert an envoy request.
    pub fn from_request(&self, request: discovery::DeltaDiscoveryRequest) -> DeltaRequest {
        DeltaRequest {
            node_id: request.node.map(|node| node.id).filter(|id| !id.is_empty()),
            type_url: request.type_url,
            resource_names_subscribe: request.resource_names_subscribe,
            resource_names_unsubscribe: request.resource_names_unsubscribe,
            response_nonce: request.response_nonce,
            error_detail: request.error_detail.map(|status| ErrorDetail {
                code: status.code,
                message: status.message,
            }),
        }
    }
}
