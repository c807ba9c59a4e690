//! `tonic` based transport implementation.
//!
//! [`AdsService`] serves the Envoy `AggregatedDiscoveryService` delta RPC.
//! Every incoming stream becomes a session on the wrapped
//! [`SessionManager`]. Responses use the version as nonce, so an ack's
//! `response_nonce` names the version being acked.

use std::collections::VecDeque;
use std::pin::Pin;

use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::{
    AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
};
use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::codec::RequestDecoder;
use crate::codec::prost::ProstCodec;
use crate::error::{Error, Result};
use crate::message::ClientMessage;
use crate::reconcile::Delta;
use crate::runtime::Runtime;
use crate::session::SessionManager;
use crate::transport::SessionTransport;

const RESPONSE_CHANNEL_BUFFER_SIZE: usize = 16;

/// Delta ADS over gRPC.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use xds_server::{AdsService, SessionManager, TokioRuntime};
///
/// let manager = SessionManager::new(TokioRuntime);
/// tonic::transport::Server::builder()
///     .add_service(AdsService::new(manager).into_server())
///     .serve("0.0.0.0:18000".parse()?)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct AdsService<R> {
    manager: SessionManager<R>,
    codec: ProstCodec,
}

impl<R: Runtime> AdsService<R> {
    /// Serve sessions through `manager`.
    pub fn new(manager: SessionManager<R>) -> Self {
        Self {
            manager,
            codec: ProstCodec,
        }
    }

    /// The manager running this service's sessions.
    pub fn manager(&self) -> &SessionManager<R> {
        &self.manager
    }

    /// Wrap in the generated tonic server.
    pub fn into_server(self) -> AggregatedDiscoveryServiceServer<Self> {
        AggregatedDiscoveryServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl<R: Runtime> AggregatedDiscoveryService for AdsService<R> {
    type StreamAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;

    async fn stream_aggregated_resources(
        &self,
        _request: Request<Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented(
            "state-of-the-world ADS is not supported, use delta ADS",
        ))
    }

    type DeltaAggregatedResourcesStream =
        ReceiverStream<std::result::Result<DeltaDiscoveryResponse, Status>>;

    async fn delta_aggregated_resources(
        &self,
        request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        let remote_addr = request.remote_addr();
        let mut inbound = request.into_inner();

        // Envoy only sends its node on the first request of a stream.
        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::cancelled("stream closed before the first request"))?;
        let first = self.codec.from_request(first);

        let client_id = first
            .node_id
            .clone()
            .or_else(|| remote_addr.map(|addr| addr.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        let (outbound, responses) = mpsc::channel(RESPONSE_CHANNEL_BUFFER_SIZE);
        let mut decoder = RequestDecoder::new();
        let queued = decoder.decode(first).into();

        let transport = TonicSessionTransport {
            inbound,
            outbound: Some(outbound),
            codec: self.codec,
            decoder,
            queued,
        };
        self.manager.accept(client_id, transport);

        Ok(Response::new(ReceiverStream::new(responses)))
    }
}

/// One delta ADS stream as seen by its session.
#[derive(Debug)]
pub struct TonicSessionTransport {
    inbound: Streaming<DeltaDiscoveryRequest>,
    outbound: Option<mpsc::Sender<std::result::Result<DeltaDiscoveryResponse, Status>>>,
    codec: ProstCodec,
    decoder: RequestDecoder,
    /// Decoded messages not yet handed to the session.
    queued: VecDeque<ClientMessage>,
}

impl SessionTransport for TonicSessionTransport {
    async fn send(&mut self, delta: &Delta) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(Error::StreamClosed)?;
        outbound
            .send(Ok(self.codec.to_versioned_response(delta)))
            .await
            .map_err(|_| Error::StreamClosed)
    }

    async fn recv(&mut self) -> Result<Option<ClientMessage>> {
        loop {
            if let Some(msg) = self.queued.pop_front() {
                return Ok(Some(msg));
            }
            match self.inbound.message().await {
                Ok(Some(request)) => {
                    let request = self.codec.from_request(request);
                    self.queued.extend(self.decoder.decode(request));
                }
                Ok(None) => return Ok(None),
                Err(status) => return Err(Error::Transport(status.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        self.outbound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ContentHash, Resource, TypeUrl};
    use crate::runtime::tokio::TokioRuntime;
    use envoy_types::pb::envoy::config::core::v3::Node;
    use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_client::AggregatedDiscoveryServiceClient;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;

    async fn start_server(service: AdsService<TokioRuntime>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service.into_server())
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        // Give the server a moment to start
        tokio::time::sleep(Duration::from_millis(50)).await;
        addr
    }

    fn request(type_url: &str) -> DeltaDiscoveryRequest {
        DeltaDiscoveryRequest {
            type_url: type_url.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_delta_stream_end_to_end() {
        let manager = SessionManager::new(TokioRuntime);
        manager
            .store()
            .publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "P1")]);
        let addr = start_server(AdsService::new(manager.clone())).await;

        let mut client = AggregatedDiscoveryServiceClient::connect(format!("http://{addr}"))
            .await
            .unwrap();

        let (requests, rx) = mpsc::channel(4);
        requests
            .send(DeltaDiscoveryRequest {
                node: Some(Node {
                    id: "envoy-1".to_string(),
                    ..Default::default()
                }),
                ..request(TypeUrl::ENDPOINT)
            })
            .await
            .unwrap();

        let mut responses = client
            .delta_aggregated_resources(ReceiverStream::new(rx))
            .await
            .unwrap()
            .into_inner();

        let first = responses.message().await.unwrap().unwrap();
        assert_eq!(first.type_url, TypeUrl::ENDPOINT);
        assert_eq!(first.nonce, "1");
        assert_eq!(first.resources.len(), 1);
        assert_eq!(first.resources[0].name, "ep1");

        let ack = DeltaDiscoveryRequest {
            response_nonce: first.nonce.clone(),
            ..request(TypeUrl::ENDPOINT)
        };
        requests.send(ack).await.unwrap();

        manager
            .store()
            .publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "P2")]);

        let second = responses.message().await.unwrap().unwrap();
        assert_eq!(second.nonce, "2");
        assert_eq!(second.resources.len(), 1);
        assert_eq!(second.resources[0].name, "ep1");
        assert_eq!(second.resources[0].version, ContentHash::of(b"P2").to_hex());

        // Closing the request stream ends the session.
        drop(requests);
        for _ in 0..100 {
            if manager.session_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.session_count(), 0);
        assert!(manager.registry().subscribers(TypeUrl::ENDPOINT).is_empty());
    }

    #[tokio::test]
    async fn test_state_of_the_world_is_unimplemented() {
        let manager = SessionManager::new(TokioRuntime);
        let addr = start_server(AdsService::new(manager)).await;

        let mut client = AggregatedDiscoveryServiceClient::connect(format!("http://{addr}"))
            .await
            .unwrap();
        let status = client
            .stream_aggregated_resources(tokio_stream::iter(vec![DiscoveryRequest::default()]))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }
}
