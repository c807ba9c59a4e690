//! Serves a fixed snapshot over delta ADS.
//!
//! Publishes one listener, route, cluster and endpoint, all named
//! `greeter-s003`, pointing at a gRPC greeter on `127.0.0.1:9991`, then
//! serves any number of xDS clients until interrupted.
//!
//! # Configuration (environment variables)
//!
//! - `XDS_LISTEN_ADDR`: Address to serve on (default: `0.0.0.0:18000`)
//! - `RUST_LOG`: Log filter (e.g. `xds_server=debug`)
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=xds_server=debug cargo run -p xds-server --example static_snapshot
//! ```

use std::net::SocketAddr;

use envoy_types::pb::envoy::config::cluster::v3::{Cluster, cluster};
use envoy_types::pb::envoy::config::core::v3::{
    Address, AggregatedConfigSource, ConfigSource, Locality, SocketAddress, address,
    config_source, socket_address,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints, lb_endpoint,
};
use envoy_types::pb::envoy::config::listener::v3::{ApiListener, Listener};
use envoy_types::pb::envoy::config::route::v3::{
    Route, RouteAction, RouteConfiguration, RouteMatch, VirtualHost, route, route_action,
    route_match,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    HttpConnectionManager, HttpFilter, http_connection_manager::RouteSpecifier, http_filter,
};
use envoy_types::pb::google::protobuf::{Any, UInt32Value};
use prost::Message;
use tracing_subscriber::EnvFilter;

use xds_server::{AdsService, Resource, ResourceSet, SessionManager, TokioRuntime, TypeUrl};

const SERVICE_NAME: &str = "greeter-s003";
const UPSTREAM_HOST: &str = "127.0.0.1";
const UPSTREAM_PORT: u32 = 9991;

const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
const HCM_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";

fn any<M: Message>(type_url: &str, message: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

fn route_config() -> RouteConfiguration {
    RouteConfiguration {
        name: SERVICE_NAME.to_string(),
        virtual_hosts: vec![VirtualHost {
            name: SERVICE_NAME.to_string(),
            domains: vec!["*".to_string()],
            routes: vec![Route {
                name: "default".to_string(),
                r#match: Some(RouteMatch {
                    path_specifier: Some(route_match::PathSpecifier::Prefix(String::new())),
                    ..Default::default()
                }),
                action: Some(route::Action::Route(RouteAction {
                    cluster_specifier: Some(route_action::ClusterSpecifier::Cluster(
                        SERVICE_NAME.to_string(),
                    )),
                    ..Default::default()
                })),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn listener() -> Listener {
    let manager = HttpConnectionManager {
        http_filters: vec![HttpFilter {
            name: "envoy.filters.http.router".to_string(),
            config_type: Some(http_filter::ConfigType::TypedConfig(any(
                ROUTER_TYPE_URL,
                &Router::default(),
            ))),
            ..Default::default()
        }],
        route_specifier: Some(RouteSpecifier::RouteConfig(route_config())),
        ..Default::default()
    };

    Listener {
        name: SERVICE_NAME.to_string(),
        api_listener: Some(ApiListener {
            api_listener: Some(any(HCM_TYPE_URL, &manager)),
        }),
        ..Default::default()
    }
}

fn eds_cluster() -> Cluster {
    Cluster {
        name: SERVICE_NAME.to_string(),
        cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
            cluster::DiscoveryType::Eds as i32,
        )),
        lb_policy: cluster::LbPolicy::RoundRobin as i32,
        eds_cluster_config: Some(cluster::EdsClusterConfig {
            eds_config: Some(ConfigSource {
                config_source_specifier: Some(config_source::ConfigSourceSpecifier::Ads(
                    AggregatedConfigSource {},
                )),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn load_assignment() -> ClusterLoadAssignment {
    let endpoint = Endpoint {
        address: Some(Address {
            address: Some(address::Address::SocketAddress(SocketAddress {
                protocol: socket_address::Protocol::Tcp as i32,
                address: UPSTREAM_HOST.to_string(),
                port_specifier: Some(socket_address::PortSpecifier::PortValue(UPSTREAM_PORT)),
                ..Default::default()
            })),
        }),
        ..Default::default()
    };

    ClusterLoadAssignment {
        cluster_name: SERVICE_NAME.to_string(),
        endpoints: vec![LocalityLbEndpoints {
            load_balancing_weight: Some(UInt32Value { value: 1 }),
            locality: Some(Locality::default()),
            lb_endpoints: vec![LbEndpoint {
                host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(endpoint)),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn snapshot() -> ResourceSet {
    let resource = |message: Vec<u8>| Resource::new(SERVICE_NAME, message);

    ResourceSet::new()
        .with_resources(TypeUrl::listener(), vec![resource(listener().encode_to_vec())])
        .with_resources(TypeUrl::route(), vec![resource(route_config().encode_to_vec())])
        .with_resources(TypeUrl::cluster(), vec![resource(eds_cluster().encode_to_vec())])
        .with_resources(
            TypeUrl::endpoint(),
            vec![resource(load_assignment().encode_to_vec())],
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = std::env::var("XDS_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:18000".to_string())
        .parse()?;

    let manager = SessionManager::new(TokioRuntime);
    for (type_url, version) in manager.store().publish_set(snapshot()) {
        println!("published {type_url} v{version}");
    }

    println!("serving delta ADS on {addr}");
    tonic::transport::Server::builder()
        .add_service(AdsService::new(manager).into_server())
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
