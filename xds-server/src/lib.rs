//! A Rust implementation of an aggregated [xDS](https://www.envoyproxy.io/docs/envoy/latest/api-docs/xds_protocol) control-plane core.
//!
//! This crate serves versioned resource snapshots to many long-lived client
//! streams over a single aggregated channel. It handles:
//! - Versioned, per-type resource snapshots with atomic publish
//! - Per-session subscriptions (wildcard or named)
//! - Minimal add/update/remove deltas computed against what each client
//!   has acknowledged
//! - ACK/NACK tracking with exponential backoff on rejection
//!
//! It does NOT contain:
//! - Resource validation or cross-type dependency resolution
//! - Persistence of snapshots
//! - Authentication of clients
//!
//! Resources are opaque payloads. A publisher hands over serialized
//! configuration and the server only looks at names and content hashes.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() {
//! use xds_server::transport::channel;
//! use xds_server::{Resource, SessionManager, TokioRuntime, TypeUrl};
//!
//! let manager = SessionManager::new(TokioRuntime);
//!
//! // Publish endpoints; every subscribed session is brought up to date.
//! manager.store().publish(
//!     TypeUrl::endpoint(),
//!     vec![Resource::new("backend", "10.0.0.1:8080")],
//! );
//!
//! let (transport, mut client) = channel::channel(16);
//! manager.accept("node-1", transport);
//!
//! client.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
//! while let Some(delta) = client.recv().await {
//!     println!("v{}: +{} ~{} -{}", delta.version, delta.added.len(), delta.updated.len(), delta.removed.len());
//!     client.ack(&delta).await.unwrap();
//! }
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `transport-tonic`: Serves delta ADS over gRPC with `tonic`. This enables `rt-tokio` and `codegen-prost` features. Enabled by default.
//! - `rt-tokio`: Enables the use of the `tokio` runtime. Enabled by default.
//! - `codegen-prost`: Enables conversions to and from the `envoy-types` protos. Enabled by default.

pub mod codec;
pub mod error;
pub mod message;
pub mod observe;
pub mod reconcile;
pub mod registry;
pub mod resource;
pub mod runtime;
pub mod session;
pub mod store;
pub mod transport;
pub mod version;

pub use codec::RequestDecoder;
pub use error::{Error, Result};
pub use message::{AckRecord, AckResult, ClientMessage, DeltaRequest, ErrorDetail};
pub use observe::{Observer, SessionEvent, TracingObserver};
pub use reconcile::{Delta, KnownResources, reconcile};
pub use registry::{Subscription, SubscriptionRegistry};
pub use resource::{ContentHash, Resource, TypeUrl};
pub use runtime::Runtime;
pub use session::config::ServerConfig;
pub use session::retry::{Backoff, RetryPolicy};
pub use session::{
    Session, SessionHandle, SessionId, SessionManager, SessionManagerBuilder, SessionState,
};
pub use store::{Published, ResourceSet, ResourceStore, Snapshot};
pub use transport::SessionTransport;
pub use version::{AckedVersions, Version, VersionTracker};

// Tokio runtime
#[cfg(feature = "rt-tokio")]
pub use runtime::tokio::TokioRuntime;

// Tonic transport
#[cfg(feature = "transport-tonic")]
pub use transport::tonic::{AdsService, TonicSessionTransport};

// Prost codec
#[cfg(feature = "codegen-prost")]
pub use codec::prost::ProstCodec;
