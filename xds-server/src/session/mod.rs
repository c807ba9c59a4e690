//! Stream sessions: one per connected client.
//!
//! The [`SessionManager`] accepts client transports and spawns a worker per
//! session. Workers reconcile the client against the [`ResourceStore`]
//! whenever it subscribes, acks, or a subscribed type is republished.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::observe::{Observer, SessionEvent, TracingObserver};
use crate::registry::SubscriptionRegistry;
use crate::runtime::Runtime;
use crate::store::ResourceStore;
use crate::transport::SessionTransport;

use self::config::ServerConfig;
use self::worker::SessionWorker;

pub mod config;
pub mod retry;
mod state;
mod worker;

pub use state::{Session, SessionState};

/// Global counter for generating unique session IDs.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a new unique session ID.
    pub fn new() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// State shared between the manager and its session workers.
pub(crate) struct Shared {
    pub(crate) store: Arc<ResourceStore>,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) config: ServerConfig,
    pub(crate) observer: Arc<dyn Observer>,
    pub(crate) sessions: DashMap<SessionId, SessionHandle>,
}

impl Shared {
    pub(crate) fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&event);
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder<R> {
    runtime: R,
    config: ServerConfig,
    store: Option<Arc<ResourceStore>>,
    observer: Arc<dyn Observer>,
}

impl<R: Runtime> SessionManagerBuilder<R> {
    /// Start building a manager that spawns sessions on `runtime`.
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            config: ServerConfig::default(),
            store: None,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Use `config` for sessions, and for the store unless one is given.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Serve resources from an existing store.
    pub fn with_store(mut self, store: Arc<ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Report session events to `observer` instead of `tracing`.
    pub fn with_observer(mut self, observer: impl Observer) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Build the manager.
    pub fn build(self) -> SessionManager<R> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(ResourceStore::from_config(&self.config)));

        SessionManager {
            shared: Arc::new(Shared {
                store,
                registry: Arc::new(SubscriptionRegistry::new()),
                config: self.config,
                observer: self.observer,
                sessions: DashMap::new(),
            }),
            runtime: self.runtime,
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for SessionManagerBuilder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManagerBuilder")
            .field("runtime", &self.runtime)
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Accepts client streams and runs a session for each.
///
/// Cloning the manager yields another handle to the same sessions, store
/// and registry.
///
/// # Example
///
/// ```no_run
/// # async fn example() {
/// use xds_server::{Resource, SessionManager, TokioRuntime, TypeUrl};
/// use xds_server::transport::channel;
///
/// let manager = SessionManager::new(TokioRuntime);
/// manager
///     .store()
///     .publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "10.0.0.1:80")]);
///
/// let (transport, mut client) = channel::channel(16);
/// let session = manager.accept("node-1", transport);
///
/// client.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
/// let delta = client.recv().await.unwrap();
/// assert_eq!(delta.added.len(), 1);
///
/// session.disconnect();
/// session.closed().await;
/// # }
/// ```
#[derive(Clone)]
pub struct SessionManager<R> {
    shared: Arc<Shared>,
    runtime: R,
}

impl<R: Runtime> SessionManager<R> {
    /// A manager with default configuration and its own store.
    pub fn new(runtime: R) -> Self {
        SessionManagerBuilder::new(runtime).build()
    }

    /// Start building a manager.
    pub fn builder(runtime: R) -> SessionManagerBuilder<R> {
        SessionManagerBuilder::new(runtime)
    }

    /// The store sessions serve from.
    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.shared.store
    }

    /// The subscriptions of all live sessions.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }

    /// The configuration sessions run with.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Start a session for a newly connected client.
    ///
    /// The session runs on its own task until the client disconnects, the
    /// transport fails, or [`SessionHandle::disconnect`] is called.
    pub fn accept<T>(&self, client_id: impl Into<String>, transport: T) -> SessionHandle
    where
        T: SessionTransport,
    {
        let client_id = client_id.into();
        let id = SessionId::new();
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SessionState::Connected);

        let handle = SessionHandle {
            id,
            client_id: Arc::from(client_id.as_str()),
            cancel: cancel.clone(),
            state: state_rx,
        };
        self.shared.sessions.insert(id, handle.clone());

        // Subscribe before spawning so no publish after accept is missed.
        let publishes = self.shared.store.subscribe_publishes();
        let session = Session::new(id, client_id.clone(), self.shared.config.retry_policy.clone());

        self.shared
            .emit(SessionEvent::SessionConnected { session: id, client_id });

        let worker = SessionWorker::new(
            session,
            transport,
            self.runtime.clone(),
            Arc::clone(&self.shared),
            cancel,
            state_tx,
            publishes,
        );
        self.runtime.spawn(async move {
            worker.run().await;
        });

        handle
    }

    /// Close a session from the server side.
    ///
    /// Returns false if no such session is live.
    pub fn disconnect(&self, id: SessionId) -> bool {
        match self.shared.sessions.get(&id) {
            Some(handle) => {
                handle.disconnect();
                true
            }
            None => false,
        }
    }

    /// Close every live session.
    pub fn disconnect_all(&self) {
        for handle in self.shared.sessions.iter() {
            handle.disconnect();
        }
    }

    /// A handle to a live session.
    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.shared.sessions.get(&id).map(|h| h.clone())
    }

    /// The state of a session, or `None` once it has closed.
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.shared.sessions.get(&id).map(|h| h.state())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }
}

impl<R: fmt::Debug> fmt::Debug for SessionManager<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("shared", &self.shared)
            .field("runtime", &self.runtime)
            .finish()
    }
}

/// A handle to a running session.
///
/// Dropping the handle does not close the session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    client_id: Arc<str>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// The session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The identifier the client presented.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Ask the session to close. Any send in progress is abandoned.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Wait until the session has fully closed.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}
