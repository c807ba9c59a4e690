//! Session worker driving one client stream.
//!
//! The worker runs as a background task, reacting to:
//! - Client messages (subscriptions, acks, nacks)
//! - Publishes to the resource store
//! - Expired nack backoff timers
//! - Server-side disconnects

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::message::{AckRecord, AckResult, ClientMessage};
use crate::observe::SessionEvent;
use crate::reconcile::Delta;
use crate::registry::Subscription;
use crate::resource::TypeUrl;
use crate::runtime::Runtime;
use crate::session::Shared;
use crate::session::state::{AckOutcome, Session, SessionState};
use crate::store::Published;
use crate::transport::SessionTransport;

pub(crate) struct SessionWorker<T, R> {
    session: Session,
    transport: T,
    runtime: R,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
    publishes: broadcast::Receiver<Published>,
    /// Types whose nack backoff has elapsed.
    retry_tx: mpsc::UnboundedSender<TypeUrl>,
    retry_rx: mpsc::UnboundedReceiver<TypeUrl>,
    /// Running backoff timers. Dropping a sender cancels its timer.
    retry_timers: HashMap<TypeUrl, oneshot::Sender<()>>,
}

impl<T, R> SessionWorker<T, R>
where
    T: SessionTransport,
    R: Runtime,
{
    pub(crate) fn new(
        session: Session,
        transport: T,
        runtime: R,
        shared: Arc<Shared>,
        cancel: CancellationToken,
        state_tx: watch::Sender<SessionState>,
        publishes: broadcast::Receiver<Published>,
    ) -> Self {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        Self {
            session,
            transport,
            runtime,
            shared,
            cancel,
            state_tx,
            publishes,
            retry_tx,
            retry_rx,
            retry_timers: HashMap::new(),
        }
    }

    /// Run until the session closes, then release everything it holds.
    pub(crate) async fn run(mut self) {
        let reason = match self.run_open().await {
            Ok(()) | Err(Error::Cancelled) => None,
            Err(e) => Some(e.to_string()),
        };
        self.shutdown(reason).await;
    }

    async fn run_open(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),

                msg = self.transport.recv() => {
                    match msg {
                        Ok(Some(msg)) => self.handle_message(msg).await?,
                        Ok(None) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }

                Some(type_url) = self.retry_rx.recv() => {
                    self.retry_timers.remove(&type_url);
                    self.push(&type_url).await?;
                }

                published = self.publishes.recv() => {
                    match published {
                        Ok(published) => self.push(&published.type_url).await?,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(
                                session = %self.session.id(),
                                skipped,
                                "publish notifications lagged, reconciling all types"
                            );
                            self.push_all().await?;
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::Subscribe {
                type_url,
                subscription,
            } => self.subscribe(type_url, subscription).await,
            ClientMessage::Unsubscribe { type_url } => {
                self.unsubscribe(&type_url);
                Ok(())
            }
            ClientMessage::Ack(record) => self.handle_ack(record).await,
        }
    }

    async fn subscribe(&mut self, type_url: TypeUrl, subscription: Subscription) -> Result<()> {
        let id = self.session.id();
        tracing::debug!(session = %id, %type_url, ?subscription, "subscribe");

        self.shared
            .registry
            .subscribe(id, type_url.clone(), subscription);
        if self.session.activate() {
            self.state_tx.send_replace(SessionState::Active);
        }
        self.push(&type_url).await
    }

    fn unsubscribe(&mut self, type_url: &TypeUrl) {
        let id = self.session.id();
        if let Err(e) = self.shared.registry.unsubscribe(id, type_url) {
            tracing::debug!(session = %id, error = %e, "ignoring unsubscribe");
            return;
        }
        self.retry_timers.remove(type_url);
        self.session.forget_type(type_url.as_str());
    }

    async fn handle_ack(&mut self, record: AckRecord) -> Result<()> {
        let id = self.session.id();
        let outcome = match self.session.apply_ack(&record) {
            Ok(outcome) => outcome,
            Err(e @ Error::UnknownVersionAck { .. }) => {
                tracing::warn!(session = %id, error = %e, "ignoring ack");
                return Ok(());
            }
            Err(e) => {
                self.emit_ack(&record);
                return Err(e);
            }
        };

        match outcome {
            AckOutcome::Accepted => {
                self.emit_ack(&record);
                // Catch up with anything the in-flight version did not cover.
                self.push(&record.type_url).await
            }
            AckOutcome::Rejected { retry_after } => {
                self.emit_ack(&record);
                self.schedule_retry(record.type_url, retry_after);
                Ok(())
            }
            AckOutcome::Stale => {
                tracing::debug!(
                    session = %id,
                    type_url = %record.type_url,
                    version = %record.version,
                    "ignoring ack for superseded version"
                );
                Ok(())
            }
        }
    }

    fn emit_ack(&self, record: &AckRecord) {
        let session = self.session.id();
        let event = match &record.result {
            AckResult::Accepted => SessionEvent::AckReceived {
                session,
                type_url: record.type_url.clone(),
                version: record.version,
            },
            AckResult::Rejected(detail) => SessionEvent::NackReceived {
                session,
                type_url: record.type_url.clone(),
                version: record.version,
                message: detail.message.clone(),
            },
        };
        self.shared.emit(event);
    }

    /// Resend `type_url` once `delay` has elapsed.
    ///
    /// Replaces any timer already running for the type.
    fn schedule_retry(&mut self, type_url: TypeUrl, delay: Duration) {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let retry_tx = self.retry_tx.clone();
        let runtime = self.runtime.clone();
        let expired = type_url.clone();

        self.runtime.spawn(async move {
            tokio::select! {
                _ = runtime.sleep(delay) => {
                    let _ = retry_tx.send(expired);
                }
                _ = cancel_rx => {}
            }
        });

        tracing::debug!(
            session = %self.session.id(),
            %type_url,
            ?delay,
            "scheduled resend after nack"
        );
        self.retry_timers.insert(type_url, cancel_tx);
    }

    /// Bring the client up to date on every subscribed type.
    async fn push_all(&mut self) -> Result<()> {
        for type_url in self.shared.registry.subscribed_types(self.session.id()) {
            self.push(&type_url).await?;
        }
        Ok(())
    }

    /// Bring the client up to date on `type_url`, if it is subscribed.
    async fn push(&mut self, type_url: &TypeUrl) -> Result<()> {
        // A nacked type waits out its backoff.
        if self.retry_timers.contains_key(type_url) {
            return Ok(());
        }
        let Some(subscription) = self
            .shared
            .registry
            .subscription(self.session.id(), type_url.as_str())
        else {
            return Ok(());
        };

        let snapshot = self.shared.store.current_snapshot(type_url.as_str());
        let delta = self
            .session
            .reconcile(type_url, snapshot.as_deref(), &subscription);
        if delta.is_empty() || self.session.repeats_in_flight(&delta) {
            return Ok(());
        }
        self.send(delta).await
    }

    /// Send `delta`, recording it only if the transport took it.
    async fn send(&mut self, delta: Delta) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = self.transport.send(&delta) => result?,
        }

        self.session.record_sent(&delta);
        self.shared.emit(SessionEvent::DeltaSent {
            session: self.session.id(),
            type_url: delta.type_url.clone(),
            version: delta.version,
            added: delta.added.len(),
            updated: delta.updated.len(),
            removed: delta.removed.len(),
        });
        Ok(())
    }

    async fn shutdown(mut self, reason: Option<String>) {
        let id = self.session.id();

        self.session.begin_close();
        self.state_tx.send_replace(SessionState::Closing);

        let released = self.shared.registry.remove_session(id);
        self.retry_timers.clear();
        self.transport.close().await;
        tracing::debug!(session = %id, released, "released subscriptions");

        self.session.finish_close();
        self.shared.sessions.remove(&id);
        self.state_tx.send_replace(SessionState::Closed);
        self.shared.emit(SessionEvent::SessionClosed {
            session: id,
            reason,
        });
    }
}
