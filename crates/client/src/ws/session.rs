//! The single broker session shared by every feature of the client.
//!
//! A [`Session`] owns at most one link and one STOMP session on top of it.
//! Concurrent `connect` calls join the same in-flight attempt; `send` and
//! `subscribe` reconnect lazily with the last known token.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chatsync_shared::{Command, Frame};
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use super::connection::{ConnectionState, Connector, Link};
use super::registry::{Cancel, SubscriptionCategory, SubscriptionRegistry};
use crate::error::{Result, SyncError};
use crate::storage::{self, KeyValueStore};

/// Callback receiving the JSON body of every frame on a subscription.
pub type Handler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

type PendingConnect = Shared<BoxFuture<'static, Result<Connection>>>;

/// Identity of an established connection. Every successful handshake gets a
/// new `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: u64,
    pub server: Option<String>,
}

struct Route {
    destination: String,
    handler: Handler,
}

/// A link that completed the STOMP handshake.
struct LiveLink {
    id: u64,
    server: Option<String>,
    outbound: UnboundedSender<Frame>,
    routes: Mutex<HashMap<String, Route>>,
}

impl LiveLink {
    fn connection(&self) -> Connection {
        Connection {
            id: self.id,
            server: self.server.clone(),
        }
    }

    fn send(&self, frame: Frame) -> Result<()> {
        self.outbound
            .unbounded_send(frame)
            .map_err(|e| SyncError::SendFailed(e.to_string()))
    }

    fn deliver(&self, frame: Frame) {
        match frame.command {
            Command::Message => {
                let Some(sub_id) = frame.get("subscription") else {
                    tracing::warn!("MESSAGE frame without subscription header");
                    return;
                };
                let route = self
                    .routes
                    .lock()
                    .get(sub_id)
                    .map(|r| (r.destination.clone(), r.handler.clone()));
                let Some((destination, handler)) = route else {
                    tracing::debug!(subscription = sub_id, "Frame for cancelled subscription");
                    return;
                };
                match serde_json::from_str::<serde_json::Value>(&frame.body) {
                    Ok(value) => handler(value),
                    Err(e) => {
                        tracing::warn!(destination = %destination, error = %e, "Dropping malformed payload")
                    }
                }
            }
            Command::Error => {
                tracing::error!(
                    message = frame.get("message").unwrap_or_default(),
                    body = %frame.body,
                    "Broker reported an error"
                );
            }
            Command::Receipt => {
                tracing::debug!(receipt = frame.get("receipt-id").unwrap_or_default(), "Receipt");
            }
            other => tracing::debug!(command = %other, "Ignoring unexpected frame"),
        }
    }

    fn close(&self) {
        self.routes.lock().clear();
        self.outbound.close_channel();
    }
}

/// Handle to one subscription on the wire.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: String,
    destination: String,
    link: Weak<LiveLink>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Whether frames are still routed to this subscription's handler.
    pub fn is_active(&self) -> bool {
        self.link
            .upgrade()
            .is_some_and(|link| link.routes.lock().contains_key(&self.id))
    }
}

impl Cancel for SubscriptionHandle {
    fn cancel(&self) {
        let Some(link) = self.link.upgrade() else {
            return;
        };
        if link.routes.lock().remove(&self.id).is_some() {
            if let Err(e) = link.send(Frame::unsubscribe(&self.id)) {
                tracing::debug!(subscription = %self.id, error = %e, "UNSUBSCRIBE not sent");
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish()
    }
}

enum State {
    Disconnected,
    Connecting(PendingConnect),
    Connected(Arc<LiveLink>),
}

struct Inner {
    state: State,
    /// Bumped on every connect attempt and every disconnect, so a late
    /// handshake can tell it was abandoned.
    epoch: u64,
    last_token: Option<String>,
    next_subscription: u64,
    registry: SubscriptionRegistry<SubscriptionHandle>,
}

/// Process-wide broker session. Cheap to clone; all clones share one link.
#[derive(Clone)]
pub struct Session {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn KeyValueStore>,
    host: String,
    inner: Arc<Mutex<Inner>>,
    status: Arc<watch::Sender<ConnectionState>>,
}

impl Session {
    /// `host` is sent in the CONNECT frame; `credentials` backs lazy reconnects.
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn KeyValueStore>,
        host: impl Into<String>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            credentials,
            host: host.into(),
            inner: Arc::new(Mutex::new(Inner {
                state: State::Disconnected,
                epoch: 0,
                last_token: None,
                next_subscription: 0,
                registry: SubscriptionRegistry::new(),
            })),
            status: Arc::new(status),
        }
    }

    /// Connect with `token`.
    ///
    /// Returns immediately when already connected. While a handshake is in
    /// flight every caller awaits that same attempt and gets its result.
    pub async fn connect(&self, token: &str) -> Result<Connection> {
        let pending = {
            let mut inner = self.inner.lock();
            inner.last_token = Some(token.to_string());
            let existing = match &inner.state {
                State::Connected(link) => return Ok(link.connection()),
                State::Connecting(pending) => Some(pending.clone()),
                State::Disconnected => None,
            };
            match existing {
                Some(pending) => pending,
                None => self.start_connect(&mut inner, token),
            }
        };
        pending.await
    }

    fn start_connect(&self, inner: &mut Inner, token: &str) -> PendingConnect {
        inner.epoch += 1;
        let epoch = inner.epoch;
        tracing::info!(attempt = epoch, host = %self.host, "Connecting session");

        let task = tokio::spawn(self.clone().establish(token.to_string(), epoch));
        let pending = async move {
            task.await.unwrap_or_else(|e| {
                Err(SyncError::ConnectFailed(format!("connect task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        inner.state = State::Connecting(pending.clone());
        self.status.send_replace(ConnectionState::Connecting);
        pending
    }

    async fn establish(self, token: String, epoch: u64) -> Result<Connection> {
        let outcome = self.handshake(&token, epoch).await;
        self.finish_connect(epoch, outcome)
    }

    async fn handshake(
        &self,
        token: &str,
        epoch: u64,
    ) -> Result<(Arc<LiveLink>, UnboundedReceiver<Frame>)> {
        let Link {
            outbound,
            mut inbound,
        } = self.connector.open(token).await?;

        outbound
            .unbounded_send(Frame::connect(&self.host, token))
            .map_err(|e| SyncError::ConnectFailed(format!("CONNECT not sent: {e}")))?;

        match inbound.next().await {
            Some(frame) if frame.command == Command::Connected => {
                let link = LiveLink {
                    id: epoch,
                    server: frame.get("server").map(str::to_string),
                    outbound,
                    routes: Mutex::new(HashMap::new()),
                };
                Ok((Arc::new(link), inbound))
            }
            Some(frame) if frame.command == Command::Error => {
                outbound.close_channel();
                let reason = frame
                    .get("message")
                    .filter(|m| !m.trim().is_empty())
                    .map(str::to_string)
                    .unwrap_or(frame.body);
                Err(SyncError::ConnectFailed(reason))
            }
            Some(frame) => {
                outbound.close_channel();
                Err(SyncError::ConnectFailed(format!(
                    "expected CONNECTED, got {}",
                    frame.command
                )))
            }
            None => Err(SyncError::ConnectFailed(
                "transport closed during handshake".into(),
            )),
        }
    }

    fn finish_connect(
        &self,
        epoch: u64,
        outcome: Result<(Arc<LiveLink>, UnboundedReceiver<Frame>)>,
    ) -> Result<Connection> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            if let Ok((link, _)) = &outcome {
                link.close();
            }
            tracing::debug!(attempt = epoch, "Discarding abandoned connect attempt");
            return Err(SyncError::ConnectFailed(
                "connect attempt abandoned by disconnect".into(),
            ));
        }

        match outcome {
            Ok((link, inbound)) => {
                inner.state = State::Connected(link.clone());
                tokio::spawn(pump(
                    Arc::downgrade(&link),
                    inbound,
                    Arc::downgrade(&self.inner),
                    self.status.clone(),
                ));
                self.status.send_replace(ConnectionState::Connected);
                tracing::info!(connection = epoch, server = ?link.server, "Session connected");
                Ok(link.connection())
            }
            Err(e) => {
                inner.state = State::Disconnected;
                self.status.send_replace(ConnectionState::Failed {
                    reason: e.to_string(),
                });
                tracing::warn!(attempt = epoch, error = %e, "Session connect failed");
                Err(e)
            }
        }
    }

    /// Close the session, cancelling every tracked subscription. No-op when
    /// already disconnected.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.state, State::Disconnected) {
            State::Disconnected => return,
            State::Connecting(_) => {
                inner.epoch += 1;
                tracing::info!("Abandoning in-flight connect");
            }
            State::Connected(link) => {
                inner.epoch += 1;
                let removed = inner.registry.clear();
                if let Err(e) = link.send(Frame::disconnect()) {
                    tracing::debug!(error = %e, "DISCONNECT not sent");
                }
                link.close();
                tracing::info!(connection = link.id, subscriptions = removed, "Session disconnected");
            }
        }
        self.status.send_replace(ConnectionState::Disconnected);
    }

    /// Forget the in-memory and stored token (logout).
    pub fn forget_credentials(&self) {
        self.inner.lock().last_token = None;
        storage::clear_token(self.credentials.as_ref());
    }

    /// Publish `payload` as JSON on `destination`. Fire-and-forget: resolves
    /// once the frame is queued on the link.
    pub async fn send<T>(&self, destination: &str, payload: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let body =
            serde_json::to_string(payload).map_err(|e| SyncError::SendFailed(e.to_string()))?;
        self.ensure_connected().await?;
        let link = match &self.inner.lock().state {
            State::Connected(link) => link.clone(),
            _ => return Err(SyncError::NotConnected),
        };
        link.send(Frame::send(destination, body))?;
        tracing::debug!(destination, "Published");
        Ok(())
    }

    /// Subscribe `handler` to `destination`, replacing any subscription
    /// already registered there.
    pub async fn subscribe<F>(
        &self,
        destination: &str,
        category: SubscriptionCategory,
        handler: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.ensure_connected().await?;

        let mut inner = self.inner.lock();
        let link = match &inner.state {
            State::Connected(link) => link.clone(),
            _ => {
                return Err(SyncError::Subscription {
                    destination: destination.to_string(),
                    reason: "session closed before subscribing".into(),
                })
            }
        };

        // The old subscription must be gone before the broker learns about
        // the new one, or both would receive the next frame.
        inner.registry.remove_by_destination(destination);

        inner.next_subscription += 1;
        let id = format!("sub-{}", inner.next_subscription);
        link.routes.lock().insert(
            id.clone(),
            Route {
                destination: destination.to_string(),
                handler,
            },
        );
        if let Err(e) = link.send(Frame::subscribe(&id, destination)) {
            link.routes.lock().remove(&id);
            return Err(SyncError::Subscription {
                destination: destination.to_string(),
                reason: e.to_string(),
            });
        }

        let handle = SubscriptionHandle {
            id,
            destination: destination.to_string(),
            link: Arc::downgrade(&link),
        };
        inner.registry.add(destination, handle.clone(), category);
        tracing::debug!(destination, subscription = %handle.id, ?category, "Subscribed");
        Ok(handle)
    }

    /// Cancel the subscription on `destination`, if any.
    pub fn unsubscribe(&self, destination: &str) -> bool {
        self.inner.lock().registry.remove_by_destination(destination)
    }

    /// Cancel every subscription of `category`. Reserved for the component
    /// that owns the category.
    pub(crate) fn remove_by_category(&self, category: SubscriptionCategory) -> usize {
        let removed = self.inner.lock().registry.remove_by_category(category);
        if removed > 0 {
            tracing::debug!(?category, removed, "Removed subscriptions");
        }
        removed
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.inner.lock().state, State::Connected(_))
    }

    pub fn connection(&self) -> Option<Connection> {
        match &self.inner.lock().state {
            State::Connected(link) => Some(link.connection()),
            _ => None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    /// Destinations with a live subscription, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.lock().registry.destinations()
    }

    pub fn subscription_category(&self, destination: &str) -> Option<SubscriptionCategory> {
        self.inner.lock().registry.category_of(destination)
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let remembered = self.inner.lock().last_token.clone();
        let token = remembered
            .or_else(|| storage::load_token(self.credentials.as_ref()))
            .ok_or(SyncError::NotConnected)?;
        tracing::debug!("Reconnecting with last known token");
        self.connect(&token).await?;
        Ok(())
    }
}

/// Route inbound frames until the link closes.
async fn pump(
    link: Weak<LiveLink>,
    mut inbound: UnboundedReceiver<Frame>,
    session: Weak<Mutex<Inner>>,
    status: Arc<watch::Sender<ConnectionState>>,
) {
    let mut link_id = None;
    while let Some(frame) = inbound.next().await {
        let Some(live) = link.upgrade() else {
            return;
        };
        link_id = Some(live.id);
        live.deliver(frame);
    }

    let Some(session) = session.upgrade() else {
        return;
    };
    let mut inner = session.lock();
    let lost = match (&inner.state, link.upgrade()) {
        (State::Connected(current), Some(live)) => Arc::ptr_eq(current, &live),
        _ => false,
    };
    if lost {
        inner.state = State::Disconnected;
        inner.epoch += 1;
        // Nothing left on the wire to unsubscribe from.
        inner.registry.forget_all();
        status.send_replace(ConnectionState::Disconnected);
        tracing::warn!(connection = ?link_id, "Broker link closed; session disconnected");
    }
}
