//! Presence Tracker: friend statuses in, own status out.

use std::sync::Arc;
use std::time::Duration;

use chatsync_shared::{destinations, SelfStatusSignal, UserId};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::normalize;
use crate::error::Result;
use crate::stores::Dispatcher;
use crate::ws::{ConnectionState, Session, SubscriptionCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTransition {
    WentIdle,
    Resumed,
}

/// Idle bookkeeping, driven by input events and a periodic tick.
#[derive(Debug, Clone)]
pub struct IdleTracker {
    threshold: Duration,
    last_activity: Instant,
    idle: bool,
}

impl IdleTracker {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last_activity: now,
            idle: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Returns `Resumed` only for the first input after going idle.
    pub fn record_activity(&mut self, now: Instant) -> Option<IdleTransition> {
        self.last_activity = now;
        if self.idle {
            self.idle = false;
            Some(IdleTransition::Resumed)
        } else {
            None
        }
    }

    pub fn tick(&mut self, now: Instant) -> Option<IdleTransition> {
        if !self.idle && now.saturating_duration_since(self.last_activity) >= self.threshold {
            self.idle = true;
            Some(IdleTransition::WentIdle)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct PresenceTracker {
    session: Session,
    store: Dispatcher,
    user_id: Option<UserId>,
    idle: Arc<Mutex<IdleTracker>>,
    check_interval: Duration,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    watcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PresenceTracker {
    pub fn new(
        session: Session,
        store: Dispatcher,
        user_id: Option<UserId>,
        idle_threshold: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            session,
            store,
            user_id,
            idle: Arc::new(Mutex::new(IdleTracker::new(idle_threshold, Instant::now()))),
            check_interval,
            ticker: Arc::new(Mutex::new(None)),
            watcher: Arc::new(Mutex::new(None)),
        }
    }

    /// Attach the global status and friends topics, announce ourselves
    /// online and start the idle timer. From then on the global topics are
    /// attached again whenever the session reconnects after losing its link.
    pub async fn start(&self) -> Result<()> {
        self.attach_globals().await?;
        self.idle.lock().record_activity(Instant::now());
        self.publish(destinations::SELF_CONNECT).await?;
        self.start_ticker();
        self.watch_connection();
        tracing::info!("Presence tracking started");
        Ok(())
    }

    async fn attach_globals(&self) -> Result<()> {
        let store = self.store.clone();
        self.session
            .subscribe(
                destinations::USER_STATUS,
                SubscriptionCategory::Global,
                move |value| match normalize::status_update(value, Utc::now()) {
                    Ok(action) => store.dispatch(action),
                    Err(e) => tracing::warn!(error = %e, "Dropping malformed status payload"),
                },
            )
            .await?;

        let store = self.store.clone();
        self.session
            .subscribe(
                destinations::FRIENDS_UPDATES,
                SubscriptionCategory::Global,
                move |value| match normalize::friends_update(value) {
                    Ok(action) => store.dispatch(action),
                    Err(e) => tracing::warn!(error = %e, "Dropping malformed friends payload"),
                },
            )
            .await?;
        Ok(())
    }

    fn watch_connection(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }
        let mut state = self.session.watch_state();
        let tracker = self.clone();
        *watcher = Some(tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let connected = matches!(*state.borrow_and_update(), ConnectionState::Connected);
                let attached = tracker
                    .session
                    .subscription_category(destinations::USER_STATUS)
                    .is_some();
                if connected && !attached {
                    tracing::info!("Reattaching presence topics after reconnect");
                    if let Err(e) = tracker.attach_globals().await {
                        tracing::warn!(error = %e, "Presence topics not reattached");
                    }
                }
            }
        }));
    }

    fn start_ticker(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let tracker = self.clone();
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tracker.check_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                tracker.check_idle().await;
            }
        }));
    }

    /// One idle check. Publishes offline once when the threshold passes
    /// while connected.
    pub async fn check_idle(&self) {
        let transition = self.idle.lock().tick(Instant::now());
        if transition != Some(IdleTransition::WentIdle) {
            return;
        }
        tracing::info!("User idle");
        if !self.session.is_connected() {
            return;
        }
        if let Err(e) = self.publish(destinations::SELF_DISCONNECT).await {
            tracing::warn!(error = %e, "Failed to publish idle status");
        }
    }

    /// Note user input. The first input after going idle publishes online.
    pub async fn record_activity(&self) -> Result<()> {
        let transition = self.idle.lock().record_activity(Instant::now());
        if transition == Some(IdleTransition::Resumed) {
            tracing::info!("User active again");
            self.publish(destinations::SELF_CONNECT).await?;
        }
        Ok(())
    }

    pub fn is_idle(&self) -> bool {
        self.idle.lock().is_idle()
    }

    fn stop_watching(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }

    /// Stop the timer and detach the global topics.
    pub fn stop(&self) {
        self.stop_watching();
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        self.session.remove_by_category(SubscriptionCategory::Global);
    }

    /// Unload: publish offline regardless of idle state, then stop.
    pub async fn shutdown(&self) {
        // The offline signal may reconnect; that must not reattach anything.
        self.stop_watching();
        if let Err(e) = self.publish(destinations::SELF_DISCONNECT).await {
            tracing::warn!(error = %e, "Failed to publish offline status");
        }
        self.stop();
    }

    async fn publish(&self, destination: &str) -> Result<()> {
        match self.user_id {
            Some(user_id) => {
                self.session
                    .send(destination, &SelfStatusSignal { user_id })
                    .await
            }
            None => self.session.send(destination, &serde_json::json!({})).await,
        }
    }
}
