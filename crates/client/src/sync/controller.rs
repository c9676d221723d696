//! Chat Synchronization Controller.
//!
//! Keeps exactly one chat topic attached, the one for the active chat, and
//! turns everything that arrives on it into store actions. Outbound chat
//! commands go through here as well.
//!
//! The session does not retry on its own. When it comes back after losing
//! its link, the controller reattaches the active chat and refetches its
//! history.

use std::sync::Arc;

use async_trait::async_trait;
use chatsync_shared::{
    destinations, ApiError, Attachment, ChatRef, EditRequest, Message, MessageAction, MessageId,
    OutgoingMessage, UserId,
};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::normalize::{self, PushContext};
use crate::error::{Result, SyncError};
use crate::stores::{Action, Dispatcher, PendingMessage};
use crate::ws::{ConnectionState, Session, SubscriptionCategory};

/// Source of a chat's history.
#[async_trait]
pub trait ChatHistory: Send + Sync + 'static {
    async fn fetch_transcript(&self, chat: ChatRef) -> Result<Vec<Message>, ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Loading(ChatRef),
    Subscribed(ChatRef),
    /// The chat is still active but its topic went down with the link.
    Detached(ChatRef),
}

impl SyncPhase {
    pub fn chat(&self) -> Option<ChatRef> {
        match self {
            SyncPhase::Idle => None,
            SyncPhase::Loading(chat) | SyncPhase::Subscribed(chat) | SyncPhase::Detached(chat) => {
                Some(*chat)
            }
        }
    }
}

struct Tracking {
    phase: SyncPhase,
    /// Bumped on every open or close; work started under an older value
    /// must not touch state.
    generation: u64,
}

#[derive(Clone)]
pub struct ChatSyncController {
    session: Session,
    history: Arc<dyn ChatHistory>,
    store: Dispatcher,
    me: Option<UserId>,
    tracking: Arc<Mutex<Tracking>>,
    /// Serializes changes to the chat subscription.
    switching: Arc<tokio::sync::Mutex<()>>,
    watcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ChatSyncController {
    pub fn new(
        session: Session,
        history: Arc<dyn ChatHistory>,
        store: Dispatcher,
        me: Option<UserId>,
    ) -> Self {
        let controller = Self {
            session,
            history,
            store,
            me,
            tracking: Arc::new(Mutex::new(Tracking {
                phase: SyncPhase::Idle,
                generation: 0,
            })),
            switching: Arc::new(tokio::sync::Mutex::new(())),
            watcher: Arc::new(Mutex::new(None)),
        };
        controller.watch_connection();
        controller
    }

    fn watch_connection(&self) {
        let mut state = self.session.watch_state();
        let controller = self.clone();
        let task = tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let connected = matches!(*state.borrow_and_update(), ConnectionState::Connected);
                if connected {
                    controller.reattach().await;
                } else {
                    controller.mark_detached();
                }
            }
        });
        *self.watcher.lock() = Some(task);
    }

    /// Stop following connection changes. The chat subscription is left as is.
    pub fn stop(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.tracking.lock().phase
    }

    fn is_current(&self, generation: u64) -> bool {
        self.tracking.lock().generation == generation
    }

    fn set_phase_if_current(&self, generation: u64, phase: SyncPhase) {
        let mut tracking = self.tracking.lock();
        if tracking.generation == generation {
            tracking.phase = phase;
        }
    }

    /// Make `chat` the active chat: attach its topic and load its history.
    ///
    /// Both run concurrently, so pushes arriving while the history is slow
    /// are kept. If another chat is opened before this finishes, the late
    /// results are discarded.
    pub async fn open_chat(&self, chat: ChatRef) -> Result<()> {
        let generation = {
            let mut tracking = self.tracking.lock();
            tracking.generation += 1;
            tracking.phase = SyncPhase::Loading(chat);
            tracking.generation
        };
        tracing::info!(%chat, "Opening chat");
        self.store.dispatch(Action::SetActiveChat(Some(chat)));

        let Some((attached, fetch_error)) = self.attach_and_fetch(chat, generation).await else {
            return Ok(());
        };

        if let Err(e) = attached {
            tracing::warn!(%chat, error = %e, "Chat topic not attached");
            self.set_phase_if_current(generation, SyncPhase::Idle);
            return Err(e);
        }
        self.set_phase_if_current(generation, SyncPhase::Subscribed(chat));

        match fetch_error {
            Some(e) => Err(SyncError::Api(e)),
            None => Ok(()),
        }
    }

    /// Attach the topic and fetch the history concurrently. `None` when the
    /// chat stopped being current in the meantime; otherwise the transcript
    /// has been dispatched and any fetch error is handed back.
    async fn attach_and_fetch(
        &self,
        chat: ChatRef,
        generation: u64,
    ) -> Option<(Result<()>, Option<ApiError>)> {
        let (attached, fetched) = tokio::join!(
            self.attach(chat, generation),
            self.history.fetch_transcript(chat)
        );

        if !self.is_current(generation) {
            tracing::debug!(%chat, "Discarding results for a chat no longer active");
            return None;
        }

        let fetch_error = match fetched {
            Ok(messages) => {
                tracing::debug!(%chat, count = messages.len(), "Transcript loaded");
                self.store
                    .dispatch(Action::TranscriptLoaded { chat, messages });
                None
            }
            Err(e) => {
                tracing::warn!(%chat, error = %e, "Transcript fetch failed");
                Some(e)
            }
        };
        Some((attached, fetch_error))
    }

    fn active_topic_lost(&self, chat: ChatRef) -> bool {
        self.session
            .subscription_category(&destinations::chat_topic(chat))
            .is_none()
    }

    fn mark_detached(&self) {
        let SyncPhase::Subscribed(chat) = self.phase() else {
            return;
        };
        if !self.active_topic_lost(chat) {
            return;
        }
        let mut tracking = self.tracking.lock();
        if tracking.phase == SyncPhase::Subscribed(chat) {
            tracking.phase = SyncPhase::Detached(chat);
            tracing::info!(%chat, "Chat topic lost with the link");
        }
    }

    /// Bring the active chat back after the session reconnected: attach its
    /// topic again and refetch the history to cover the gap.
    async fn reattach(&self) {
        let (chat, generation) = {
            let tracking = self.tracking.lock();
            match tracking.phase {
                SyncPhase::Subscribed(chat) | SyncPhase::Detached(chat) => {
                    (chat, tracking.generation)
                }
                SyncPhase::Idle | SyncPhase::Loading(_) => return,
            }
        };
        if !self.active_topic_lost(chat) {
            return;
        }
        tracing::info!(%chat, "Reattaching chat after reconnect");
        self.set_phase_if_current(generation, SyncPhase::Loading(chat));

        let Some((attached, _)) = self.attach_and_fetch(chat, generation).await else {
            return;
        };
        match attached {
            Ok(()) => self.set_phase_if_current(generation, SyncPhase::Subscribed(chat)),
            Err(e) => {
                tracing::warn!(%chat, error = %e, "Chat topic not reattached");
                self.set_phase_if_current(generation, SyncPhase::Detached(chat));
            }
        }
    }

    /// Leave the active chat and detach its topic. Global subscriptions stay.
    pub async fn close_chat(&self) {
        {
            let mut tracking = self.tracking.lock();
            tracking.generation += 1;
            tracking.phase = SyncPhase::Idle;
        }
        let _switching = self.switching.lock().await;
        self.session.remove_by_category(SubscriptionCategory::Chat);
        self.store.dispatch(Action::SetActiveChat(None));
        tracing::info!("Closed active chat");
    }

    async fn attach(&self, chat: ChatRef, generation: u64) -> Result<()> {
        let _switching = self.switching.lock().await;
        if !self.is_current(generation) {
            return Ok(());
        }
        self.session.remove_by_category(SubscriptionCategory::Chat);

        let ctx = PushContext { chat, me: self.me };
        let store = self.store.clone();
        let tracking = self.tracking.clone();
        let handler = move |value: serde_json::Value| {
            if tracking.lock().generation != generation {
                return;
            }
            match normalize::chat_push(value, &ctx) {
                Ok(actions) => actions.into_iter().for_each(|a| store.dispatch(a)),
                Err(e) => {
                    tracing::warn!(chat = %ctx.chat, error = %e, "Dropping malformed chat payload")
                }
            }
        };

        self.session
            .subscribe(
                &destinations::chat_topic(chat),
                SubscriptionCategory::Chat,
                handler,
            )
            .await?;
        Ok(())
    }

    /// Publish a new message with an optimistic local echo.
    ///
    /// Requires a live connection. On failure the echo is withdrawn and the
    /// error returned; the caller keeps its compose input.
    pub async fn send_message(
        &self,
        chat: ChatRef,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<Uuid> {
        if !self.session.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let local_id = Uuid::new_v4();
        self.store.dispatch(Action::MessagePending(PendingMessage {
            local_id,
            chat,
            text: text.to_string(),
            attachment: attachment.clone(),
            created_at: Utc::now(),
        }));

        let body = OutgoingMessage {
            text: text.to_string(),
            attachment,
        };
        match self
            .session
            .send(&destinations::send_message(chat), &body)
            .await
        {
            Ok(()) => Ok(local_id),
            Err(e) => {
                tracing::warn!(%chat, error = %e, "Message not sent");
                self.store.dispatch(Action::PendingFailed { local_id });
                Err(e)
            }
        }
    }

    /// Ask the server to edit a message. State changes when the edit event
    /// comes back on the chat topic.
    pub async fn edit_message(&self, chat: ChatRef, id: MessageId, text: &str) -> Result<()> {
        let body = EditRequest {
            message_id: id,
            text: text.to_string(),
        };
        self.session
            .send(&destinations::edit_message(chat), &body)
            .await
    }

    pub async fn delete_message(&self, chat: ChatRef, id: MessageId) -> Result<()> {
        self.session
            .send(
                &destinations::delete_message(chat),
                &MessageAction { message_id: id },
            )
            .await
    }

    pub async fn mark_read(&self, chat: ChatRef, id: MessageId) -> Result<()> {
        self.session
            .send(
                &destinations::read_message(chat),
                &MessageAction { message_id: id },
            )
            .await
    }
}
