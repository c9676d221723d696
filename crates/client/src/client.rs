//! One authenticated lifetime of the sync core.
//!
//! [`ChatClient`] wires the session, store, controller and presence tracker
//! together. Front ends talk to this and read state from [`ChatClient::store`].

use std::sync::Arc;

use chatsync_shared::{Attachment, ChatRef, MessageId, UserProfile};
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::api_client::{ApiClient, Backend};
use crate::config::ClientConfig;
use crate::error::{Result, SyncError};
use crate::storage::{self, FileStore, KeyValueStore, RememberMe};
use crate::stores::{Action, ClientState, Store};
use crate::sync::{ChatSyncController, PresenceTracker};
use crate::ws::{ConnectionState, Connector, Session, WsConnector};

#[derive(Clone)]
struct SignedIn {
    user: UserProfile,
    controller: ChatSyncController,
    presence: PresenceTracker,
}

pub struct ChatClient {
    config: ClientConfig,
    backend: Arc<dyn Backend>,
    credentials: Arc<dyn KeyValueStore>,
    session: Session,
    store: Store,
    signed_in: Mutex<Option<SignedIn>>,
}

impl ChatClient {
    /// Client talking to the endpoints in `config`, persisting state on disk.
    /// Must be called inside a tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        let credentials: Arc<dyn KeyValueStore> = match &config.storage_dir {
            Some(dir) => Arc::new(FileStore::at(dir)),
            None => Arc::new(FileStore::platform()),
        };
        let connector = Arc::new(WsConnector::new(config.ws_url.clone()));
        let api = Arc::new(ApiClient::new(config.api_base_url.clone()));
        Self::with_parts(config, connector, credentials, api)
    }

    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn KeyValueStore>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        let session = Session::new(connector, credentials.clone(), config.broker_host());
        Self {
            config,
            backend,
            credentials,
            session,
            store: Store::spawn(),
            signed_in: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> watch::Receiver<ClientState> {
        self.store.watch()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.watch_state()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.signed_in.lock().as_ref().map(|s| s.user.clone())
    }

    pub fn remember_me(&self) -> RememberMe {
        storage::load_remember_me(self.credentials.as_ref())
    }

    /// Log in with credentials, persist the token and start syncing.
    pub async fn login(&self, login: &str, password: &str, remember: bool) -> Result<UserProfile> {
        let response = self.backend.login(login, password).await?;
        storage::save_token(self.credentials.as_ref(), &response.token);
        storage::save_remember_me(
            self.credentials.as_ref(),
            &RememberMe {
                enabled: remember,
                login: Some(login.to_string()),
            },
        );
        self.start(&response.token).await
    }

    /// Start syncing with the stored token.
    pub async fn resume(&self) -> Result<UserProfile> {
        let token =
            storage::load_token(self.credentials.as_ref()).ok_or(SyncError::NotConnected)?;
        self.start(&token).await
    }

    async fn start(&self, token: &str) -> Result<UserProfile> {
        self.session.connect(token).await?;

        let user = self.backend.current_user(token).await?;
        self.store.dispatch(Action::SignedIn { user_id: user.id });
        tracing::info!(user_id = user.id, username = %user.username, "Signed in");

        // Friends first: presence updates are only kept for friends.
        let (chats, friends) =
            tokio::join!(self.backend.chats(token), self.backend.friends(token));
        self.store.dispatch(Action::FriendsLoaded(friends?));
        self.store.dispatch(Action::ChatsLoaded(chats?));

        let controller = ChatSyncController::new(
            self.session.clone(),
            self.backend.history(token),
            self.store.dispatcher(),
            Some(user.id),
        );
        let presence = PresenceTracker::new(
            self.session.clone(),
            self.store.dispatcher(),
            Some(user.id),
            self.config.idle_threshold,
            self.config.idle_check_interval,
        );
        presence.start().await?;

        *self.signed_in.lock() = Some(SignedIn {
            user: user.clone(),
            controller,
            presence,
        });
        Ok(user)
    }

    fn signed_in(&self) -> Result<SignedIn> {
        self.signed_in.lock().clone().ok_or(SyncError::NotConnected)
    }

    pub async fn open_chat(&self, chat: ChatRef) -> Result<()> {
        self.signed_in()?.controller.open_chat(chat).await
    }

    pub async fn close_chat(&self) -> Result<()> {
        self.signed_in()?.controller.close_chat().await;
        Ok(())
    }

    pub async fn send_message(
        &self,
        chat: ChatRef,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<Uuid> {
        self.signed_in()?
            .controller
            .send_message(chat, text, attachment)
            .await
    }

    pub async fn edit_message(&self, chat: ChatRef, id: MessageId, text: &str) -> Result<()> {
        self.signed_in()?.controller.edit_message(chat, id, text).await
    }

    pub async fn delete_message(&self, chat: ChatRef, id: MessageId) -> Result<()> {
        self.signed_in()?.controller.delete_message(chat, id).await
    }

    pub async fn mark_read(&self, chat: ChatRef, id: MessageId) -> Result<()> {
        self.signed_in()?.controller.mark_read(chat, id).await
    }

    /// Report user input to the idle tracker.
    pub async fn record_activity(&self) -> Result<()> {
        self.signed_in()?.presence.record_activity().await
    }

    /// End the authenticated lifetime: disconnect, forget the token and
    /// clear state. The remembered login survives only if remember-me is on.
    pub async fn logout(&self) {
        let signed_in = self.signed_in.lock().take();
        if let Some(signed_in) = signed_in {
            signed_in.controller.stop();
            signed_in.presence.stop();
            signed_in.controller.close_chat().await;
        }
        self.session.disconnect();
        self.session.forget_credentials();
        if !self.remember_me().enabled {
            storage::save_remember_me(self.credentials.as_ref(), &RememberMe::default());
        }
        self.store.dispatch(Action::Reset);
        tracing::info!("Logged out");
    }

    /// Unload: publish offline, then close the session. Credentials are kept.
    pub async fn shutdown(&self) {
        let signed_in = self.signed_in.lock().take();
        if let Some(signed_in) = signed_in {
            signed_in.controller.stop();
            signed_in.presence.shutdown().await;
        }
        self.session.disconnect();
        self.store.flush().await;
        tracing::info!("Client shut down");
    }
}
