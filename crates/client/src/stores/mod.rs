//! Client state and the single task that mutates it.
//!
//! Every change goes through [`ClientState::apply`]. Producers send
//! [`Action`]s through a [`Dispatcher`]; one consumer task applies them in
//! order and publishes the result on a `watch` channel that readers observe.

pub mod chats;
pub mod presence;
pub mod search;

use chatsync_shared::{Chat, ChatRef, Friend, Message, MessageId, PresenceStatus, UserId};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

pub use chats::{ChatsState, PendingMessage};
pub use presence::{PresenceEntry, PresenceState};
pub use search::{filter_chats, SearchAction, SearchResults, SearchState};

/// A state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SignedIn { user_id: UserId },
    ChatsLoaded(Vec<Chat>),
    ChatUpserted(Chat),
    /// Server confirmed the chat is gone.
    ChatRemoved(ChatRef),
    SetActiveChat(Option<ChatRef>),
    TranscriptLoaded { chat: ChatRef, messages: Vec<Message> },
    MessageReceived(Message),
    MessageEdited { id: MessageId, chat: ChatRef, text: String },
    MessageDeleted { id: MessageId, chat: ChatRef },
    MessageRead { id: MessageId, chat: ChatRef },
    UnreadIncremented(ChatRef),
    MessagePending(PendingMessage),
    PendingFailed { local_id: Uuid },
    FriendsLoaded(Vec<Friend>),
    FriendAdded(Friend),
    FriendRemoved(UserId),
    UserStatusChanged {
        user_id: UserId,
        status: PresenceStatus,
        at: DateTime<Utc>,
    },
    Search(SearchAction),
    Reset,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientState {
    pub me: Option<UserId>,
    pub chats: ChatsState,
    pub presence: PresenceState,
    pub search: SearchState,
}

impl ClientState {
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::SignedIn { user_id } => self.me = Some(user_id),
            Action::ChatsLoaded(chats) => self.chats.load_chats(chats),
            Action::ChatUpserted(chat) => self.chats.upsert_chat(chat),
            Action::ChatRemoved(chat) => {
                if self.chats.is_active(chat) {
                    self.search.clear();
                }
                self.chats.remove_chat(chat);
            }
            Action::SetActiveChat(chat) => {
                self.chats.set_active(chat);
                self.search.clear();
            }
            Action::TranscriptLoaded { chat, messages } => {
                self.chats.load_transcript(chat, messages, self.me)
            }
            Action::MessageReceived(message) => self.chats.receive(message, self.me),
            Action::MessageEdited { id, chat, text } => self.chats.edit(id, chat, text),
            Action::MessageDeleted { id, chat } => self.chats.delete(id, chat),
            Action::MessageRead { id, chat } => self.chats.mark_read(id, chat),
            Action::UnreadIncremented(chat) => self.chats.increment_unread(chat),
            Action::MessagePending(pending) => self.chats.add_pending(pending),
            Action::PendingFailed { local_id } => self.chats.drop_pending(local_id),
            Action::FriendsLoaded(friends) => self.presence.load_friends(friends),
            Action::FriendAdded(friend) => self.presence.add_friend(friend),
            Action::FriendRemoved(user_id) => self.presence.remove_friend(user_id),
            Action::UserStatusChanged {
                user_id,
                status,
                at,
            } => {
                self.presence.update(user_id, status, at);
                self.chats.set_member_status(user_id, status);
            }
            Action::Search(action) => self.search.apply(action, &self.chats.transcript),
            Action::Reset => *self = ClientState::default(),
        }
    }

    pub fn search_results(&self) -> SearchResults {
        self.search.results(&self.chats.transcript)
    }

    pub fn filtered_chats(&self, query: &str) -> Vec<&Chat> {
        filter_chats(&self.chats.list, query)
    }
}

enum Envelope {
    Apply(Action),
    Flush(oneshot::Sender<()>),
}

/// Cheap handle for sending actions to the store.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Dispatcher {
    pub fn dispatch(&self, action: Action) {
        if self.tx.send(Envelope::Apply(action)).is_err() {
            tracing::debug!("Store stopped, dropping action");
        }
    }
}

/// Owner of the consumer task. Dropping every `Store` and `Dispatcher`
/// stops it.
#[derive(Clone)]
pub struct Store {
    dispatcher: Dispatcher,
    state: watch::Receiver<ClientState>,
}

impl Store {
    /// Spawn the consumer task on the current runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ClientState::default());
        tokio::spawn(run(rx, state_tx));
        Self {
            dispatcher: Dispatcher { tx },
            state: state_rx,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn dispatch(&self, action: Action) {
        self.dispatcher.dispatch(action);
    }

    /// Wait until every action dispatched before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.dispatcher.tx.send(Envelope::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn snapshot(&self) -> ClientState {
        self.state.borrow().clone()
    }

    /// Read the current state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&ClientState) -> R) -> R {
        f(&self.state.borrow())
    }

    pub fn watch(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Envelope>, state: watch::Sender<ClientState>) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Apply(action) => state.send_modify(|s| s.apply(action)),
            Envelope::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Store consumer stopped");
}
