//! In-memory broker and history doubles for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chatsync_client::stores::{ClientState, Store};
use chatsync_client::ws::{Connector, Link};
use chatsync_client::api_client::{Backend, LoginResponse};
use chatsync_client::{ChatHistory, SyncError};
use chatsync_shared::{
    ApiError, Chat, ChatRef, Command, Frame, Friend, Message, Sender, UserProfile,
};
use chrono::{TimeZone, Utc};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

/// Poll `cond` until it holds, yielding to other tasks in between.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn wait_for_state(store: &Store, what: &str, cond: impl Fn(&ClientState) -> bool) {
    wait_until(what, || store.read(&cond)).await;
}

struct ClientConn {
    to_client: Option<UnboundedSender<Frame>>,
    subscriptions: HashMap<String, String>,
}

#[derive(Default)]
struct BrokerState {
    opens: usize,
    reject: Option<String>,
    conns: Vec<ClientConn>,
    received: Vec<Frame>,
    next_message_id: u64,
}

/// STOMP broker living in the test process.
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
    handshake_gate: Arc<watch::Sender<bool>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            handshake_gate: Arc::new(gate),
        }
    }

    /// Answer future CONNECT frames with ERROR.
    pub fn reject(&self, reason: &str) {
        self.state.lock().reject = Some(reason.to_string());
    }

    pub fn accept(&self) {
        self.state.lock().reject = None;
    }

    /// Delay CONNECTED replies until `release_handshake`.
    pub fn hold_handshake(&self) {
        self.handshake_gate.send_replace(false);
    }

    pub fn release_handshake(&self) {
        self.handshake_gate.send_replace(true);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Live subscriptions across all connections, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut all: Vec<String> = state
            .conns
            .iter()
            .filter(|c| c.to_client.is_some())
            .flat_map(|c| c.subscriptions.values().cloned())
            .collect();
        all.sort();
        all
    }

    /// Every frame received from clients, in arrival order.
    pub fn received(&self) -> Vec<Frame> {
        self.state.lock().received.clone()
    }

    pub fn frames(&self, command: Command) -> Vec<Frame> {
        self.state
            .lock()
            .received
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }

    /// Bodies of SEND frames published to `destination`.
    pub fn sent_to(&self, destination: &str) -> Vec<serde_json::Value> {
        self.frames(Command::Send)
            .into_iter()
            .filter(|f| f.get("destination") == Some(destination))
            .filter_map(|f| serde_json::from_str(&f.body).ok())
            .collect()
    }

    pub fn publish(&self, destination: &str, body: serde_json::Value) -> usize {
        self.publish_raw(destination, &body.to_string())
    }

    /// Deliver `body` to every subscriber of `destination`. Returns the
    /// number of deliveries.
    pub fn publish_raw(&self, destination: &str, body: &str) -> usize {
        let mut state = self.state.lock();
        state.next_message_id += 1;
        let message_id = state.next_message_id.to_string();
        let mut delivered = 0;
        for conn in &state.conns {
            let Some(tx) = &conn.to_client else { continue };
            for (id, dest) in &conn.subscriptions {
                if dest == destination {
                    let frame = Frame::new(Command::Message)
                        .header("subscription", id.clone())
                        .header("destination", destination)
                        .header("message-id", message_id.clone())
                        .with_body(body);
                    if tx.unbounded_send(frame).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }

    /// Close every connection from the server side.
    pub fn drop_connections(&self) {
        for conn in &mut self.state.lock().conns {
            conn.to_client = None;
            conn.subscriptions.clear();
        }
    }
}

#[async_trait]
impl Connector for MockBroker {
    async fn open(&self, _token: &str) -> Result<Link, SyncError> {
        let (client_tx, mut from_client) = unbounded::<Frame>();
        let (to_client, client_rx) = unbounded::<Frame>();

        let index = {
            let mut state = self.state.lock();
            state.opens += 1;
            state.conns.push(ClientConn {
                to_client: Some(to_client),
                subscriptions: HashMap::new(),
            });
            state.conns.len() - 1
        };

        let state = self.state.clone();
        let mut gate = self.handshake_gate.subscribe();
        tokio::spawn(async move {
            while let Some(frame) = from_client.next().await {
                state.lock().received.push(frame.clone());
                match frame.command {
                    Command::Connect | Command::Stomp => {
                        let _ = gate.wait_for(|open| *open).await;
                        let mut state = state.lock();
                        let reply = match &state.reject {
                            Some(reason) => Frame::new(Command::Error).header("message", reason.clone()),
                            None => Frame::new(Command::Connected)
                                .header("version", "1.2")
                                .header("server", "mock-broker/1.0"),
                        };
                        let rejected = reply.command == Command::Error;
                        if let Some(tx) = &state.conns[index].to_client {
                            let _ = tx.unbounded_send(reply);
                        }
                        if rejected {
                            state.conns[index].to_client = None;
                        }
                    }
                    Command::Subscribe => {
                        if let (Some(id), Some(dest)) = (frame.get("id"), frame.get("destination")) {
                            state.lock().conns[index]
                                .subscriptions
                                .insert(id.to_string(), dest.to_string());
                        }
                    }
                    Command::Unsubscribe => {
                        if let Some(id) = frame.get("id") {
                            state.lock().conns[index].subscriptions.remove(id);
                        }
                    }
                    _ => {}
                }
            }
            // Client closed its side.
            let mut state = state.lock();
            state.conns[index].to_client = None;
            state.conns[index].subscriptions.clear();
        });

        Ok(Link {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}

/// History whose responses can be held back per chat.
#[derive(Default)]
pub struct GatedHistory {
    ready: Mutex<HashMap<ChatRef, Vec<Message>>>,
    held: Mutex<HashMap<ChatRef, oneshot::Receiver<Vec<Message>>>>,
    calls: Mutex<Vec<ChatRef>>,
}

impl GatedHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, chat: ChatRef, messages: Vec<Message>) {
        self.ready.lock().insert(chat, messages);
    }

    /// The next fetch for `chat` waits until the returned sender is used.
    pub fn hold(&self, chat: ChatRef) -> oneshot::Sender<Vec<Message>> {
        let (tx, rx) = oneshot::channel();
        self.held.lock().insert(chat, rx);
        tx
    }

    pub fn calls(&self) -> Vec<ChatRef> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatHistory for GatedHistory {
    async fn fetch_transcript(&self, chat: ChatRef) -> Result<Vec<Message>, ApiError> {
        self.calls.lock().push(chat);
        let held = self.held.lock().remove(&chat);
        match held {
            Some(rx) => rx
                .await
                .map_err(|_| ApiError::Network("history request dropped".into())),
            None => Ok(self.ready.lock().get(&chat).cloned().unwrap_or_default()),
        }
    }
}

/// REST collaborators answering from memory. Any password but `wrong`
/// logs in and yields `tok-<login>`.
pub struct FakeBackend {
    pub user: UserProfile,
    pub chats: Vec<Chat>,
    pub friends: Vec<Friend>,
    pub history: Arc<GatedHistory>,
    tokens: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(user_id: i64) -> Arc<Self> {
        Arc::new(Self {
            user: UserProfile {
                id: user_id,
                username: format!("user{user_id}"),
                nickname: None,
            },
            chats: Vec::new(),
            friends: Vec::new(),
            history: GatedHistory::new(),
            tokens: Mutex::new(Vec::new()),
        })
    }

    /// Tokens the authenticated endpoints were called with.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn login(&self, login: &str, password: &str) -> Result<LoginResponse, ApiError> {
        if password == "wrong" {
            return Err(ApiError::Http {
                status: 401,
                body: "bad credentials".into(),
            });
        }
        Ok(LoginResponse {
            token: format!("tok-{login}"),
        })
    }

    async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError> {
        self.tokens.lock().push(token.to_string());
        Ok(self.user.clone())
    }

    async fn chats(&self, _token: &str) -> Result<Vec<Chat>, ApiError> {
        Ok(self.chats.clone())
    }

    async fn friends(&self, _token: &str) -> Result<Vec<Friend>, ApiError> {
        Ok(self.friends.clone())
    }

    fn history(&self, _token: &str) -> Arc<dyn ChatHistory> {
        self.history.clone()
    }
}

pub fn message(id: i64, chat: ChatRef, sender: i64, text: &str) -> Message {
    Message {
        id,
        chat_id: chat.id,
        kind: chat.kind,
        sender: Sender {
            id: sender,
            username: format!("user{sender}"),
            nickname: None,
        },
        timestamp: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        text: text.to_string(),
        edited: false,
        read: false,
        attachment: None,
    }
}

/// Payload as the broker pushes it on a private chat topic.
pub fn private_push(id: i64, chat_id: i64, sender: i64, text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "privateChatId": chat_id,
        "senderId": sender,
        "senderUsername": format!("user{sender}"),
        "text": text,
        "sendTime": Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap().to_rfc3339(),
    })
}
