mod support;

use std::sync::Arc;

use chatsync_client::storage::{self, MemoryStore, RememberMe};
use chatsync_client::{ChatClient, ClientConfig, ConnectionState, SyncError};
use chatsync_shared::{destinations, ApiError, Command};
use serde_json::json;

use support::{wait_until, FakeBackend, MockBroker};

struct Setup {
    broker: MockBroker,
    credentials: Arc<MemoryStore>,
    backend: Arc<FakeBackend>,
    client: ChatClient,
}

fn setup() -> Setup {
    let broker = MockBroker::new();
    let credentials = Arc::new(MemoryStore::new());
    let backend = FakeBackend::new(1);
    let client = ChatClient::with_parts(
        ClientConfig::default(),
        Arc::new(broker.clone()),
        credentials.clone(),
        backend.clone(),
    );
    Setup {
        broker,
        credentials,
        backend,
        client,
    }
}

impl Setup {
    fn token(&self) -> Option<String> {
        storage::load_token(self.credentials.as_ref())
    }

    fn remember_me(&self) -> RememberMe {
        storage::load_remember_me(self.credentials.as_ref())
    }

    async fn online_announced(&self) {
        wait_until("the online signal", || {
            self.broker.sent_to(destinations::SELF_CONNECT) == vec![json!({"userId": 1})]
        })
        .await;
    }
}

#[tokio::test]
async fn login_saves_the_token_and_starts_syncing() {
    let s = setup();
    let user = s.client.login("alice", "pw", true).await.unwrap();

    assert_eq!(user.id, 1);
    assert_eq!(s.token().as_deref(), Some("tok-alice"));
    assert_eq!(s.backend.tokens(), vec!["tok-alice".to_string()]);
    let connect = s.broker.frames(Command::Connect);
    assert_eq!(connect[0].get("Authorization"), Some("Bearer tok-alice"));
    s.online_announced().await;

    s.client.store().flush().await;
    assert_eq!(s.client.store().read(|state| state.me), Some(1));
    assert_eq!(s.client.user().map(|u| u.id), Some(1));
}

#[tokio::test]
async fn failed_login_stores_nothing() {
    let s = setup();
    let result = s.client.login("alice", "wrong", true).await;

    assert!(matches!(
        result,
        Err(SyncError::Api(ApiError::Http { status: 401, .. }))
    ));
    assert_eq!(s.token(), None);
    assert_eq!(s.remember_me(), RememberMe::default());
    assert_eq!(s.broker.opens(), 0);
}

#[tokio::test]
async fn resume_needs_a_stored_token() {
    let s = setup();
    assert!(matches!(s.client.resume().await, Err(SyncError::NotConnected)));

    storage::save_token(s.credentials.as_ref(), "stored");
    s.client.resume().await.unwrap();
    assert_eq!(s.backend.tokens(), vec!["stored".to_string()]);
    assert!(s.client.session().is_connected());
}

#[tokio::test]
async fn logout_clears_the_token_and_forgets_the_login() {
    let s = setup();
    s.client.login("alice", "pw", false).await.unwrap();

    s.client.logout().await;

    assert_eq!(s.token(), None);
    assert_eq!(s.remember_me(), RememberMe::default());
    assert!(!s.client.session().is_connected());
    assert!(s.client.session().subscriptions().is_empty());
    assert!(s.client.user().is_none());
    s.client.store().flush().await;
    assert_eq!(s.client.store().read(|state| state.me), None);
    wait_until("DISCONNECT", || s.broker.frames(Command::Disconnect).len() == 1).await;

    // The lazy reconnect path has nothing left to use.
    let sent = s.client.session().send("/app/anything", &json!({})).await;
    assert_eq!(sent, Err(SyncError::NotConnected));
    assert_eq!(s.broker.opens(), 1);
}

#[tokio::test]
async fn logout_keeps_the_remembered_login() {
    let s = setup();
    s.client.login("alice", "pw", true).await.unwrap();

    s.client.logout().await;

    assert_eq!(s.token(), None);
    assert_eq!(
        s.remember_me(),
        RememberMe {
            enabled: true,
            login: Some("alice".into()),
        }
    );
}

#[tokio::test]
async fn shutdown_publishes_offline_before_disconnecting() {
    let s = setup();
    s.client.login("alice", "pw", true).await.unwrap();
    s.online_announced().await;

    s.client.shutdown().await;

    wait_until("DISCONNECT", || s.broker.frames(Command::Disconnect).len() == 1).await;
    let received = s.broker.received();
    let offline = received.iter().position(|f| {
        f.command == Command::Send && f.get("destination") == Some(destinations::SELF_DISCONNECT)
    });
    let disconnect = received.iter().position(|f| f.command == Command::Disconnect);
    assert!(offline.is_some());
    assert!(offline < disconnect);
    assert_eq!(
        s.broker.sent_to(destinations::SELF_DISCONNECT),
        vec![json!({"userId": 1})]
    );

    assert_eq!(*s.client.connection_state().borrow(), ConnectionState::Disconnected);
    // Unload is not logout.
    assert_eq!(s.token().as_deref(), Some("tok-alice"));
}
