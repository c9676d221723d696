//! Chatsync client - headless runner
//!
//! Signs in with `CHATSYNC_TOKEN` or the stored token, optionally opens a
//! chat given as `private:<id>` or `group:<id>`, and logs what happens until
//! Ctrl-C.

use anyhow::Context;
use chatsync_client::{storage, ChatClient, ClientConfig};
use chatsync_shared::{ChatKind, ChatRef};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chatsync_client=debug,chatsync_shared=info")),
        )
        .init();

    let config = ClientConfig::from_env()?;
    tracing::info!(api = %config.api_base_url, ws = %config.ws_url, "Starting chatsync client");

    let chat = std::env::args().nth(1).map(|arg| parse_chat(&arg)).transpose()?;

    let client = ChatClient::new(config.clone());
    if let Ok(token) = std::env::var("CHATSYNC_TOKEN") {
        let store = match &config.storage_dir {
            Some(dir) => storage::FileStore::at(dir),
            None => storage::FileStore::platform(),
        };
        storage::save_token(&store, &token);
    }

    let user = client.resume().await.context("sign-in failed")?;
    tracing::info!(user_id = user.id, "Ready");

    if let Some(chat) = chat {
        client.open_chat(chat).await.with_context(|| format!("opening {chat}"))?;
    }

    let mut connection = client.connection_state();
    let mut state = client.state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = connection.borrow_and_update().clone();
                tracing::info!(state = ?current, "Connection state changed");
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                tracing::debug!(
                    chats = snapshot.chats.list.len(),
                    transcript = snapshot.chats.transcript.len(),
                    pending = snapshot.chats.pending.len(),
                    unread = snapshot.chats.total_unread(),
                    online = snapshot.presence.online_friends().len(),
                    "State updated"
                );
            }
        }
    }

    tracing::info!("Shutting down");
    client.shutdown().await;
    Ok(())
}

fn parse_chat(arg: &str) -> anyhow::Result<ChatRef> {
    let (kind, id) = arg
        .split_once(':')
        .with_context(|| format!("expected private:<id> or group:<id>, got {arg}"))?;
    let kind: ChatKind = kind.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
    let id = id.parse().with_context(|| format!("invalid chat id {id}"))?;
    Ok(ChatRef { id, kind })
}
