//! HTTP API client with bearer-token auth.

use std::sync::Arc;

use async_trait::async_trait;
use chatsync_shared::{
    try_problem_detail, ApiError, Chat, ChatMessagePayload, ChatRef, Friend, Message, UserProfile,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::sync::ChatHistory;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// HTTP client for the REST collaborators of the sync core.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            token: None,
        }
    }

    /// Authenticate every request with `token`.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn execute<TRes: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<TRes, ApiError> {
        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            let body = try_problem_detail(&text).unwrap_or(text);
            return Err(ApiError::Http { status, body });
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        self.execute(self.client.get(self.url(path))).await
    }

    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        self.execute(self.client.post(self.url(path)).json(body))
            .await
    }

    // --- Endpoints ---

    /// Exchange credentials for a token. Does not change this client.
    pub async fn login(&self, login: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let request = LoginRequest {
            login: login.to_string(),
            password: password.to_string(),
        };
        self.post_json("/api/auth/login", &request).await
    }

    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.get_json("/api/users/me").await
    }

    pub async fn chats(&self) -> Result<Vec<Chat>, ApiError> {
        self.get_json("/api/chats").await
    }

    pub async fn friends(&self) -> Result<Vec<Friend>, ApiError> {
        self.get_json("/api/friends").await
    }

    /// History of `chat`. The endpoint returns the same payload shape the
    /// chat topic pushes, so it goes through the same decoding.
    pub async fn chat_history(&self, chat: ChatRef) -> Result<Vec<Message>, ApiError> {
        let raw: Vec<serde_json::Value> = self
            .get_json(&format!("/api/chats/{}/{}/messages", chat.kind, chat.id))
            .await?;
        raw.into_iter()
            .map(|value| {
                ChatMessagePayload::decode(chat.kind, value)
                    .map(|payload| payload.into_message(chat.kind))
                    .map_err(|e| ApiError::Deserialize(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl ChatHistory for ApiClient {
    async fn fetch_transcript(&self, chat: ChatRef) -> Result<Vec<Message>, ApiError> {
        self.chat_history(chat).await
    }
}

/// REST collaborators the client needs around one authenticated lifetime.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn login(&self, login: &str, password: &str) -> Result<LoginResponse, ApiError>;
    async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError>;
    async fn chats(&self, token: &str) -> Result<Vec<Chat>, ApiError>;
    async fn friends(&self, token: &str) -> Result<Vec<Friend>, ApiError>;
    /// History source authenticated with `token`.
    fn history(&self, token: &str) -> Arc<dyn ChatHistory>;
}

#[async_trait]
impl Backend for ApiClient {
    async fn login(&self, login: &str, password: &str) -> Result<LoginResponse, ApiError> {
        ApiClient::login(self, login, password).await
    }

    async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError> {
        self.clone().with_token(token).current_user().await
    }

    async fn chats(&self, token: &str) -> Result<Vec<Chat>, ApiError> {
        self.clone().with_token(token).chats().await
    }

    async fn friends(&self, token: &str) -> Result<Vec<Friend>, ApiError> {
        self.clone().with_token(token).friends().await
    }

    fn history(&self, token: &str) -> Arc<dyn ChatHistory> {
        Arc::new(self.clone().with_token(token))
    }
}
