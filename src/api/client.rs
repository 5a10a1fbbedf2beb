//! API Client
//!
//! Bearer-token HTTP transport for the marketplace backend, plus the session
//! that owns the token and tells listeners when it ends.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::mirror::ANONYMOUS_OWNER;

type SignOutListener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Default)]
struct Credentials {
    token: Option<String>,
    user_id: Option<String>,
}

// == Session ==
/// Signed-in principal: bearer token and owner id.
///
/// The owner id namespaces every cached value. When the session ends, either
/// explicitly or because the server rejected the token, each sign-out
/// listener is called once with the owner id.
pub struct Session {
    credentials: RwLock<Credentials>,
    listeners: Mutex<Vec<SignOutListener>>,
}

impl Session {
    pub fn new(token: Option<String>, user_id: Option<String>) -> Self {
        Self {
            credentials: RwLock::new(Credentials { token, user_id }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(None, None)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_token.clone(), config.user_id.clone())
    }

    pub fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    /// Owner id for resource keys, None for the anonymous bucket.
    pub fn owner_id(&self) -> Option<String> {
        self.read().user_id.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().token.is_some()
    }

    /// Registers a listener called with the owner id when the session ends.
    pub fn on_sign_out(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    /// Drops the token and notifies sign-out listeners. Calling it on an
    /// already ended session does nothing.
    pub fn sign_out(&self) {
        let owner = {
            let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
            if credentials.token.take().is_none() {
                return;
            }
            credentials
                .user_id
                .clone()
                .unwrap_or_else(|| ANONYMOUS_OWNER.to_string())
        };

        info!("Session for {} ended", owner);
        let listeners: Vec<SignOutListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener(&owner);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Credentials> {
        self.credentials.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let credentials = self.read();
        f.debug_struct("Session")
            .field("authenticated", &credentials.token.is_some())
            .field("user_id", &credentials.user_id)
            .finish()
    }
}

// == Api Client ==
/// HTTP client for the marketplace API.
///
/// Every request carries the session's bearer token. A 401 or 403 ends the
/// session and comes back as [`SyncError::Auth`]; any other failure status is
/// a [`SyncError::Transport`].
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
}

impl ApiClient {
    pub fn new(base_url: &str, session: Arc<Session>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn from_config(config: &Config, session: Arc<Session>) -> Result<Self> {
        Self::new(&config.api_url, session, config.request_timeout())
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with query parameters and return the JSON body.
    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let request = self.request(Method::GET, path)?.query(query);
        self.send(request).await
    }

    /// POST `body` as JSON to `path` and return the JSON body, Null if empty.
    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let request = self.request(Method::POST, path)?.json(body);
        self.send(request).await
    }

    /// POST without a body.
    pub async fn post_empty(&self, path: &str) -> Result<Value> {
        let request = self.request(Method::POST, path)?;
        self.send(request).await
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self
            .session
            .token()
            .ok_or_else(|| SyncError::Auth("Not signed in".to_string()))?;
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!("Server rejected the session ({})", status);
            self.session.sign_out();
            return Err(SyncError::Auth(format!("Server responded {}", status)));
        }

        let text = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Transport(failure_message(status, &text)));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| SyncError::Shape(format!("Response is not JSON: {}", e)))
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("session", &self.session)
            .finish()
    }
}

/// Builds a transport error message, using the backend's own message when
/// the body carries one.
fn failure_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["message", "detail", "error"]
            .iter()
            .find_map(|field| v.get(field).and_then(Value::as_str).map(str::to_string))
    });
    match detail {
        Some(detail) => format!("HTTP {}: {}", status, detail),
        None => format!("HTTP {}", status),
    }
}
