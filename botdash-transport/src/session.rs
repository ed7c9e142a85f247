//! Session credential shared by the REST client and the auth topics.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::{EventChannel, SubscriptionId, TransportError, TransportResult};

pub const AUTH_TOKEN_TOPIC: &str = "auth-token";
pub const AUTH_URL_TOPIC: &str = "auth-url";
pub const REQUEST_AUTH_URL_TOPIC: &str = "request-auth-url";

type LogoutHook = Arc<dyn Fn() + Send + Sync>;

/// Holds the optional bearer credential for the current session.
#[derive(Clone, Default)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Default)]
struct SessionInner {
    token: RwLock<Option<String>>,
    logout_hooks: RwLock<Vec<LogoutHook>>,
}

impl Session {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        let session = Self::default();
        session.set_token(token);
        session
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.inner.token.read().clone()
    }

    pub fn set_token(&self, token: Option<String>) {
        let token = token.filter(|value| !value.is_empty());
        *self.inner.token.write() = token;
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.inner.token.read().is_some()
    }

    /// Register the collaborator that reacts to a forced logout (e.g. a login redirect).
    pub fn on_logout<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.logout_hooks.write().push(Arc::new(hook));
    }

    /// Drop the credential and notify every registered hook.
    pub fn logout(&self) {
        self.set_token(None);
        let hooks = self.inner.logout_hooks.read().clone();
        for hook in hooks {
            hook();
        }
    }

    /// Store tokens pushed by the server on `auth-token` once the user finishes logging in.
    pub fn listen_for_token(&self, channel: &dyn EventChannel) -> SubscriptionId {
        let session = self.clone();
        channel.subscribe(
            AUTH_TOKEN_TOPIC,
            Arc::new(move |payload: &Value| {
                match payload.get("token").and_then(Value::as_str) {
                    Some(token) if !token.is_empty() => {
                        info!("authentication successful, received session token");
                        session.set_token(Some(token.to_string()));
                    }
                    _ => error!("authentication failed: no token received"),
                }
            }),
        )
    }
}

/// Ask the server for a provider login URL and wait for the `auth-url` reply.
pub async fn request_auth_url(
    channel: &dyn EventChannel,
    provider: &str,
    wait: Duration,
) -> TransportResult<String> {
    let (tx, rx) = oneshot::channel::<Option<String>>();
    let tx = Mutex::new(Some(tx));
    let id = channel.subscribe(
        AUTH_URL_TOPIC,
        Arc::new(move |payload: &Value| {
            let url = payload
                .get("url")
                .and_then(Value::as_str)
                .filter(|url| !url.is_empty())
                .map(str::to_string);
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(url);
            }
        }),
    );
    let outcome = match channel.emit(REQUEST_AUTH_URL_TOPIC, json!({ "provider": provider })) {
        Ok(()) => tokio::time::timeout(wait, rx).await,
        Err(err) => {
            channel.unsubscribe(id);
            return Err(err);
        }
    };
    channel.unsubscribe(id);
    match outcome {
        Ok(Ok(Some(url))) => Ok(url),
        Ok(Ok(None)) => Err(TransportError::InvalidRequest(
            "server did not return a valid auth url".into(),
        )),
        Ok(Err(_)) => Err(TransportError::Closed),
        Err(_) => Err(TransportError::Transport(format!(
            "timed out after {}s waiting for auth url",
            wait.as_secs()
        ))),
    }
}
