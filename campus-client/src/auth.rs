//! Email/password authentication against the hosted auth service.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::rest::{build_headers, RestClient};
use campus_core::{AuthUser, RemoteError, SignInForm, SignUpForm, Table, Timestamp};
use chrono::{Duration as ChronoDuration, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// SESSION
// ============================================================================

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: Arc<SecretString>,
    pub refresh_token: Option<Arc<SecretString>>,
    pub expires_at: Option<Timestamp>,
    pub user: AuthUser,
}

/// Shared slot holding the current session, read by every outgoing request.
#[derive(Debug, Clone, Default)]
pub struct SessionStore(Arc<RwLock<Option<Session>>>);

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Session> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, session: Session) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn access_token(&self) -> Option<Arc<SecretString>> {
        self.get().map(|s| s.access_token)
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.get().map(|s| s.user)
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            access_token: Arc::new(SecretString::new(self.access_token.into())),
            refresh_token: self
                .refresh_token
                .map(|token| Arc::new(SecretString::new(token.into()))),
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
            user: self.user,
        }
    }
}

/// Sign-up answers with a session when confirmation is off, or just the
/// user when an email confirmation is pending.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

/// Best message found in an auth error body.
pub fn auth_rejection(status: u16, body: &str) -> RemoteError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body));
    RemoteError::rejected(status, message)
}

// ============================================================================
// CLIENT
// ============================================================================

#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    auth_url: String,
    anon_key: Arc<SecretString>,
    sessions: SessionStore,
    rest: RestClient,
}

impl AuthClient {
    pub fn new(
        config: &ClientConfig,
        sessions: SessionStore,
        rest: RestClient,
    ) -> Result<Self, ClientError> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            auth_url: config.auth_url(),
            anon_key: Arc::new(SecretString::new(config.anon_key.clone().into())),
            sessions,
            rest,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Register an account, then create its `users` row.
    ///
    /// A failed row insert is logged and does not fail the sign-up.
    pub async fn sign_up(&self, form: &SignUpForm) -> Result<AuthUser, ClientError> {
        form.validate()?;
        let email = form.normalized_email();
        let body = serde_json::json!({ "email": email, "password": form.password });
        let response = self
            .client
            .post(format!("{}/signup", self.auth_url))
            .headers(build_headers(&self.anon_key, None)?)
            .json(&body)
            .send()
            .await?;
        let user = match parse_auth_response::<SignUpResponse>(response).await? {
            SignUpResponse::Session(token) => {
                let session = token.into_session();
                let user = session.user.clone();
                self.sessions.set(session);
                user
            }
            SignUpResponse::User(user) => user,
        };
        info!(user_id = %user.id, "signed up");

        let row = serde_json::json!({
            "id": user.id,
            "email": user.email.clone().unwrap_or_else(|| email.to_string()),
        });
        if let Err(err) = self.rest.insert_value(Table::Users, &row).await {
            warn!(user_id = %user.id, error = %err, "failed to insert users row after sign-up");
        }
        Ok(user)
    }

    pub async fn sign_in(&self, form: &SignInForm) -> Result<AuthUser, ClientError> {
        form.validate()?;
        let body = serde_json::json!({
            "email": form.normalized_email(),
            "password": form.password,
        });
        let response = self
            .client
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", "password")])
            .headers(build_headers(&self.anon_key, None)?)
            .json(&body)
            .send()
            .await?;
        let session = parse_auth_response::<TokenResponse>(response)
            .await?
            .into_session();
        let user = session.user.clone();
        self.sessions.set(session);
        info!(user_id = %user.id, "signed in");
        Ok(user)
    }

    /// End the session. The local session is cleared even if the remote call fails.
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        let Some(token) = self.sessions.access_token() else {
            return Ok(());
        };
        self.sessions.clear();
        let response = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .headers(build_headers(&self.anon_key, Some(token.as_ref()))?)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            return Err(auth_rejection(status.as_u16(), &text).into());
        }
        info!("signed out");
        Ok(())
    }

    /// The signed-in user, from the local session.
    pub fn current_user(&self) -> Option<AuthUser> {
        self.sessions.current_user()
    }

    /// Ask the auth service who the session belongs to.
    pub async fn fetch_user(&self) -> Result<Option<AuthUser>, ClientError> {
        let Some(token) = self.sessions.access_token() else {
            return Ok(None);
        };
        let response = self
            .client
            .get(format!("{}/user", self.auth_url))
            .headers(build_headers(&self.anon_key, Some(token.as_ref()))?)
            .send()
            .await?;
        Ok(Some(parse_auth_response::<AuthUser>(response).await?))
    }
}

async fn parse_auth_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    let text = response.text().await?;
    if status.is_success() {
        Ok(serde_json::from_str(&text)?)
    } else {
        Err(auth_rejection(status.as_u16(), &text).into())
    }
}
