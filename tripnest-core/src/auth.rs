//! Authentication providers.
//!
//! The signed-in user is process-wide session state held in a `watch` channel;
//! `subscribe()` replaces the sign-in/sign-out listener callback.
//! - **identity_toolkit**: email/password accounts via the Identity Toolkit REST API
//! - **memory**: local accounts for development and tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::error::TripnestError;
use crate::models::{Credentials, UserIdentity};

const MIN_PASSWORD_LEN: usize = 6;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserIdentity>;

    /// Receiver that observes every sign-in / sign-out.
    fn subscribe(&self) -> watch::Receiver<Option<UserIdentity>>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<UserIdentity, AuthError>;

    async fn sign_up(
        &self,
        credentials: &Credentials,
        display_name: Option<&str>,
    ) -> Result<UserIdentity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email already registered: {0}")]
    EmailInUse(String),

    #[error("Password must be at least 6 characters")]
    WeakPassword,

    #[error("Missing API key")]
    MissingApiKey,
}

impl From<AuthError> for TripnestError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => TripnestError::InvalidCredentials,
            AuthError::EmailInUse(_) | AuthError::WeakPassword => {
                TripnestError::Validation(e.to_string())
            }
            AuthError::MissingApiKey => TripnestError::Other(e.to_string()),
            AuthError::Api { code: 429, .. } => TripnestError::RateLimited(e.to_string()),
            AuthError::Api { .. } | AuthError::Http(_) => TripnestError::Network(e.to_string()),
        }
    }
}

/// Shared holder for the signed-in identity.
#[derive(Debug)]
struct SessionState {
    tx: watch::Sender<Option<UserIdentity>>,
}

impl SessionState {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    fn current(&self) -> Option<UserIdentity> {
        self.tx.borrow().clone()
    }

    fn set(&self, user: Option<UserIdentity>) {
        self.tx.send_replace(user);
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserIdentity>> {
        self.tx.subscribe()
    }
}

// ============================================================================
// Identity Toolkit API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdateRequest<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    email: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// IdentityToolkitClient
// ============================================================================

pub struct IdentityToolkitClient {
    client: Client,
    api_key: String,
    base_url: String,
    session: SessionState,
}

impl IdentityToolkitClient {
    pub fn new(api_key: Option<String>, base_url: String) -> Result<Self, AuthError> {
        let api_key = api_key
            .or_else(|| std::env::var("FIREBASE_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(AuthError::MissingApiKey);
        }

        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            session: SessionState::new(),
        })
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<AccountResponse, AuthError> {
        let url = format!("{}/accounts:{}?key={}", self.base_url, endpoint, self.api_key);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::warn!(code, message = %message, endpoint, "Identity Toolkit error");

            return Err(classify_api_error(code, message));
        }

        Ok(response.json().await?)
    }
}

fn classify_api_error(code: u16, message: String) -> AuthError {
    let reason = message.split([' ', ':']).next().unwrap_or("");
    match reason {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" => {
            AuthError::InvalidCredentials
        }
        "EMAIL_EXISTS" => AuthError::EmailInUse(message),
        "WEAK_PASSWORD" => AuthError::WeakPassword,
        _ => AuthError::Api { code, message },
    }
}

#[async_trait]
impl AuthProvider for IdentityToolkitClient {
    fn current_user(&self) -> Option<UserIdentity> {
        self.session.current()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserIdentity>> {
        self.session.subscribe()
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<UserIdentity, AuthError> {
        let account = self
            .call(
                "signInWithPassword",
                &PasswordRequest {
                    email: &credentials.email,
                    password: &credentials.password,
                    return_secure_token: true,
                },
            )
            .await?;

        let user = UserIdentity {
            uid: account.local_id,
            email: account.email,
            display_name: account.display_name,
        };
        tracing::info!(uid = %user.uid, "Signed in");
        self.session.set(Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        display_name: Option<&str>,
    ) -> Result<UserIdentity, AuthError> {
        let account = self
            .call(
                "signUp",
                &PasswordRequest {
                    email: &credentials.email,
                    password: &credentials.password,
                    return_secure_token: true,
                },
            )
            .await?;

        let mut user = UserIdentity {
            uid: account.local_id,
            email: account.email,
            display_name: account.display_name,
        };

        if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
            self.call(
                "update",
                &ProfileUpdateRequest {
                    id_token: &account.id_token,
                    display_name: name,
                    return_secure_token: false,
                },
            )
            .await?;
            user.display_name = Some(name.to_string());
        }

        tracing::info!(uid = %user.uid, "Account created");
        self.session.set(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.set(None);
        Ok(())
    }

    fn name(&self) -> &str {
        "identity_toolkit"
    }
}

// ============================================================================
// InMemoryAuthProvider
// ============================================================================

struct LocalAccount {
    uid: String,
    password: String,
    display_name: Option<String>,
}

/// Local account registry. Passwords are held in memory for the life of the
/// process only; intended for development and tests.
pub struct InMemoryAuthProvider {
    accounts: Mutex<HashMap<String, LocalAccount>>,
    session: SessionState,
}

impl Default for InMemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuthProvider {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            session: SessionState::new(),
        }
    }

    fn lookup(&self, credentials: &Credentials) -> Result<UserIdentity, AuthError> {
        let accounts = self
            .accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let email = credentials.email.trim().to_lowercase();
        match accounts.get(&email) {
            Some(acct) if acct.password == credentials.password => Ok(UserIdentity {
                uid: acct.uid.clone(),
                email,
                display_name: acct.display_name.clone(),
            }),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    fn register(
        &self,
        credentials: &Credentials,
        display_name: Option<&str>,
    ) -> Result<UserIdentity, AuthError> {
        if credentials.password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let email = credentials.email.trim().to_lowercase();
        let mut accounts = self
            .accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if accounts.contains_key(&email) {
            return Err(AuthError::EmailInUse(email));
        }
        let uid = uuid::Uuid::new_v4().simple().to_string();
        let display_name = display_name.map(str::to_string);
        accounts.insert(
            email.clone(),
            LocalAccount {
                uid: uid.clone(),
                password: credentials.password.clone(),
                display_name: display_name.clone(),
            },
        );
        Ok(UserIdentity {
            uid,
            email,
            display_name,
        })
    }
}

#[async_trait]
impl AuthProvider for InMemoryAuthProvider {
    fn current_user(&self) -> Option<UserIdentity> {
        self.session.current()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserIdentity>> {
        self.session.subscribe()
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<UserIdentity, AuthError> {
        let user = self.lookup(credentials)?;
        self.session.set(Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        display_name: Option<&str>,
    ) -> Result<UserIdentity, AuthError> {
        let user = self.register(credentials, display_name)?;
        self.session.set(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.set(None);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// TESTS
// ============================================================================
