//! Login, renewal and the retry-on-expiry rule.

use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, RwLock};

use chrono::Utc;
use reqwest::{RequestBuilder, Response, StatusCode};
use scanrelay_protocol::{AuthResponse, ErrorBody, LoginRequest, RefreshTokenRequest};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::credential::{Credential, Identity};
use crate::error::ApiError;
use crate::response::decode_json;
use crate::store::{CredentialStore, StoreError};

/// How many times a request rejected with 401 is refreshed and resent.
pub const MAX_AUTH_RETRIES: u32 = 1;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggingIn,
    Authenticated,
    Refreshing,
}

/// Issues, renews and hands out the device's single live credential.
pub struct AuthSession {
    http: reqwest::Client,
    config: ApiConfig,
    store: Arc<dyn CredentialStore>,
    credential: RwLock<Option<Credential>>,
    state: watch::Sender<AuthState>,
    /// Serializes refreshes so concurrent 401s renew once.
    refresh_lock: Mutex<()>,
    /// Serializes every write to the credential and the store. Holds a
    /// generation bumped by login and logout; a refresh only installs its
    /// result if the generation it started under is still current.
    writer: SyncMutex<u64>,
}

impl AuthSession {
    /// Creates a session with an HTTP client honouring `config.request_timeout`.
    pub fn new(config: ApiConfig, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ApiError::from_transport)?;
        Self::with_client(http, config, store)
    }

    /// Creates a session using an existing HTTP client.
    ///
    /// The initial state only depends on whether a credential is stored;
    /// its expiry is not checked.
    pub fn with_client(
        http: reqwest::Client,
        config: ApiConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ApiError> {
        let credential = match store.load() {
            Ok(credential) => credential,
            Err(StoreError::Json(e)) => {
                warn!(error = %e, "stored credential unreadable, starting logged out");
                store.clear()?;
                None
            }
            Err(e) => return Err(e.into()),
        };

        let initial = if credential.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::LoggedOut
        };
        debug!(state = ?initial, "auth session initialized");

        Ok(Self {
            http,
            config,
            store,
            credential: RwLock::new(credential),
            state: watch::Sender::new(initial),
            refresh_lock: Mutex::new(()),
            writer: SyncMutex::new(0),
        })
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Returns a receiver notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state(),
            AuthState::Authenticated | AuthState::Refreshing
        )
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.read_credential().map(|c| c.identity)
    }

    pub fn credential(&self) -> Option<Credential> {
        self.read_credential()
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchanges email and password for a new credential.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        let previous = self.state();
        self.state.send_replace(AuthState::LoggingIn);

        let result = match self.request_login(email, password).await {
            Ok(credential) => self.install_login(credential),
            Err(e) => Err(e),
        };

        match result {
            Ok(credential) => {
                info!(user = %credential.identity.user_id, "logged in");
                Ok(credential)
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                self.state.send_replace(previous);
                Err(e)
            }
        }
    }

    async fn request_login(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            device_id: Some(self.config.device_id.clone()),
        };
        let resp = self
            .http
            .post(self.config.login_url())
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::InvalidCredentials);
        }
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(ApiError::AuthServer {
                status: status.as_u16(),
                message: ErrorBody::message_from(&body),
            });
        }

        let auth: AuthResponse = decode_json(resp).await?;
        Ok(Credential::from_response(&auth, Utc::now()))
    }

    /// Renews the credential with the stored refresh token.
    ///
    /// Any failure logs the session out before the error is returned.
    pub async fn refresh(&self) -> Result<Credential, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Credential, ApiError> {
        let (refresh_token, generation) = {
            let generation = self.lock_writer();
            let token = self.read_credential().map(|c| c.refresh_token);
            if token.is_some() {
                self.state.send_replace(AuthState::Refreshing);
            }
            (token, *generation)
        };
        let Some(refresh_token) = refresh_token else {
            self.invalidate_if_current(generation);
            return Err(ApiError::AuthFailure("not logged in".into()));
        };

        let result = match self.request_refresh(&refresh_token).await {
            Ok(credential) => self.install_refreshed(credential, generation),
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(credential)) => {
                debug!("credential refreshed");
                Ok(credential)
            }
            Ok(None) => {
                debug!("session changed during refresh, discarding renewed credential");
                self.read_credential()
                    .ok_or_else(|| ApiError::AuthFailure("logged out during refresh".into()))
            }
            Err(e) => {
                warn!(error = %e, "credential refresh failed, logging out");
                self.invalidate_if_current(generation);
                Err(e)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<Credential, ApiError> {
        let body = RefreshTokenRequest {
            token: refresh_token.to_string(),
            device_id: Some(self.config.device_id.clone()),
        };
        let resp = self
            .http
            .post(self.config.refresh_url())
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            let reason = match ErrorBody::message_from(&body) {
                Some(message) => format!("refresh rejected ({}): {message}", status.as_u16()),
                None => format!("refresh rejected ({})", status.as_u16()),
            };
            return Err(ApiError::AuthFailure(reason));
        }

        let auth: AuthResponse = decode_json(resp).await?;
        Ok(Credential::from_response(&auth, Utc::now()))
    }

    /// Returns the stored access token without checking its expiry.
    pub fn get_valid_access_token(&self) -> Option<String> {
        self.read_credential().map(|c| c.access_token)
    }

    /// Returns the stored access token, or [`ApiError::AuthFailure`] when
    /// logged out.
    pub fn require_access_token(&self) -> Result<String, ApiError> {
        self.get_valid_access_token()
            .ok_or_else(|| ApiError::AuthFailure("not logged in".into()))
    }

    /// Clears the credential and marks the session logged out.
    ///
    /// Safe to call when already logged out.
    pub fn logout(&self) -> Result<(), ApiError> {
        {
            let mut generation = self.lock_writer();
            *generation += 1;
            self.clear_cached();
            self.store.clear()?;
        }
        info!("logged out");
        Ok(())
    }

    /// Sends a request with the current bearer token, applying the
    /// single retry rule: on 401 the credential is refreshed once and the
    /// request rebuilt and resent once. A 401 after that is an
    /// [`ApiError::AuthFailure`].
    ///
    /// `build` is called once per attempt and must not set authorization.
    pub async fn send_authorized<F>(&self, mut build: F) -> Result<Response, ApiError>
    where
        F: FnMut(&reqwest::Client) -> RequestBuilder,
    {
        let mut retries = 0u32;
        let mut token = self.require_access_token()?;

        loop {
            let resp = build(&self.http)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(ApiError::from_transport)?;

            if resp.status() != StatusCode::UNAUTHORIZED {
                return Ok(resp);
            }
            if retries >= MAX_AUTH_RETRIES {
                warn!("request rejected again after credential refresh");
                return Err(ApiError::AuthFailure(
                    "request rejected after credential refresh".into(),
                ));
            }
            retries += 1;
            debug!(attempt = retries, "request unauthorized, refreshing credential");
            token = self
                .refresh_rejected(&token)
                .await
                .map_err(ApiError::into_auth_failure)?;
        }
    }

    /// Refreshes unless another caller already replaced `rejected`.
    async fn refresh_rejected(&self, rejected: &str) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.get_valid_access_token()
            && current != rejected
        {
            debug!("credential already renewed by a concurrent request");
            return Ok(current);
        }
        self.refresh_locked().await.map(|c| c.access_token)
    }

    /// Installs a credential from a login and starts a new generation.
    fn install_login(&self, credential: Credential) -> Result<Credential, ApiError> {
        let mut generation = self.lock_writer();
        *generation += 1;
        self.store_locked(&credential)?;
        Ok(credential)
    }

    /// Installs a refreshed credential unless a login or logout happened
    /// since `generation`, in which case it is dropped and `None` returned.
    fn install_refreshed(
        &self,
        credential: Credential,
        generation: u64,
    ) -> Result<Option<Credential>, ApiError> {
        let current = self.lock_writer();
        if *current != generation {
            return Ok(None);
        }
        self.store_locked(&credential)?;
        Ok(Some(credential))
    }

    /// Caller holds the writer lock.
    fn store_locked(&self, credential: &Credential) -> Result<(), ApiError> {
        self.store.save(credential)?;
        *self.credential.write().unwrap_or_else(|e| e.into_inner()) = Some(credential.clone());
        self.state.send_replace(AuthState::Authenticated);
        Ok(())
    }

    /// Logs out unless a login or logout happened since `generation`.
    fn invalidate_if_current(&self, generation: u64) {
        let mut current = self.lock_writer();
        if *current != generation {
            return;
        }
        *current += 1;
        self.clear_cached();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear stored credential");
        }
    }

    fn clear_cached(&self) {
        *self.credential.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.state.send_replace(AuthState::LoggedOut);
    }

    fn lock_writer(&self) -> MutexGuard<'_, u64> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_credential(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
