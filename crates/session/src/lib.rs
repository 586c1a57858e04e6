//! Authenticated session for the scan-relay backend.
//!
//! Provides the persisted [`Credential`], the [`AuthSession`] that issues
//! and renews it, and the single retry-on-expiry rule every authenticated
//! request goes through ([`AuthSession::send_authorized`]).

pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod response;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use auth::{AuthSession, AuthState, MAX_AUTH_RETRIES};
pub use config::ApiConfig;
pub use credential::{Credential, Identity};
pub use error::ApiError;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError};
