use std::fmt;

use chrono::{DateTime, Duration, Utc};
use scanrelay_protocol::AuthResponse;
use serde::{Deserialize, Serialize};

/// Who the credential was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub role: String,
}

/// Access/refresh token pair issued by one login or refresh.
///
/// Always replaced as a whole so readers never pair tokens from two
/// different issuances.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Builds a credential from an auth response issued at `issued_at`.
    pub fn from_response(resp: &AuthResponse, issued_at: DateTime<Utc>) -> Self {
        let lifetime = i64::try_from(resp.lifetime_secs()).unwrap_or(i64::MAX);
        let expires_at = issued_at
            .checked_add_signed(Duration::seconds(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            access_token: resp.access_token.clone(),
            refresh_token: resp.refresh_token.clone(),
            identity: Identity {
                user_id: resp.user.id.clone(),
                email: resp.user.email.clone(),
                role: resp.user.role.clone(),
            },
            expires_at,
        }
    }

    /// Informational only; requests never consult it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("identity", &self.identity)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
