//! Error taxonomy shared by every component that talks to the backend.

use crate::store::StoreError;

/// Errors produced by authenticated backend calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Login rejected the email/password pair.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Login failed with a non-2xx status other than 401.
    #[error("authentication server error {status}{}", detail(.message))]
    AuthServer {
        status: u16,
        message: Option<String>,
    },

    /// No usable credential: refresh failed or a refreshed token was
    /// rejected again. The session is logged out when refresh fails.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Timeout, refused connection or other transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response that is not an authorization problem.
    #[error("server rejected request ({status}){}", detail(.message))]
    ServerRejected {
        status: u16,
        message: Option<String>,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("ticket not found")]
    NotFound,

    #[error("invalid ticket id: {0:?}")]
    InvalidTicketId(String),

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

fn detail(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

impl ApiError {
    /// Classifies a `reqwest` failure.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::MalformedResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// `true` for failures worth retrying later without user action.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::ServerRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// `true` when the user has to log in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::InvalidCredentials | ApiError::AuthFailure(_))
    }

    /// Actionable guidance for the user, if any applies.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ApiError::Network(_) => Some("Check your internet connection and try again."),
            ApiError::ServerRejected { status, .. } if *status >= 500 => {
                Some("Server error. Please try again later.")
            }
            ApiError::AuthServer { status, .. } if *status >= 500 => {
                Some("Server error. Please try again later.")
            }
            ApiError::NotFound => Some("The ticket may have been deleted or the ID is incorrect."),
            ApiError::InvalidCredentials | ApiError::AuthFailure(_) => Some("Please log in again."),
            _ => None,
        }
    }

    /// Refresh failures other than connectivity are unrecoverable.
    pub(crate) fn into_auth_failure(self) -> Self {
        match self {
            ApiError::Network(_) | ApiError::AuthFailure(_) => self,
            other => ApiError::AuthFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_server_message() {
        let err = ApiError::ServerRejected {
            status: 400,
            message: Some("note too long".into()),
        };
        assert_eq!(err.to_string(), "server rejected request (400): note too long");

        let err = ApiError::ServerRejected {
            status: 502,
            message: None,
        };
        assert_eq!(err.to_string(), "server rejected request (502)");
    }

    #[test]
    fn guidance_is_distinct_per_class() {
        let network = ApiError::Network("timed out".into()).recovery_suggestion();
        let server = ApiError::ServerRejected {
            status: 503,
            message: None,
        }
        .recovery_suggestion();
        let missing = ApiError::NotFound.recovery_suggestion();

        assert!(network.unwrap().contains("connection"));
        assert!(server.unwrap().contains("later"));
        assert!(missing.unwrap().contains("deleted"));
        assert_ne!(network, server);
        assert_ne!(server, missing);
    }

    #[test]
    fn client_errors_have_no_retry_guidance() {
        let err = ApiError::ServerRejected {
            status: 422,
            message: None,
        };
        assert!(err.recovery_suggestion().is_none());
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classification() {
        assert!(ApiError::Network("x".into()).is_transient());
        assert!(
            ApiError::ServerRejected {
                status: 500,
                message: None
            }
            .is_transient()
        );
        assert!(!ApiError::NotFound.is_transient());
        assert!(!ApiError::AuthFailure("x".into()).is_transient());
    }

    #[test]
    fn refresh_errors_collapse_to_auth_failure() {
        let err = ApiError::MalformedResponse("eof".into()).into_auth_failure();
        assert!(matches!(err, ApiError::AuthFailure(_)));
        let err = ApiError::Network("down".into()).into_auth_failure();
        assert!(matches!(err, ApiError::Network(_)));
    }
}
