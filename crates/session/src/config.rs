//! Backend endpoint configuration.

use std::time::Duration;

use crate::error::ApiError;

/// Backend used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api/v1";

/// Timeout for ordinary JSON requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for a whole package upload.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Where the backend lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// Base URL without trailing slash, e.g. `https://host/api/v1`.
    pub base_url: String,
    /// Identifier of this device, sent on login, refresh and ticket creation.
    pub device_id: String,
    pub request_timeout: Duration,
    pub upload_timeout: Duration,
}

impl ApiConfig {
    /// Creates a config with default timeouts.
    pub fn new(base_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            device_id: device_id.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    pub fn login_url(&self) -> String {
        format!("{}/auth/login", self.base_url)
    }

    pub fn refresh_url(&self) -> String {
        format!("{}/auth/refresh", self.base_url)
    }

    pub fn tickets_url(&self) -> String {
        format!("{}/tickets", self.base_url)
    }

    pub fn ticket_status_url(&self, ticket_id: &str) -> Result<String, ApiError> {
        self.ticket_url(ticket_id, "status")
    }

    pub fn upload_url(&self, ticket_id: &str) -> Result<String, ApiError> {
        self.ticket_url(ticket_id, "upload")
    }

    pub fn result_url(&self, ticket_id: &str) -> Result<String, ApiError> {
        self.ticket_url(ticket_id, "result")
    }

    fn ticket_url(&self, ticket_id: &str, action: &str) -> Result<String, ApiError> {
        validate_ticket_id(ticket_id)?;
        Ok(format!("{}/tickets/{ticket_id}/{action}", self.base_url))
    }
}

/// Rejects ids that would not survive as a single URL path segment.
pub fn validate_ticket_id(ticket_id: &str) -> Result<(), ApiError> {
    let bad = ticket_id.is_empty()
        || ticket_id == "."
        || ticket_id == ".."
        || ticket_id.chars().any(|c| {
            matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_whitespace() || c.is_control()
        });
    if bad {
        return Err(ApiError::InvalidTicketId(ticket_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_trimmed() {
        let cfg = ApiConfig::new("http://host:3000/api/v1/", "dev");
        assert_eq!(cfg.login_url(), "http://host:3000/api/v1/auth/login");
        assert_eq!(cfg.tickets_url(), "http://host:3000/api/v1/tickets");
    }

    #[test]
    fn ticket_urls() {
        let cfg = ApiConfig::new("http://h/api", "dev");
        assert_eq!(cfg.ticket_status_url("t1").unwrap(), "http://h/api/tickets/t1/status");
        assert_eq!(cfg.upload_url("t1").unwrap(), "http://h/api/tickets/t1/upload");
        assert_eq!(cfg.result_url("t1").unwrap(), "http://h/api/tickets/t1/result");
    }

    #[test]
    fn defaults() {
        let cfg = ApiConfig::new(DEFAULT_BASE_URL, "dev");
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
        assert_eq!(cfg.upload_timeout, Duration::from_secs(300));
    }

    #[test]
    fn rejects_path_breaking_ids() {
        for id in ["", "..", "a/b", "a?b", "a#b", "a b", "%2e"] {
            assert!(validate_ticket_id(id).is_err(), "{id:?} should be rejected");
        }
        assert!(validate_ticket_id("6f1c-42aa").is_ok());
    }
}
