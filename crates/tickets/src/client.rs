//! Authenticated calls to the ticket endpoints.

use std::sync::Arc;

use scanrelay_protocol::{CreateTicketRequest, Ticket};
use scanrelay_session::response::{decode_json, ensure_success};
use scanrelay_session::{ApiError, AuthSession};
use tracing::debug;

/// Ticket API client. Every call goes through
/// [`AuthSession::send_authorized`] and so shares its retry rule.
#[derive(Clone)]
pub struct TicketClient {
    auth: Arc<AuthSession>,
}

impl TicketClient {
    pub fn new(auth: Arc<AuthSession>) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    /// Opens a ticket for this device.
    pub async fn create_ticket(&self, note: Option<&str>) -> Result<Ticket, ApiError> {
        let config = self.auth.config();
        let body = CreateTicketRequest {
            device_id: config.device_id.clone(),
            note: note.map(str::to_string),
        };
        let url = config.tickets_url();
        let resp = self
            .auth
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;
        let ticket: Ticket = decode_json(ensure_success(resp).await?).await?;
        debug!(ticket = %ticket.id, "ticket created");
        Ok(ticket)
    }

    /// Fetches the current state of one ticket.
    pub async fn ticket_status(&self, ticket_id: &str) -> Result<Ticket, ApiError> {
        let url = self.auth.config().ticket_status_url(ticket_id)?;
        let resp = self.auth.send_authorized(|http| http.get(&url)).await?;
        decode_json(ensure_success(resp).await?).await
    }

    /// Lists the user's tickets.
    pub async fn list_tickets(&self) -> Result<Vec<Ticket>, ApiError> {
        let url = self.auth.config().tickets_url();
        let resp = self.auth.send_authorized(|http| http.get(&url)).await?;
        decode_json(ensure_success(resp).await?).await
    }

    /// Downloads the processed result as raw bytes.
    pub async fn download_result(&self, ticket_id: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.auth.config().result_url(ticket_id)?;
        let resp = self.auth.send_authorized(|http| http.get(&url)).await?;
        let bytes = ensure_success(resp)
            .await?
            .bytes()
            .await
            .map_err(ApiError::from_transport)?;
        debug!(ticket = ticket_id, size = bytes.len(), "result downloaded");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use scanrelay_session::testing::{MockResponse, MockServer};
    use scanrelay_session::{ApiConfig, Credential, Identity, MemoryCredentialStore};

    pub(crate) fn ticket_json(id: &str, status: &str) -> String {
        format!(
            r#"{{"id":"{id}","userId":"u1","deviceId":"device-1","status":"{status}","createdAt":"2025-03-01T10:00:00Z","updatedAt":"2025-03-01T10:05:00Z"}}"#
        )
    }

    pub(crate) fn client(server: &MockServer) -> TicketClient {
        let credential = Credential {
            access_token: "a1".into(),
            refresh_token: "r1".into(),
            identity: Identity {
                user_id: "u1".into(),
                email: "u1@example.com".into(),
                role: "surveyor".into(),
            },
            expires_at: Utc::now() + chrono::Duration::seconds(900),
        };
        let auth = AuthSession::new(
            ApiConfig::new(server.url(), "device-1"),
            Arc::new(MemoryCredentialStore::with_credential(credential)),
        )
        .unwrap();
        TicketClient::new(Arc::new(auth))
    }

    #[tokio::test]
    async fn create_ticket_sends_device_and_note() {
        let server =
            MockServer::start(vec![MockResponse::json(201, &ticket_json("t1", "initiated"))]).await;
        let ticket = client(&server).create_ticket(Some("north wing")).await.unwrap();
        assert_eq!(ticket.id, "t1");

        let request = &server.requests()[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/tickets");
        assert_eq!(request.header("authorization"), Some("Bearer a1"));
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["deviceId"], "device-1");
        assert_eq!(body["note"], "north wing");
    }

    #[tokio::test]
    async fn create_ticket_bad_request_surfaces_message() {
        let server = MockServer::start(vec![MockResponse::json(
            400,
            r#"{"message":"note too long"}"#,
        )])
        .await;
        let err = client(&server).create_ticket(None).await.unwrap_err();
        match err {
            ApiError::ServerRejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message.as_deref(), Some("note too long"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_of_unknown_ticket_is_not_found() {
        let server = MockServer::start(vec![MockResponse::json(404, "{}")]).await;
        let err = client(&server).ticket_status("t404").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
        assert!(err.recovery_suggestion().unwrap().contains("deleted"));
        assert_eq!(server.requests()[0].path, "/tickets/t404/status");
    }

    #[tokio::test]
    async fn status_server_error_is_transient() {
        let server = MockServer::start(vec![MockResponse::json(503, "")]).await;
        let err = client(&server).ticket_status("t1").await.unwrap_err();
        assert!(matches!(err, ApiError::ServerRejected { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unknown_status_value_is_malformed() {
        let server =
            MockServer::start(vec![MockResponse::json(200, &ticket_json("t1", "archived"))]).await;
        let err = client(&server).ticket_status("t1").await.unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn list_tickets_decodes_array() {
        let body = format!(
            "[{},{}]",
            ticket_json("t1", "processing"),
            ticket_json("t2", "completed")
        );
        let server = MockServer::start(vec![MockResponse::json(200, &body)]).await;
        let tickets = client(&server).list_tickets().await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert!(tickets[1].status.is_terminal());
    }

    #[tokio::test]
    async fn download_result_returns_raw_bytes() {
        let server = MockServer::start(vec![MockResponse::bytes(200, b"\x00PDF-bytes\xff")]).await;
        let bytes = client(&server).download_result("t1").await.unwrap();
        assert_eq!(bytes, b"\x00PDF-bytes\xff");
        assert_eq!(server.requests()[0].path, "/tickets/t1/result");
    }

    #[tokio::test]
    async fn invalid_ticket_id_sends_nothing() {
        let server = MockServer::start(vec![]).await;
        let err = client(&server).ticket_status("a/b").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidTicketId(_)));
        assert!(server.requests().is_empty());
    }
}
