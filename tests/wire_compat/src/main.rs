fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use scanrelay_protocol::{
        AuthResponse, CreateTicketRequest, ErrorBody, LoginRequest, RefreshTokenRequest, Ticket,
        TicketStatus, UploadScanResponse,
    };
    use scanrelay_session::Credential;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent). Returns the parsed value.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  ours: {reserialized}"
        );
        parsed
    }

    // --- Auth ---

    #[test]
    fn fixture_login_request() {
        let req = roundtrip_test::<LoginRequest>("login_request.json");
        assert_eq!(req.device_id.as_deref(), Some("5f0c8c52-2a4e-4d7b-9b61-0c2f8e1d7a10"));
    }

    #[test]
    fn fixture_refresh_token_request() {
        roundtrip_test::<RefreshTokenRequest>("refresh_token_request.json");
    }

    #[test]
    fn fixture_auth_response() {
        let resp = roundtrip_test::<AuthResponse>("auth_response.json");
        assert_eq!(resp.lifetime_secs(), 900);
        assert_eq!(resp.user.name.as_deref(), Some("Field Tech"));
    }

    #[test]
    fn fixture_auth_response_without_optional_fields() {
        let resp = roundtrip_test::<AuthResponse>("auth_response_minimal.json");
        assert_eq!(resp.expires_in, None);
        assert_eq!(resp.lifetime_secs(), scanrelay_protocol::DEFAULT_TOKEN_LIFETIME_SECS);
    }

    #[test]
    fn fixture_error_body() {
        roundtrip_test::<ErrorBody>("error_body.json");
        let raw = fs::read(fixtures_dir().join("error_body.json")).unwrap();
        assert_eq!(
            ErrorBody::message_from(&raw).as_deref(),
            Some("Ticket is not in a state that accepts uploads")
        );
    }

    // --- Tickets ---

    #[test]
    fn fixture_create_ticket_request() {
        roundtrip_test::<CreateTicketRequest>("create_ticket_request.json");
    }

    #[test]
    fn fixture_ticket_in_progress() {
        let ticket = roundtrip_test::<Ticket>("ticket.json");
        assert_eq!(ticket.status, TicketStatus::WaitingOutput);
        assert!(!ticket.status.is_terminal());
        assert_eq!(ticket.assigned_engineer_id.as_deref(), Some("usr_03"));
        assert!(!ticket.has_result());
    }

    #[test]
    fn fixture_ticket_completed() {
        let ticket = roundtrip_test::<Ticket>("ticket_completed.json");
        assert!(ticket.status.is_terminal());
        assert!(ticket.has_result());
    }

    #[test]
    fn fixture_ticket_list() {
        let tickets = roundtrip_test::<Vec<Ticket>>("ticket_list.json");
        let statuses: Vec<_> = tickets.iter().map(|t| t.status).collect();
        assert_eq!(statuses, vec![TicketStatus::Failed, TicketStatus::Initiated]);
    }

    #[test]
    fn unknown_ticket_status_is_rejected() {
        let mut fixture = load_fixture("ticket.json");
        fixture["status"] = serde_json::json!("archived");
        assert!(serde_json::from_value::<Ticket>(fixture).is_err());
    }

    #[test]
    fn fixture_upload_scan_response() {
        let resp = roundtrip_test::<UploadScanResponse>("upload_scan_response.json");
        assert_eq!(resp.processing_job_id.as_deref(), Some("job_77"));
    }

    // --- On-disk credential ---

    #[test]
    fn fixture_stored_credential() {
        let credential = roundtrip_test::<Credential>("stored_credential.json");
        assert_eq!(credential.identity.user_id, "usr_17");
    }
}
