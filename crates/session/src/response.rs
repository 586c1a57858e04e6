//! Status-code and body handling shared by the ticket endpoints.

use reqwest::{Response, StatusCode};
use scanrelay_protocol::ErrorBody;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Passes 2xx responses through and maps everything else onto [`ApiError`].
///
/// 404 becomes [`ApiError::NotFound`]; other statuses keep the server's
/// `{message}` when one is present.
pub async fn ensure_success(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }
    let body = resp.bytes().await.unwrap_or_default();
    Err(ApiError::ServerRejected {
        status: status.as_u16(),
        message: ErrorBody::message_from(&body),
    })
}

/// Reads the body and parses it as JSON.
pub async fn decode_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let body = resp.bytes().await.map_err(ApiError::from_transport)?;
    serde_json::from_slice(&body).map_err(|e| ApiError::MalformedResponse(e.to_string()))
}
