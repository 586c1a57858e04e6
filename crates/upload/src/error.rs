//! Upload error types.

use std::path::PathBuf;

use scanrelay_session::ApiError;
use scanrelay_transfer::TransferError;

use crate::types::TaskHandle;

/// Failures reported synchronously by [`submit`](crate::UploadOrchestrator::submit)
/// and the other orchestrator calls. No transfer was started.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("missing required part: {0}")]
    MissingRequiredPart(&'static str),

    #[error("required file unreadable: {}", .0.display())]
    PartMissing(PathBuf),

    #[error("failed to stage package: {0}")]
    FileWriteFailed(#[source] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("ticket {0} already has an upload in progress")]
    AlreadyUploading(String),

    #[error("no upload in progress for ticket {0}")]
    NotUploading(String),

    #[error("unknown task {0}")]
    UnknownTask(TaskHandle),

    #[error("transfer events already attached")]
    EventsAlreadyAttached,

    #[error(transparent)]
    Auth(#[from] ApiError),

    #[error("transfer service error: {0}")]
    TransferService(#[from] ServiceError),
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => UploadError::FileWriteFailed(e),
            TransferError::PartMissing(path) => UploadError::PartMissing(path),
            TransferError::InvalidName(name) => UploadError::InvalidName(name),
        }
    }
}

/// Errors returned by a [`TransferService`](crate::TransferService).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("unknown task {0}")]
    UnknownTask(TaskHandle),

    #[error("transfer service unavailable: {0}")]
    Unavailable(String),
}

/// Terminal failure of a started upload, delivered through the
/// completion callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadFailure {
    #[error("network error: {0}")]
    Network(String),

    #[error("server rejected upload ({status}){}", detail(.message))]
    ServerRejected {
        status: u16,
        message: Option<String>,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("upload cancelled")]
    Cancelled,
}

fn detail(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

impl UploadFailure {
    /// Actionable guidance for the user, if any applies.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            UploadFailure::Network(_) => Some("Check your internet connection and try again."),
            UploadFailure::ServerRejected { status, .. } if *status >= 500 => {
                Some("Server error. Please try again later.")
            }
            UploadFailure::ServerRejected { status: 401, .. } => Some("Please log in again."),
            UploadFailure::ServerRejected { status: 404, .. } => {
                Some("The ticket may have been deleted or the ID is incorrect.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_errors_map_to_upload_errors() {
        let err: UploadError = TransferError::Io(std::io::Error::other("disk full")).into();
        assert!(matches!(err, UploadError::FileWriteFailed(_)));

        let err: UploadError = TransferError::PartMissing("a.usdz".into()).into();
        assert!(matches!(err, UploadError::PartMissing(p) if p == PathBuf::from("a.usdz")));
    }

    #[test]
    fn rejected_display() {
        let f = UploadFailure::ServerRejected {
            status: 413,
            message: Some("too large".into()),
        };
        assert_eq!(f.to_string(), "server rejected upload (413): too large");
        assert!(f.recovery_suggestion().is_none());
        assert!(UploadFailure::Network("x".into()).recovery_suggestion().is_some());
    }
}
