use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-side lifecycle of a ticket.
///
/// The variants up to [`Completed`](Self::Completed) form a total
/// progression; [`Failed`](Self::Failed) is reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Initiated,
    Uploading,
    WaitingAssignment,
    Assigned,
    Processing,
    WaitingOutput,
    Completed,
    Failed,
}

impl TicketStatus {
    /// The ordered progression, excluding the out-of-band `Failed` state.
    pub const PROGRESSION: [TicketStatus; 7] = [
        TicketStatus::Initiated,
        TicketStatus::Uploading,
        TicketStatus::WaitingAssignment,
        TicketStatus::Assigned,
        TicketStatus::Processing,
        TicketStatus::WaitingOutput,
        TicketStatus::Completed,
    ];

    /// Returns `true` for `completed` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Completed | TicketStatus::Failed)
    }

    /// Position in [`PROGRESSION`](Self::PROGRESSION); `None` for `Failed`.
    pub fn stage(self) -> Option<usize> {
        Self::PROGRESSION.iter().position(|s| *s == self)
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Initiated => "initiated",
            TicketStatus::Uploading => "uploading",
            TicketStatus::WaitingAssignment => "waiting_assignment",
            TicketStatus::Assigned => "assigned",
            TicketStatus::Processing => "processing",
            TicketStatus::WaitingOutput => "waiting_output",
            TicketStatus::Completed => "completed",
            TicketStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ticket as returned by `GET /tickets`, `GET /tickets/{id}/status`
/// and `POST /tickets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_engineer_id: Option<String>,
    pub device_id: String,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Ticket {
    /// Returns `true` once the processed result can be downloaded.
    pub fn has_result(&self) -> bool {
        self.status == TicketStatus::Completed && self.result_url.is_some()
    }
}

/// Body of `POST /tickets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Response of `POST /tickets/{id}/upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadScanResponse {
    pub scan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_job_id: Option<String>,
    pub ticket_status: String,
    pub message: String,
}
