//! Data types shared by the orchestrator and transfer services.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use scanrelay_transfer::PartSpec;

use crate::error::UploadError;

/// Opaque identifier the transfer service assigns to one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// The files that make up one scan submission.
///
/// The first four are mandatory; `metadata_json` is attached only when
/// present and readable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFiles {
    pub usdz: Option<PathBuf>,
    pub scan_json: Option<PathBuf>,
    pub gps_json: Option<PathBuf>,
    pub motion_log_json: Option<PathBuf>,
    pub metadata_json: Option<PathBuf>,
}

impl ScanFiles {
    pub fn new(
        usdz: impl Into<PathBuf>,
        scan_json: impl Into<PathBuf>,
        gps_json: impl Into<PathBuf>,
        motion_log_json: impl Into<PathBuf>,
    ) -> Self {
        Self {
            usdz: Some(usdz.into()),
            scan_json: Some(scan_json.into()),
            gps_json: Some(gps_json.into()),
            motion_log_json: Some(motion_log_json.into()),
            metadata_json: None,
        }
    }

    pub fn with_metadata(mut self, metadata_json: impl Into<PathBuf>) -> Self {
        self.metadata_json = Some(metadata_json.into());
        self
    }

    /// Maps the files onto multipart parts in wire order.
    pub fn parts(&self) -> Result<Vec<PartSpec>, UploadError> {
        let mandatory = [
            ("scan_usdz", &self.usdz, "model/vnd.usdz+zip"),
            ("scan_json", &self.scan_json, "application/json"),
            ("gps_json", &self.gps_json, "application/json"),
            ("motion_log_json", &self.motion_log_json, "application/json"),
        ];

        let mut parts = Vec::with_capacity(5);
        for (field, path, mime) in mandatory {
            let path = path.as_ref().ok_or(UploadError::MissingRequiredPart(field))?;
            parts.push(PartSpec::required(field, path, mime));
        }
        if let Some(path) = &self.metadata_json {
            parts.push(PartSpec::optional("metadata_json", path, "application/json"));
        }
        Ok(parts)
    }
}

/// Everything a transfer service needs to send one staged package.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// Why a transfer ended without a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Cancelled,
    Failed(String),
}

/// Terminal result of one transfer as the service saw it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    pub status: Option<u16>,
    pub body: Vec<u8>,
    pub error: Option<TransportError>,
}

impl TransferOutcome {
    pub fn response(status: u16, body: Vec<u8>) -> Self {
        Self {
            status: Some(status),
            body,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(TransportError::Failed(reason.into())),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            error: Some(TransportError::Cancelled),
            ..Self::default()
        }
    }
}

/// Events emitted by a transfer service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Progress {
        handle: TaskHandle,
        bytes_sent: u64,
        bytes_total: Option<u64>,
    },
    /// Exactly one per task, after all of its progress events.
    Completed {
        handle: TaskHandle,
        outcome: TransferOutcome,
    },
    /// All outstanding tasks have finished.
    EventsDrained,
}

/// A task the service still owns, possibly started by an earlier process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliveTask {
    pub handle: TaskHandle,
    pub source: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_in_wire_order() {
        let files = ScanFiles::new("a.usdz", "scan.json", "gps.json", "motion.json")
            .with_metadata("meta.json");
        let parts = files.parts().unwrap();
        let names: Vec<_> = parts.iter().map(|p| p.field_name.as_str()).collect();
        assert_eq!(
            names,
            ["scan_usdz", "scan_json", "gps_json", "motion_log_json", "metadata_json"]
        );
        assert_eq!(parts[0].mime_type, "model/vnd.usdz+zip");
        assert!(parts[..4].iter().all(|p| p.required));
        assert!(!parts[4].required);
    }

    #[test]
    fn metadata_is_optional() {
        let files = ScanFiles::new("a.usdz", "scan.json", "gps.json", "motion.json");
        assert_eq!(files.parts().unwrap().len(), 4);
    }

    #[test]
    fn absent_mandatory_part_is_named() {
        let mut files = ScanFiles::new("a.usdz", "scan.json", "gps.json", "motion.json");
        files.gps_json = None;
        assert!(matches!(
            files.parts(),
            Err(UploadError::MissingRequiredPart("gps_json"))
        ));
    }

    #[test]
    fn handle_display() {
        assert_eq!(TaskHandle(7).to_string(), "task-7");
    }
}
