//! Resilient scan upload.
//!
//! The [`UploadOrchestrator`] packages a scan, stages it to disk and hands
//! it to a [`TransferService`], which moves the bytes on its own schedule
//! and reports back through events keyed by [`TaskHandle`]. The
//! orchestrator routes those events to the ticket that started the
//! transfer and cleans up exactly once per task.
//!
//! [`HttpTransferService`] is the in-process transfer service used by the
//! CLI. Platforms with a system background-transfer facility implement
//! [`TransferService`] on top of it instead.

pub mod error;
pub mod http_service;
pub mod orchestrator;
pub mod service;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{ServiceError, UploadError, UploadFailure};
pub use http_service::HttpTransferService;
pub use orchestrator::{
    BackgroundCompletionHandler, CompletionSink, ProgressSink, Recovered, RecoveredCompletion,
    UploadOrchestrator,
};
pub use scanrelay_transfer::UploadProgress;
pub use service::{BoxFuture, TransferService};
pub use types::{
    AliveTask, ScanFiles, TaskHandle, TransferEvent, TransferOutcome, TransferRequest,
    TransportError,
};
