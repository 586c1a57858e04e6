//! Scan package assembly and staging.
//!
//! A package is a `multipart/form-data` body built from files on disk,
//! staged to a uniquely named temp file so an out-of-process transfer
//! can read it independently of the caller's lifetime.

mod package;
mod progress;
mod staging;
mod validation;

pub use package::{Package, PartSpec, build, build_with_boundary, new_boundary};
pub use progress::UploadProgress;
pub use staging::{STAGED_PREFIX, STAGED_SUFFIX, StagingArea, staged_ticket};
pub use validation::{validate_file_component, validate_header_value};

use std::path::PathBuf;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required part could not be read.
    #[error("required part unreadable: {}", .0.display())]
    PartMissing(PathBuf),

    #[error("invalid name: {0}")]
    InvalidName(String),
}
