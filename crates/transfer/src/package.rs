//! `multipart/form-data` assembly.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::TransferError;
use crate::validation::validate_header_value;

/// One named file part of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSpec {
    pub field_name: String,
    pub path: PathBuf,
    pub mime_type: String,
    /// Required parts fail the build when unreadable; optional ones are
    /// left out.
    pub required: bool,
}

impl PartSpec {
    pub fn required(
        field_name: impl Into<String>,
        path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            path: path.into(),
            mime_type: mime_type.into(),
            required: true,
        }
    }

    pub fn optional(
        field_name: impl Into<String>,
        path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(field_name, path, mime_type)
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.field_name.clone())
    }
}

/// A fully encoded multipart body.
#[derive(Debug, Clone)]
pub struct Package {
    boundary: String,
    body: Vec<u8>,
    included: Vec<String>,
}

impl Package {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Field names that made it into the body, in order.
    pub fn included_fields(&self) -> &[String] {
        &self.included
    }
}

/// Generates a boundary token unique to one build.
pub fn new_boundary() -> String {
    format!("Boundary-{}", uuid::Uuid::new_v4().simple())
}

/// Builds a package with a fresh boundary.
pub fn build(parts: &[PartSpec]) -> Result<Package, TransferError> {
    build_with_boundary(parts, &new_boundary())
}

/// Builds a package with the given boundary.
///
/// Output is byte-identical for identical part contents and boundary.
pub fn build_with_boundary(parts: &[PartSpec], boundary: &str) -> Result<Package, TransferError> {
    validate_header_value(boundary)?;

    let mut body = Vec::new();
    let mut included = Vec::with_capacity(parts.len());

    for part in parts {
        let file_name = part.file_name();
        validate_header_value(&part.field_name)?;
        validate_header_value(&file_name)?;
        validate_header_value(&part.mime_type)?;

        let bytes = match read_part(&part.path) {
            Ok(bytes) => bytes,
            Err(e) if part.required => {
                debug!(field = %part.field_name, error = %e, "required part unreadable");
                return Err(TransferError::PartMissing(part.path.clone()));
            }
            Err(e) => {
                debug!(field = %part.field_name, error = %e, "optional part skipped");
                continue;
            }
        };

        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\n",
                part.field_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.mime_type).as_bytes());
        body.extend_from_slice(&bytes);
        body.extend_from_slice(b"\r\n");
        included.push(part.field_name.clone());
    }

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Ok(Package {
        boundary: boundary.to_string(),
        body,
        included,
    })
}

fn read_part(path: &Path) -> io::Result<Vec<u8>> {
    std::fs::read(path)
}
