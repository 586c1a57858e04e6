//! Durable temp storage for built packages.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::TransferError;
use crate::validation::validate_file_component;

/// Prefix of every staged file name.
pub const STAGED_PREFIX: &str = "upload_";
/// Suffix of every staged file name.
pub const STAGED_SUFFIX: &str = ".tmp";

/// Directory holding staged packages, named
/// `upload_<ticket>_<unique>.tmp`.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` to a new file and flushes it to disk.
    ///
    /// Never overwrites: every call yields a distinct path.
    pub fn stage(&self, ticket_id: &str, bytes: &[u8]) -> Result<PathBuf, TransferError> {
        validate_file_component(ticket_id)?;
        std::fs::create_dir_all(&self.dir)?;

        let name = format!(
            "{STAGED_PREFIX}{ticket_id}_{}{STAGED_SUFFIX}",
            uuid::Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);

        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }

        debug!(path = %path.display(), size = bytes.len(), "package staged");
        Ok(path)
    }

    /// Deletes a staged file. Already-deleted files are not an error.
    pub fn release(&self, path: &Path) -> Result<(), TransferError> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "staged package released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists staged files currently on disk.
    pub fn staged_files(&self) -> Result<Vec<PathBuf>, TransferError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if staged_ticket(&path).is_some() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Extracts the ticket id from a staged file's name.
pub fn staged_ticket(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let inner = name.strip_prefix(STAGED_PREFIX)?.strip_suffix(STAGED_SUFFIX)?;
    let (ticket, unique) = inner.rsplit_once('_')?;
    if ticket.is_empty() || unique.is_empty() {
        return None;
    }
    Some(ticket.to_string())
}
