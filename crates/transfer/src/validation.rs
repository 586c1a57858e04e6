use std::path::{Component, Path};

use crate::TransferError;

/// Validates that `name` is a single plain file-name component.
///
/// Rejects:
/// - Empty names
/// - Separators, so the name cannot introduce directories
/// - `.` and `..`
/// - Control characters
pub fn validate_file_component(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }
    if name.contains(['/', '\\']) || name.chars().any(char::is_control) {
        return Err(TransferError::InvalidName(format!(
            "not a plain file name: {name:?}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidName(format!(
            "not a plain file name: {name:?}"
        ))),
    }
}

/// Validates a value placed inside a quoted multipart header parameter.
pub fn validate_header_value(value: &str) -> Result<(), TransferError> {
    if value.is_empty() || value.contains(['"', '\r', '\n']) {
        return Err(TransferError::InvalidName(format!(
            "unusable header value: {value:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_file_component("").is_err());
    }

    #[test]
    fn rejects_parent_dir() {
        assert!(validate_file_component("..").is_err());
        assert!(validate_file_component(".").is_err());
    }

    #[test]
    fn rejects_separators() {
        assert!(validate_file_component("a/b").is_err());
        assert!(validate_file_component("a\\b").is_err());
        assert!(validate_file_component("/etc").is_err());
    }

    #[test]
    fn rejects_control_chars() {
        assert!(validate_file_component("ticket\n1").is_err());
    }

    #[test]
    fn accepts_ticket_like_names() {
        assert!(validate_file_component("t1").is_ok());
        assert!(validate_file_component("3f2b-77aa_x.y").is_ok());
    }

    #[test]
    fn header_values_cannot_break_quoting() {
        assert!(validate_header_value("scan.usdz").is_ok());
        assert!(validate_header_value("a\"b").is_err());
        assert!(validate_header_value("a\r\nX-Injected: 1").is_err());
        assert!(validate_header_value("").is_err());
    }
}
