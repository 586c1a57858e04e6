/// Bytes moved so far for one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    /// `None` while the transfer service has not reported a total.
    pub bytes_total: Option<u64>,
}

impl UploadProgress {
    pub fn new(bytes_sent: u64, bytes_total: Option<u64>) -> Self {
        Self {
            bytes_sent,
            bytes_total,
        }
    }

    /// Fraction complete in `[0.0, 1.0]`.
    ///
    /// Unknown or zero totals report 0; inconsistent reports where more
    /// bytes were sent than the total clamp to 1.
    pub fn fraction(&self) -> f64 {
        match self.bytes_total {
            Some(total) if total > 0 => (self.bytes_sent as f64 / total as f64).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    /// Percentage complete (0-100).
    pub fn percentage(&self) -> f64 {
        self.fraction() * 100.0
    }
}
