use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture rejected: {0}")]
    Rejected(String),
}

/// Where raw recognition frames are kept as attendance evidence.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Store `image` for `label` at `taken_at`; returns the URL clients use to fetch it.
    async fn store(
        &self,
        label: &str,
        taken_at: DateTime<FixedOffset>,
        image: &[u8],
    ) -> Result<String, CaptureError>;
}

/// File name for a capture: `<label>_<YYYYmmdd_HHMMSS>.jpg`, with path
/// separators and other unsafe characters in the label replaced.
pub fn capture_file_name(label: &str, taken_at: DateTime<FixedOffset>) -> String {
    let safe: String = label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = safe.trim_start_matches('.');
    format!("{safe}_{}.jpg", taken_at.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_capture_file_name() {
        let at = FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 10, 2, 7, 5, 9)
            .unwrap();
        assert_eq!(capture_file_name("Alice", at), "Alice_20251002_070509.jpg");
        assert_eq!(
            capture_file_name("../etc/passwd", at),
            "_etc_passwd_20251002_070509.jpg"
        );
        assert_eq!(capture_file_name("Budi Santoso", at), "Budi Santoso_20251002_070509.jpg");
    }
}
