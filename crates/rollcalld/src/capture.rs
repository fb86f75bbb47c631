use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use rollcall_core::capture::capture_file_name;
use rollcall_core::{CaptureError, CaptureStore};
use std::path::{Path, PathBuf};

/// URL prefix under which the HTTP server exposes `FsCaptureStore::root`.
pub const IMAGES_ROUTE: &str = "/images";

/// Keeps raw recognition frames as files in one directory.
pub struct FsCaptureStore {
    root: PathBuf,
}

impl FsCaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CaptureStore for FsCaptureStore {
    async fn store(
        &self,
        label: &str,
        taken_at: DateTime<FixedOffset>,
        image: &[u8],
    ) -> Result<String, CaptureError> {
        if image.is_empty() {
            return Err(CaptureError::Rejected("empty frame".into()));
        }
        tokio::fs::create_dir_all(&self.root).await?;
        let name = capture_file_name(label, taken_at);
        tokio::fs::write(self.root.join(&name), image).await?;
        tracing::debug!(%label, file = %name, bytes = image.len(), "capture stored");
        Ok(format!("{IMAGES_ROUTE}/{name}"))
    }
}
