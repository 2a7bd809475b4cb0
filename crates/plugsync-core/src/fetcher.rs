use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;

use crate::ci::{ArtifactDescriptor, CiProvider};
use crate::descriptor::Credential;
use crate::error::UpdateError;

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Downloads artifact archives into a local directory.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    downloads_dir: PathBuf,
}

impl ArtifactFetcher {
    #[must_use]
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
        }
    }

    #[must_use]
    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Download `artifact` for `repository_key` into a freshly named archive.
    ///
    /// One attempt per call. The archive is only kept once the download
    /// completes; a failed or cancelled download removes it.
    ///
    /// # Errors
    /// Returns [`UpdateError::DownloadFailed`] on a non-success response, and
    /// transport or I/O errors otherwise.
    pub async fn download(
        &self,
        provider: &dyn CiProvider,
        repository_key: &str,
        artifact: &ArtifactDescriptor,
        credential: Option<&Credential>,
    ) -> Result<PathBuf, UpdateError> {
        tokio::fs::create_dir_all(&self.downloads_dir)
            .await
            .map_err(|error| {
                UpdateError::install_io_with_path(
                    "failed to create downloads directory",
                    &self.downloads_dir,
                    &error,
                )
            })?;

        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let staged = tempfile::Builder::new()
            .prefix(&archive_prefix(repository_key, &timestamp))
            .suffix(".zip")
            .tempfile_in(&self.downloads_dir)
            .map_err(|error| {
                UpdateError::install_io_with_path(
                    "failed to create download file",
                    &self.downloads_dir,
                    &error,
                )
            })?
            .into_temp_path();
        info!(
            "Downloading {} ({}) for {repository_key} to {}",
            artifact.name,
            artifact.artifact_id,
            staged.display()
        );

        provider
            .download_archive(&artifact.download_url, credential, &staged)
            .await?;

        staged.keep().map_err(|error| {
            UpdateError::install_io("failed to keep downloaded archive", error.error)
        })
    }
}

fn archive_prefix(repository_key: &str, timestamp: &str) -> String {
    let key: String = repository_key
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let key = key.trim_start_matches('.');
    let key = if key.is_empty() { "artifact" } else { key };

    format!("{key}-{timestamp}-")
}
