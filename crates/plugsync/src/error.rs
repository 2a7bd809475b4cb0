use std::path::PathBuf;

use plugsync_core::UpdateError;
use plugsync_platform::AppPathsError;
use thiserror::Error;

use crate::single_instance::AcquireError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to resolve application paths: {0}")]
    Paths(#[from] AppPathsError),

    #[error("failed to read settings {}: {source}", path.display())]
    SettingsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {}: {source}", path.display())]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Instance(#[from] AcquireError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error("no usable repositories configured in {}", .0.display())]
    NoRepositories(PathBuf),

    #[error("{failed} of {attempted} updates could not be installed")]
    UpdatesFailed { failed: usize, attempted: usize },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}
