use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("incomplete configuration for repository '{key}': missing {}", missing.join(", "))]
    ConfigIncomplete {
        key: String,
        missing: Vec<&'static str>,
    },
    #[error("invalid artifact pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid CI API base URL '{url}': {details}")]
    InvalidApiUrl { url: String, details: String },
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("{operation} request failed: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} failed with HTTP {status}{body_snippet}")]
    RemoteUnavailable {
        operation: &'static str,
        status: reqwest::StatusCode,
        body_snippet: String,
    },
    #[error("failed to parse {operation} response: {details}")]
    MalformedResponse {
        operation: &'static str,
        details: String,
    },
    #[error("artifact download failed with HTTP {status}")]
    DownloadFailed { status: reqwest::StatusCode },
    #[error("no successful run of workflow '{workflow}' on branch '{branch}'")]
    NoSuccessfulBuild { workflow: String, branch: String },
    #[error("no artifact of run {build_id} matches '{pattern}' ({available} available)")]
    NoMatchingArtifact {
        build_id: u64,
        pattern: String,
        available: usize,
    },
    #[error("{context}: {source}")]
    InstallIo {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Archive {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{context}: {source}")]
    LedgerIo {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },
    #[error("no pending update for repository '{0}'")]
    NotPending(String),
    #[error("another update cycle is already running")]
    CycleInProgress,
}

impl UpdateError {
    pub(crate) fn request(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Request { operation, source }
    }

    pub(crate) fn malformed(operation: &'static str, details: impl std::fmt::Display) -> Self {
        Self::MalformedResponse {
            operation,
            details: details.to_string(),
        }
    }

    pub(crate) fn install_io(context: &'static str, source: std::io::Error) -> Self {
        Self::InstallIo { context, source }
    }

    pub(crate) fn install_io_with_path(
        context: &'static str,
        path: &Path,
        source: &std::io::Error,
    ) -> Self {
        Self::install_io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    pub(crate) fn archive(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Archive { context, source }
    }

    pub(crate) fn ledger_io(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::LedgerIo {
            context,
            source: std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        }
    }

    /// Conditions that leave a repository without an update but are not
    /// failures of the remote or of the local install.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::ConfigIncomplete { .. }
                | Self::NoSuccessfulBuild { .. }
                | Self::NoMatchingArtifact { .. }
        )
    }

    /// Whether repeating the same remote call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Timeout { .. } => true,
            Self::RemoteUnavailable { status, .. } | Self::DownloadFailed { status } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
