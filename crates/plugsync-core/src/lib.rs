//! Core update pipeline for plugsync.
//!
//! This crate keeps plugin artifacts in sync with the latest successful CI
//! build of their repositories:
//! - Repository configuration validation.
//! - Latest-build resolution and artifact listing (GitHub Actions).
//! - Wildcard artifact matching.
//! - The persisted ledger of installed versions.
//! - Archive download, extraction and replacement of installed files.
//! - Check/apply orchestration and periodic scheduling.

mod ci;
mod descriptor;
mod error;
mod fetcher;
mod github;
mod installer;
mod ledger;
mod matcher;
mod pipeline;
mod retry;
mod scheduler;

#[cfg(test)]
mod test_support;

/// CI provider abstraction and the build/artifact model it returns.
pub use ci::{ArtifactDescriptor, BuildReference, CiProvider};
/// Repository settings entries and their validated form.
pub use descriptor::{
    Credential, DEFAULT_ARTIFACT_PATTERN, DEFAULT_BRANCH, RepositoryConfig, RepositoryDescriptor,
    load_descriptors,
};
pub use error::UpdateError;
pub use fetcher::ArtifactFetcher;
/// GitHub Actions provider and HTTP client setup.
pub use github::{DEFAULT_API_BASE_URL, GitHubActions, build_http_client};
pub use installer::{DEFAULT_INSTALLABLE_EXTENSION, InstallOutcome, Installer};
pub use ledger::{VersionLedger, VersionRecord};
pub use matcher::{ArtifactMatches, ArtifactPattern, match_artifacts, select_matching};
/// Check cycles, pending updates and their results.
pub use pipeline::{
    AppliedUpdate, ApplySummary, CheckMode, CheckSummary, PendingUpdate, PipelineOptions,
    RepositoryFailure, UpdatePipeline,
};
pub use scheduler::spawn_periodic_checks;
