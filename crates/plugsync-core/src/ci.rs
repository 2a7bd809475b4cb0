use std::path::Path;

use async_trait::async_trait;

use crate::descriptor::{Credential, RepositoryDescriptor};
use crate::error::UpdateError;

/// One successful execution of a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReference {
    pub build_id: u64,
    pub branch: String,
}

/// A named, downloadable output of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub artifact_id: u64,
    pub download_url: String,
    pub size_in_bytes: Option<u64>,
    pub expired: bool,
}

/// Access to a CI service's builds and artifacts.
#[async_trait]
pub trait CiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Most recent successful build of the repository's workflow on its
    /// branch, or `None` when the workflow has never succeeded there.
    async fn latest_successful_build(
        &self,
        repository: &RepositoryDescriptor,
    ) -> Result<Option<BuildReference>, UpdateError>;

    async fn list_artifacts(
        &self,
        repository: &RepositoryDescriptor,
        build: &BuildReference,
    ) -> Result<Vec<ArtifactDescriptor>, UpdateError>;

    /// Write the archive behind `download_url` to `dest`, returning the
    /// number of bytes written. Performs exactly one attempt.
    async fn download_archive(
        &self,
        download_url: &str,
        credential: Option<&Credential>,
        dest: &Path,
    ) -> Result<u64, UpdateError>;
}
