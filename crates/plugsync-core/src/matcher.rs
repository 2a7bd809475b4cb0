use std::fmt;

use log::debug;
use regex::Regex;

use crate::ci::{ArtifactDescriptor, BuildReference, CiProvider};
use crate::descriptor::RepositoryDescriptor;
use crate::error::UpdateError;

/// Artifact name pattern where `*` stands for any run of characters.
///
/// Matching is anchored to the whole name and case-sensitive, so `app-*.jar`
/// accepts `app-1.2.3.jar` but not `other-app-1.2.3.jar.bak`.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    source: String,
    regex: Regex,
}

impl ArtifactPattern {
    /// Compile a wildcard pattern.
    ///
    /// # Errors
    /// Returns [`UpdateError::InvalidPattern`] when the translated expression
    /// cannot be compiled (for example when it exceeds the regex size limit).
    pub fn new(pattern: &str) -> Result<Self, UpdateError> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^(?s:{body})$")).map_err(|source| {
            UpdateError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for ArtifactPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for ArtifactPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for ArtifactPattern {}

/// Artifacts of one build split by the repository's pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactMatches {
    /// Number of artifacts the build published, matching or not.
    pub total: usize,
    pub matched: Vec<ArtifactDescriptor>,
}

impl ArtifactMatches {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

#[must_use]
pub fn select_matching(
    artifacts: Vec<ArtifactDescriptor>,
    pattern: &ArtifactPattern,
) -> ArtifactMatches {
    let total = artifacts.len();
    let matched = artifacts
        .into_iter()
        .filter(|artifact| {
            if !pattern.matches(&artifact.name) {
                return false;
            }
            if artifact.expired {
                debug!(
                    "Ignoring expired artifact {} ({})",
                    artifact.name, artifact.artifact_id
                );
                return false;
            }
            true
        })
        .collect();

    ArtifactMatches { total, matched }
}

/// List the artifacts of `build` and keep those matching the repository's
/// pattern.
///
/// # Errors
/// Returns the provider's error when the artifact listing fails.
pub async fn match_artifacts(
    provider: &dyn CiProvider,
    repository: &RepositoryDescriptor,
    build: &BuildReference,
) -> Result<ArtifactMatches, UpdateError> {
    let artifacts = provider.list_artifacts(repository, build).await?;
    Ok(select_matching(artifacts, &repository.artifact_pattern))
}
