use std::collections::BTreeMap;
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::matcher::ArtifactPattern;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_ARTIFACT_PATTERN: &str = "*.jar";

/// Secret used to authenticate CI API calls and downloads.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token, treating blank values as "no credential".
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        (!token.is_empty()).then(|| Self(token.to_string()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// A repository entry as written in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub repo: Option<String>,

    /// Workflow file name (`build.yml`) or numeric workflow id.
    #[serde(default, deserialize_with = "deserialize_workflow")]
    pub workflow: Option<String>,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default = "default_artifact_pattern")]
    pub artifact: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default)]
    pub auto_update: bool,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_artifact_pattern() -> String {
    DEFAULT_ARTIFACT_PATTERN.to_string()
}

fn deserialize_workflow<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawWorkflow {
        Name(String),
        Id(u64),
    }

    Ok(
        Option::<RawWorkflow>::deserialize(deserializer)?.map(|raw| match raw {
            RawWorkflow::Name(name) => name,
            RawWorkflow::Id(id) => id.to_string(),
        }),
    )
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            owner: None,
            repo: None,
            workflow: None,
            branch: default_branch(),
            artifact: default_artifact_pattern(),
            token: None,
            auto_update: false,
        }
    }
}

impl RepositoryConfig {
    /// Turn a settings entry into a descriptor, checking required fields once.
    ///
    /// # Errors
    /// Returns [`UpdateError::ConfigIncomplete`] when `owner`, `repo` or
    /// `workflow` is missing or blank, and [`UpdateError::InvalidPattern`] when
    /// the artifact pattern cannot be compiled.
    pub fn validate(&self, key: &str) -> Result<RepositoryDescriptor, UpdateError> {
        fn required(value: Option<&String>) -> Option<String> {
            value
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        }

        let (owner, repo, workflow) = match (
            required(self.owner.as_ref()),
            required(self.repo.as_ref()),
            required(self.workflow.as_ref()),
        ) {
            (Some(owner), Some(repo), Some(workflow)) => (owner, repo, workflow),
            (owner, repo, workflow) => {
                let missing = [
                    ("owner", owner.is_none()),
                    ("repo", repo.is_none()),
                    ("workflow", workflow.is_none()),
                ]
                .into_iter()
                .filter_map(|(field, absent)| absent.then_some(field))
                .collect();
                return Err(UpdateError::ConfigIncomplete {
                    key: key.to_string(),
                    missing,
                });
            }
        };

        let branch = match self.branch.trim() {
            "" => DEFAULT_BRANCH.to_string(),
            branch => branch.to_string(),
        };
        let pattern = match self.artifact.trim() {
            "" => DEFAULT_ARTIFACT_PATTERN,
            pattern => pattern,
        };

        Ok(RepositoryDescriptor {
            key: key.to_string(),
            owner,
            repo,
            workflow,
            branch,
            artifact_pattern: ArtifactPattern::new(pattern)?,
            credential: self.token.as_deref().and_then(Credential::from_token),
            auto_apply: self.auto_update,
        })
    }
}

/// A validated update source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    pub key: String,
    pub owner: String,
    pub repo: String,
    pub workflow: String,
    pub branch: String,
    pub artifact_pattern: ArtifactPattern,
    pub credential: Option<Credential>,
    pub auto_apply: bool,
}

impl RepositoryDescriptor {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Validate every configured repository, keeping the usable ones.
///
/// Incomplete entries are logged and returned alongside the descriptors so
/// callers can report them; they never prevent the others from loading.
#[must_use]
pub fn load_descriptors(
    repositories: &BTreeMap<String, RepositoryConfig>,
) -> (Vec<RepositoryDescriptor>, Vec<UpdateError>) {
    let mut descriptors = Vec::with_capacity(repositories.len());
    let mut rejected = Vec::new();

    for (key, config) in repositories {
        match config.validate(key) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(error) => {
                warn!("Ignoring repository '{key}': {error}");
                rejected.push(error);
            }
        }
    }

    (descriptors, rejected)
}
