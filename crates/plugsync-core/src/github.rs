use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::ci::{ArtifactDescriptor, BuildReference, CiProvider};
use crate::descriptor::{Credential, RepositoryDescriptor};
use crate::error::UpdateError;

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_HEADER: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// GitHub Actions workflow runs and artifacts over the REST API.
#[derive(Debug, Clone)]
pub struct GitHubActions {
    client: reqwest::Client,
    api_base: Url,
}

#[derive(Deserialize)]
struct WorkflowRunsResponse {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct WorkflowRun {
    id: u64,
    #[serde(default)]
    head_branch: Option<String>,
}

#[derive(Deserialize)]
struct ArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<RawArtifact>,
}

#[derive(Deserialize)]
struct RawArtifact {
    id: u64,
    name: String,
    archive_download_url: String,
    #[serde(default)]
    size_in_bytes: Option<u64>,
    #[serde(default)]
    expired: bool,
}

/// Build the shared HTTP client used for API calls and downloads.
///
/// # Errors
/// Returns an error when the TLS backend cannot be initialized.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, UpdateError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(format!("plugsync/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(UpdateError::ClientBuild)
}

impl GitHubActions {
    /// # Errors
    /// Returns [`UpdateError::InvalidApiUrl`] when `api_base_url` is not an
    /// absolute http(s) URL.
    pub fn new(client: reqwest::Client, api_base_url: &str) -> Result<Self, UpdateError> {
        let invalid = |details: String| UpdateError::InvalidApiUrl {
            url: api_base_url.to_string(),
            details,
        };
        let api_base = Url::parse(api_base_url).map_err(|error| invalid(error.to_string()))?;
        if api_base.cannot_be_a_base() || !matches!(api_base.scheme(), "http" | "https") {
            return Err(invalid("expected an http(s) URL".to_string()));
        }

        Ok(Self { client, api_base })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn runs_url(&self, repository: &RepositoryDescriptor) -> Url {
        let mut url = self.endpoint(&[
            "repos",
            &repository.owner,
            &repository.repo,
            "actions",
            "workflows",
            &repository.workflow,
            "runs",
        ]);
        url.query_pairs_mut()
            .append_pair("branch", &repository.branch)
            .append_pair("status", "success")
            .append_pair("per_page", "1");
        url
    }

    fn artifacts_url(&self, repository: &RepositoryDescriptor, build_id: u64) -> Url {
        self.endpoint(&[
            "repos",
            &repository.owner,
            &repository.repo,
            "actions",
            "runs",
            &build_id.to_string(),
            "artifacts",
        ])
    }

    fn get(&self, url: &str, credential: Option<&Credential>) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .header("X-GitHub-Api-Version", API_VERSION);
        match credential {
            Some(credential) => request.bearer_auth(credential.expose()),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: &Url,
        credential: Option<&Credential>,
    ) -> Result<T, UpdateError> {
        debug!("GET {url}");
        let response = self
            .get(url.as_str(), credential)
            .send()
            .await
            .map_err(|error| UpdateError::request(operation, error))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            return Err(UpdateError::RemoteUnavailable {
                operation,
                status,
                body_snippet,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|error| UpdateError::request(operation, error))?;
        serde_json::from_str(&body).map_err(|error| UpdateError::malformed(operation, error))
    }
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

fn latest_run(response: WorkflowRunsResponse, branch: &str) -> Option<BuildReference> {
    response
        .workflow_runs
        .into_iter()
        .next()
        .map(|run| BuildReference {
            build_id: run.id,
            branch: run.head_branch.unwrap_or_else(|| branch.to_string()),
        })
}

fn into_artifacts(response: ArtifactsResponse) -> Vec<ArtifactDescriptor> {
    response
        .artifacts
        .into_iter()
        .map(|raw| ArtifactDescriptor {
            name: raw.name,
            artifact_id: raw.id,
            download_url: raw.archive_download_url,
            size_in_bytes: raw.size_in_bytes,
            expired: raw.expired,
        })
        .collect()
}

#[async_trait]
impl CiProvider for GitHubActions {
    fn name(&self) -> &'static str {
        "GitHub Actions"
    }

    async fn latest_successful_build(
        &self,
        repository: &RepositoryDescriptor,
    ) -> Result<Option<BuildReference>, UpdateError> {
        let response: WorkflowRunsResponse = self
            .get_json(
                "list workflow runs",
                &self.runs_url(repository),
                repository.credential.as_ref(),
            )
            .await?;
        Ok(latest_run(response, &repository.branch))
    }

    async fn list_artifacts(
        &self,
        repository: &RepositoryDescriptor,
        build: &BuildReference,
    ) -> Result<Vec<ArtifactDescriptor>, UpdateError> {
        let response: ArtifactsResponse = self
            .get_json(
                "list run artifacts",
                &self.artifacts_url(repository, build.build_id),
                repository.credential.as_ref(),
            )
            .await?;
        Ok(into_artifacts(response))
    }

    async fn download_archive(
        &self,
        download_url: &str,
        credential: Option<&Credential>,
        dest: &Path,
    ) -> Result<u64, UpdateError> {
        use futures_util::StreamExt;

        let response = self
            .get(download_url, credential)
            .send()
            .await
            .map_err(|error| UpdateError::request("artifact download", error))?;

        if !response.status().is_success() {
            return Err(UpdateError::DownloadFailed {
                status: response.status(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await.map_err(|error| {
            UpdateError::install_io_with_path("failed to create download file", dest, &error)
        })?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|error| UpdateError::request("artifact download stream", error))?;
            file.write_all(&chunk).await.map_err(|error| {
                UpdateError::install_io_with_path("failed to write download data", dest, &error)
            })?;
            downloaded += chunk.len() as u64;
        }

        file.flush().await.map_err(|error| {
            UpdateError::install_io_with_path("failed to flush download file", dest, &error)
        })?;

        info!("Downloaded {downloaded} bytes to {}", dest.display());
        Ok(downloaded)
    }
}
