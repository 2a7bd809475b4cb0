use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::ci::{ArtifactDescriptor, BuildReference, CiProvider};
use crate::descriptor::{Credential, RepositoryDescriptor};
use crate::error::UpdateError;
use crate::fetcher::ArtifactFetcher;
use crate::installer::Installer;
use crate::ledger::{VersionLedger, VersionRecord};
use crate::matcher;
use crate::retry::{retry_with_delays, run_with_timeout};

/// Whether a check cycle may install updates for auto-applying repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    CheckOnly,
    AutoDownload,
}

/// A newer artifact found by a check cycle and not yet installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub repository_key: String,
    pub owner: String,
    pub repo: String,
    pub build: BuildReference,
    pub artifact: ArtifactDescriptor,
    credential: Option<Credential>,
}

impl PendingUpdate {
    fn new(
        repository: &RepositoryDescriptor,
        build: BuildReference,
        artifact: ArtifactDescriptor,
    ) -> Self {
        Self {
            repository_key: repository.key.clone(),
            owner: repository.owner.clone(),
            repo: repository.repo.clone(),
            build,
            artifact,
            credential: repository.credential.clone(),
        }
    }

    #[must_use]
    pub fn version_label(&self) -> String {
        format!("run-{}", self.build.build_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub repository_key: String,
    pub artifact_id: u64,
    pub build_id: u64,
    /// Empty when the archive held nothing installable; the ledger is then
    /// left unchanged.
    pub installed_files: Vec<String>,
    pub removed_previous: Option<String>,
}

#[derive(Debug)]
pub struct RepositoryFailure {
    pub repository_key: String,
    pub error: UpdateError,
}

/// Outcome of one check cycle.
#[derive(Debug, Default)]
pub struct CheckSummary {
    pub pending: BTreeMap<String, PendingUpdate>,
    pub applied: Vec<AppliedUpdate>,
    pub up_to_date: Vec<String>,
    /// No successful build or no matching artifact.
    pub skipped: Vec<RepositoryFailure>,
    pub failures: Vec<RepositoryFailure>,
}

#[derive(Debug, Default)]
pub struct ApplySummary {
    pub applied: Vec<AppliedUpdate>,
    pub failures: Vec<RepositoryFailure>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Upper bound for each CI API call.
    pub api_timeout: Duration,
    /// Upper bound for each archive download attempt.
    pub download_timeout: Duration,
    /// Delay before each download attempt of an apply; one entry per attempt.
    pub retry_delays_secs: Vec<u64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(600),
            retry_delays_secs: vec![0, 2, 5],
        }
    }
}

enum RepositoryCheck {
    UpToDate,
    Available(PendingUpdate),
}

struct PipelineState {
    ledger: VersionLedger,
    pending: BTreeMap<String, PendingUpdate>,
}

/// Checks configured repositories for new builds and installs them.
///
/// All ledger and pending-map access happens under one async mutex, which is
/// also the cycle lock: at most one check or apply runs at a time.
pub struct UpdatePipeline {
    repositories: Vec<RepositoryDescriptor>,
    provider: Arc<dyn CiProvider>,
    fetcher: ArtifactFetcher,
    installer: Installer,
    options: PipelineOptions,
    state: Mutex<PipelineState>,
}

impl UpdatePipeline {
    #[must_use]
    pub fn new(
        repositories: Vec<RepositoryDescriptor>,
        provider: Arc<dyn CiProvider>,
        ledger: VersionLedger,
        fetcher: ArtifactFetcher,
        installer: Installer,
        options: PipelineOptions,
    ) -> Self {
        Self {
            repositories,
            provider,
            fetcher,
            installer,
            options,
            state: Mutex::new(PipelineState {
                ledger,
                pending: BTreeMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn repositories(&self) -> &[RepositoryDescriptor] {
        &self.repositories
    }

    #[must_use]
    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    /// Run a check cycle, waiting for any cycle already in progress.
    pub async fn check_now(&self, mode: CheckMode) -> CheckSummary {
        let mut state = self.state.lock().await;
        self.run_cycle(&mut state, mode).await
    }

    /// Run a check cycle unless another one is in progress.
    ///
    /// # Errors
    /// Returns [`UpdateError::CycleInProgress`] when the cycle lock is held.
    pub async fn try_check_now(&self, mode: CheckMode) -> Result<CheckSummary, UpdateError> {
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| UpdateError::CycleInProgress)?;
        Ok(self.run_cycle(&mut state, mode).await)
    }

    /// Install the pending update for `repository_key`.
    ///
    /// The entry is removed only when the install succeeds.
    ///
    /// # Errors
    /// Returns [`UpdateError::NotPending`] when nothing is pending for the key,
    /// or the download/install/ledger error that stopped the apply.
    pub async fn apply_pending(&self, repository_key: &str) -> Result<AppliedUpdate, UpdateError> {
        let mut state = self.state.lock().await;
        let update = state
            .pending
            .get(repository_key)
            .cloned()
            .ok_or_else(|| UpdateError::NotPending(repository_key.to_string()))?;

        let applied = self.apply_locked(&mut state, &update).await?;
        state.pending.remove(repository_key);
        Ok(applied)
    }

    /// Install every pending update, each independently of the others.
    pub async fn apply_all_pending(&self) -> ApplySummary {
        let mut state = self.state.lock().await;
        let mut summary = ApplySummary::default();

        if state.pending.is_empty() {
            info!("No pending updates to install");
            return summary;
        }

        info!("Installing {} pending updates", state.pending.len());
        let updates: Vec<PendingUpdate> = state.pending.values().cloned().collect();
        for update in updates {
            match self.apply_locked(&mut state, &update).await {
                Ok(applied) => {
                    state.pending.remove(&update.repository_key);
                    summary.applied.push(applied);
                }
                Err(error) => {
                    error!(
                        "Failed to install update for {}: {error}",
                        update.repository_key
                    );
                    summary.failures.push(RepositoryFailure {
                        repository_key: update.repository_key,
                        error,
                    });
                }
            }
        }

        info!(
            "Installed {} updates, {} failed; restart the host to load them",
            summary.applied.len(),
            summary.failures.len()
        );
        summary
    }

    /// Snapshot of the updates found by the last check cycle.
    pub async fn pending_updates(&self) -> BTreeMap<String, PendingUpdate> {
        self.state.lock().await.pending.clone()
    }

    /// Snapshot of the installed versions.
    pub async fn installed_versions(&self) -> BTreeMap<String, VersionRecord> {
        self.state
            .lock()
            .await
            .ledger
            .records()
            .map(|(key, record)| (key.to_string(), record.clone()))
            .collect()
    }

    async fn run_cycle(&self, state: &mut PipelineState, mode: CheckMode) -> CheckSummary {
        info!(
            "Checking {} repositories on {} for updates",
            self.repositories.len(),
            self.provider.name()
        );
        state.pending.clear();
        let mut summary = CheckSummary::default();

        for repository in &self.repositories {
            let key = repository.key.clone();
            match self.check_repository(state, repository).await {
                Ok(RepositoryCheck::UpToDate) => summary.up_to_date.push(key),
                Ok(RepositoryCheck::Available(update)) => {
                    state.pending.insert(key.clone(), update.clone());
                    if repository.auto_apply && mode == CheckMode::AutoDownload {
                        match self.apply_locked(state, &update).await {
                            Ok(applied) => {
                                state.pending.remove(&key);
                                summary.applied.push(applied);
                            }
                            Err(error) => {
                                error!("Automatic install for {key} failed: {error}");
                                summary.failures.push(RepositoryFailure {
                                    repository_key: key,
                                    error,
                                });
                            }
                        }
                    }
                }
                Err(error) if error.is_skip() => {
                    warn!("Skipping {key}: {error}");
                    summary.skipped.push(RepositoryFailure {
                        repository_key: key,
                        error,
                    });
                }
                Err(error) => {
                    error!(
                        "Update check for {key} ({}) failed: {error}",
                        repository.full_name()
                    );
                    summary.failures.push(RepositoryFailure {
                        repository_key: key,
                        error,
                    });
                }
            }
        }

        summary.pending = state.pending.clone();
        if summary.pending.is_empty() {
            info!("No new updates found");
        } else {
            info!("{} updates available:", summary.pending.len());
            for (key, update) in &summary.pending {
                info!(
                    "- {key}: {} (artifact {}, {})",
                    update.artifact.name,
                    update.artifact.artifact_id,
                    update.version_label()
                );
            }
        }
        summary
    }

    async fn check_repository(
        &self,
        state: &PipelineState,
        repository: &RepositoryDescriptor,
    ) -> Result<RepositoryCheck, UpdateError> {
        let key = &repository.key;
        info!(
            "Checking {key}: {} workflow {} on {}",
            repository.full_name(),
            repository.workflow,
            repository.branch
        );

        let build = run_with_timeout(
            self.options.api_timeout,
            "list workflow runs",
            self.provider.latest_successful_build(repository),
        )
        .await?
        .ok_or_else(|| UpdateError::NoSuccessfulBuild {
            workflow: repository.workflow.clone(),
            branch: repository.branch.clone(),
        })?;
        debug!("Latest successful run for {key}: {}", build.build_id);

        let matches = run_with_timeout(
            self.options.api_timeout,
            "list run artifacts",
            matcher::match_artifacts(self.provider.as_ref(), repository, &build),
        )
        .await?;
        if matches.total == 0 {
            warn!("Run {} of {key} published no artifacts", build.build_id);
        }
        if matches.is_empty() {
            return Err(UpdateError::NoMatchingArtifact {
                build_id: build.build_id,
                pattern: repository.artifact_pattern.to_string(),
                available: matches.total,
            });
        }

        let mut newest = None;
        for artifact in matches.matched {
            if !state
                .ledger
                .is_new_version(key, artifact.artifact_id, build.build_id)
            {
                // Any recorded sibling counts as installed, so sibling artifacts never alternate.
                info!(
                    "{key} is up to date with {} (artifact {}, run {})",
                    artifact.name, artifact.artifact_id, build.build_id
                );
                return Ok(RepositoryCheck::UpToDate);
            }
            info!(
                "New version of {key} available: {} (artifact {}, run {})",
                artifact.name, artifact.artifact_id, build.build_id
            );
            newest = Some(PendingUpdate::new(repository, build.clone(), artifact));
        }

        Ok(newest.map_or(RepositoryCheck::UpToDate, RepositoryCheck::Available))
    }

    async fn apply_locked(
        &self,
        state: &mut PipelineState,
        update: &PendingUpdate,
    ) -> Result<AppliedUpdate, UpdateError> {
        let key = update.repository_key.clone();
        info!("Installing update for {key} ({})", update.version_label());

        let archive = retry_with_delays("artifact download", &self.options.retry_delays_secs, || {
            run_with_timeout(
                self.options.download_timeout,
                "artifact download",
                self.fetcher.download(
                    self.provider.as_ref(),
                    &key,
                    &update.artifact,
                    update.credential.as_ref(),
                ),
            )
        })
        .await?;

        let previous = state.ledger.current_file_name(&key).map(str::to_string);
        let installer = self.installer.clone();
        let install_key = key.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            installer.install_from(&archive, &install_key, previous.as_deref())
        })
        .await
        .map_err(|error| UpdateError::install_io("installer task failed", std::io::Error::other(error)))??;

        match outcome.last_installed() {
            Some(file_name) => {
                state.ledger.record_install(
                    &key,
                    update.artifact.artifact_id,
                    update.build.build_id,
                    file_name,
                )?;
                info!("Update for {key} installed as {file_name}; restart the host to load it");
            }
            None => warn!(
                "Artifact {} for {key} contained nothing installable",
                update.artifact.name
            ),
        }

        Ok(AppliedUpdate {
            repository_key: key,
            artifact_id: update.artifact.artifact_id,
            build_id: update.build.build_id,
            installed_files: outcome.installed,
            removed_previous: outcome.removed_previous,
        })
    }
}
