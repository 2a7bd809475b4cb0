use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use plugsync_core::{
    ArtifactFetcher, CheckMode, CheckSummary, CiProvider, GitHubActions, Installer,
    PipelineOptions, UpdatePipeline, VersionLedger, build_http_client, load_descriptors,
    spawn_periodic_checks,
};
use plugsync_platform::AppPaths;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::settings::Settings;

/// Resolved locations and settings shared by every command.
pub struct AppContext {
    pub paths: AppPaths,
    pub settings_path: PathBuf,
    pub settings: Settings,
}

impl AppContext {
    fn installer(&self) -> Installer {
        Installer::new(self.settings.plugins_dir(&self.paths))
            .delete_archive_after_extract(self.settings.delete_after_extract)
    }

    fn build_pipeline(&self) -> Result<UpdatePipeline, AppError> {
        let (repositories, invalid) = load_descriptors(&self.settings.repositories);
        for error in &invalid {
            warn!("Ignoring repository entry: {error}");
        }
        if repositories.is_empty() {
            return Err(AppError::NoRepositories(self.settings_path.clone()));
        }

        let download_timeout = Duration::from_secs(self.settings.download_timeout_secs);
        let client = build_http_client(download_timeout)?;
        let provider: Arc<dyn CiProvider> =
            Arc::new(GitHubActions::new(client, &self.settings.api_base_url)?);

        Ok(UpdatePipeline::new(
            repositories,
            provider,
            VersionLedger::load(self.paths.ledger_file()),
            ArtifactFetcher::new(self.settings.downloads_dir(&self.paths)),
            self.installer(),
            PipelineOptions {
                api_timeout: Duration::from_secs(self.settings.http_timeout_secs),
                download_timeout,
                retry_delays_secs: self.settings.retry_delays_secs.clone(),
            },
        ))
    }
}

fn print_check_summary(summary: &CheckSummary) {
    for applied in &summary.applied {
        println!(
            "installed {}: {} (run {})",
            applied.repository_key,
            applied.installed_files.join(", "),
            applied.build_id
        );
    }
    if summary.pending.is_empty() {
        println!("No pending updates.");
    } else {
        println!("Pending updates:");
        for (key, update) in &summary.pending {
            println!(
                "  {key}: {} (artifact {}, {})",
                update.artifact.name,
                update.artifact.artifact_id,
                update.version_label()
            );
        }
    }
    for failure in summary.skipped.iter().chain(&summary.failures) {
        println!("  {}: {}", failure.repository_key, failure.error);
    }
}

pub async fn run_check(context: &AppContext, download: bool) -> Result<(), AppError> {
    let pipeline = context.build_pipeline()?;
    let mode = if download {
        CheckMode::AutoDownload
    } else {
        CheckMode::CheckOnly
    };

    let summary = pipeline.check_now(mode).await;
    print_check_summary(&summary);
    Ok(())
}

/// Check, then install everything pending or only `key`.
pub async fn run_update(context: &AppContext, key: Option<&str>) -> Result<(), AppError> {
    let pipeline = context.build_pipeline()?;
    let summary = pipeline.check_now(CheckMode::CheckOnly).await;

    if let Some(key) = key {
        if !summary.pending.contains_key(key) {
            println!("No update pending for {key}.");
            return Ok(());
        }
        let applied = pipeline.apply_pending(key).await?;
        if applied.installed_files.is_empty() {
            println!("{key}: artifact held nothing to install");
        } else {
            println!(
                "installed {key}: {} (run {})",
                applied.installed_files.join(", "),
                applied.build_id
            );
        }
        return Ok(());
    }

    if summary.pending.is_empty() {
        println!("Everything is up to date.");
        return Ok(());
    }

    let attempted = summary.pending.len();
    let outcome = pipeline.apply_all_pending().await;
    for applied in &outcome.applied {
        println!(
            "installed {}: {} (run {})",
            applied.repository_key,
            applied.installed_files.join(", "),
            applied.build_id
        );
    }
    for failure in &outcome.failures {
        println!("failed {}: {}", failure.repository_key, failure.error);
    }

    if outcome.failures.is_empty() {
        println!("Restart the server to load the new plugins.");
        Ok(())
    } else {
        Err(AppError::UpdatesFailed {
            failed: outcome.failures.len(),
            attempted,
        })
    }
}

pub fn run_status(context: &AppContext) -> Result<(), AppError> {
    let ledger = VersionLedger::load(context.paths.ledger_file());
    let installer = context.installer();

    println!("Plugin directory: {}", installer.target_dir().display());
    let mut any = false;
    for (key, record) in ledger.records() {
        any = true;
        println!(
            "  {key}: {} (artifact {}, {})",
            record.file_name, record.artifact_id, record.version
        );
    }
    if !any {
        println!("  no recorded installs");
    }

    let installed = installer.list_installed()?;
    if !installed.is_empty() {
        println!("Files on disk:");
        for name in installed {
            println!("  {name}");
        }
    }

    for key in context.settings.repositories.keys() {
        if ledger.record(key).is_none() {
            println!("  {key}: never installed");
        }
    }
    Ok(())
}

/// Startup check, then periodic checks until Ctrl-C.
pub async fn run_watch(context: &AppContext) -> Result<(), AppError> {
    let pipeline = Arc::new(context.build_pipeline()?);

    let startup_mode = if context.settings.auto_update_on_startup {
        CheckMode::AutoDownload
    } else {
        CheckMode::CheckOnly
    };
    pipeline.check_now(startup_mode).await;

    let cancel = CancellationToken::new();
    let scheduler = context.settings.auto_check.then(|| {
        spawn_periodic_checks(
            Arc::clone(&pipeline),
            context.settings.check_interval(),
            CheckMode::CheckOnly,
            cancel.clone(),
        )
    });
    if scheduler.is_none() {
        info!("Automatic checks are disabled; waiting for shutdown");
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|error| AppError::io("failed to listen for Ctrl-C", error))?;
    info!("Shutting down");

    cancel.cancel();
    if let Some(handle) = scheduler
        && let Err(error) = handle.await
    {
        warn!("Scheduler task ended abnormally: {error}");
    }
    Ok(())
}
