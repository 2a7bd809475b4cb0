use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::UpdateError;
use crate::pipeline::{CheckMode, UpdatePipeline};

const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Run a check cycle every `interval` until `cancel` fires.
///
/// The first check happens one interval after spawning. A tick that finds
/// another cycle running is skipped rather than queued. Intervals shorter
/// than one second are raised to one second.
pub fn spawn_periodic_checks(
    pipeline: Arc<UpdatePipeline>,
    interval: Duration,
    mode: CheckMode,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    if interval < MIN_CHECK_INTERVAL {
        warn!("Check interval {interval:?} is too short, using {MIN_CHECK_INTERVAL:?}");
    }
    let interval = interval.max(MIN_CHECK_INTERVAL);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Scheduled update checks every {} minutes",
            interval.as_secs() / 60
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Periodic update checks stopped");
                    break;
                }
                _ = ticker.tick() => {
                    info!("Running scheduled update check");
                    match pipeline.try_check_now(mode).await {
                        Ok(summary) if !summary.pending.is_empty() && mode == CheckMode::CheckOnly => {
                            info!(
                                "{} updates pending; run `plugsync update` to install them",
                                summary.pending.len()
                            );
                        }
                        Ok(_) => {}
                        Err(UpdateError::CycleInProgress) => {
                            info!("Skipping scheduled check, another cycle is running");
                        }
                        Err(error) => warn!("Scheduled update check failed: {error}"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::spawn_periodic_checks;
    use crate::descriptor::RepositoryConfig;
    use crate::fetcher::ArtifactFetcher;
    use crate::installer::Installer;
    use crate::ledger::VersionLedger;
    use crate::pipeline::{CheckMode, PipelineOptions, UpdatePipeline};
    use crate::test_support::FakeProvider;

    fn pipeline_with(provider: &Arc<FakeProvider>, root: &std::path::Path) -> Arc<UpdatePipeline> {
        let repository = RepositoryConfig {
            owner: Some("perro-dev".to_string()),
            repo: Some("economy".to_string()),
            workflow: Some("build.yml".to_string()),
            ..RepositoryConfig::default()
        }
        .validate("economy")
        .expect("config is complete");
        Arc::new(UpdatePipeline::new(
            vec![repository],
            Arc::clone(provider) as Arc<dyn crate::ci::CiProvider>,
            VersionLedger::load(root.join("versions.json")),
            ArtifactFetcher::new(root.join("downloads")),
            Installer::new(root.join("plugins")),
            PipelineOptions::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn checks_once_per_interval_until_cancelled() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let provider = Arc::new(FakeProvider::default());
        let pipeline = pipeline_with(&provider, temp.path());

        let cancel = CancellationToken::new();
        let handle = spawn_periodic_checks(
            Arc::clone(&pipeline),
            Duration::from_secs(60),
            CheckMode::CheckOnly,
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.runs_requested(), 0, "first check waits one interval");

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(provider.runs_requested(), 2);

        cancel.cancel();
        handle.await.expect("scheduler task should exit cleanly");

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(provider.runs_requested(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_the_minimum() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let provider = Arc::new(FakeProvider::default());
        let pipeline = pipeline_with(&provider, temp.path());

        let cancel = CancellationToken::new();
        let handle = spawn_periodic_checks(
            pipeline,
            Duration::ZERO,
            CheckMode::CheckOnly,
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        handle.await.expect("scheduler task should not panic");

        assert_eq!(provider.runs_requested(), 2);
    }
}
