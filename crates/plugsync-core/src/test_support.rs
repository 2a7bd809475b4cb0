use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::ci::{ArtifactDescriptor, BuildReference, CiProvider};
use crate::descriptor::{Credential, RepositoryDescriptor};
use crate::error::UpdateError;

#[derive(Debug, Clone, Copy, Default)]
enum DownloadBehavior {
    #[default]
    Serve,
    FailBeforeWrite(reqwest::StatusCode),
    FailAfterWrite(reqwest::StatusCode),
    HangAfterWrite,
}

#[derive(Default)]
struct FakeState {
    builds: HashMap<String, (BuildReference, Vec<ArtifactDescriptor>)>,
    run_failures: HashMap<String, reqwest::StatusCode>,
    archives: HashMap<String, Vec<u8>>,
    downloads: DownloadBehavior,
}

/// In-memory CI service keyed by repository key.
#[derive(Default)]
pub(crate) struct FakeProvider {
    state: Mutex<FakeState>,
    runs_requested: AtomicUsize,
    downloads: AtomicUsize,
}

impl FakeProvider {
    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make `build_id` the latest successful build of `key`, publishing a
    /// single artifact.
    pub(crate) fn publish(
        &self,
        key: &str,
        build_id: u64,
        artifact_id: u64,
        name: &str,
        archive: Vec<u8>,
    ) {
        let mut state = self.state();
        let download_url = format!("fake://{key}/{artifact_id}");
        state.archives.insert(download_url.clone(), archive);
        state.run_failures.remove(key);
        state.builds.insert(
            key.to_string(),
            (
                BuildReference {
                    build_id,
                    branch: "main".to_string(),
                },
                vec![ArtifactDescriptor {
                    name: name.to_string(),
                    artifact_id,
                    download_url,
                    size_in_bytes: None,
                    expired: false,
                }],
            ),
        );
    }

    pub(crate) fn fail_runs(&self, key: &str, status: reqwest::StatusCode) {
        self.state().run_failures.insert(key.to_string(), status);
    }

    pub(crate) fn fail_downloads(&self, status: reqwest::StatusCode) {
        self.state().downloads = DownloadBehavior::FailBeforeWrite(status);
    }

    /// Write the archive, then report a failed transfer.
    pub(crate) fn fail_downloads_after_write(&self, status: reqwest::StatusCode) {
        self.state().downloads = DownloadBehavior::FailAfterWrite(status);
    }

    /// Write the archive, then never finish.
    pub(crate) fn hang_downloads_after_write(&self) {
        self.state().downloads = DownloadBehavior::HangAfterWrite;
    }

    pub(crate) fn allow_downloads(&self) {
        self.state().downloads = DownloadBehavior::Serve;
    }

    pub(crate) fn runs_requested(&self) -> usize {
        self.runs_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CiProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake CI"
    }

    async fn latest_successful_build(
        &self,
        repository: &RepositoryDescriptor,
    ) -> Result<Option<BuildReference>, UpdateError> {
        self.runs_requested.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if let Some(status) = state.run_failures.get(&repository.key) {
            return Err(UpdateError::RemoteUnavailable {
                operation: "list workflow runs",
                status: *status,
                body_snippet: String::new(),
            });
        }
        Ok(state
            .builds
            .get(&repository.key)
            .map(|(build, _)| build.clone()))
    }

    async fn list_artifacts(
        &self,
        repository: &RepositoryDescriptor,
        build: &BuildReference,
    ) -> Result<Vec<ArtifactDescriptor>, UpdateError> {
        Ok(self
            .state()
            .builds
            .get(&repository.key)
            .filter(|(published, _)| published.build_id == build.build_id)
            .map(|(_, artifacts)| artifacts.clone())
            .unwrap_or_default())
    }

    async fn download_archive(
        &self,
        download_url: &str,
        _credential: Option<&Credential>,
        dest: &Path,
    ) -> Result<u64, UpdateError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let (behavior, bytes) = {
            let state = self.state();
            if let DownloadBehavior::FailBeforeWrite(status) = state.downloads {
                return Err(UpdateError::DownloadFailed { status });
            }
            let bytes = state
                .archives
                .get(download_url)
                .cloned()
                .ok_or(UpdateError::DownloadFailed {
                    status: reqwest::StatusCode::NOT_FOUND,
                })?;
            (state.downloads, bytes)
        };
        std::fs::write(dest, &bytes)
            .map_err(|error| UpdateError::install_io_with_path("fake download", dest, &error))?;

        match behavior {
            DownloadBehavior::FailAfterWrite(status) => Err(UpdateError::DownloadFailed { status }),
            DownloadBehavior::HangAfterWrite => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(bytes.len() as u64)
            }
            DownloadBehavior::Serve | DownloadBehavior::FailBeforeWrite(_) => {
                Ok(bytes.len() as u64)
            }
        }
    }
}

pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).expect("zip file should be created");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer
            .start_file(*name, options)
            .expect("zip entry should be started");
        writer
            .write_all(contents)
            .expect("zip entry should be written");
    }
    writer.finish().expect("zip archive should be finalized");
}

pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer
            .start_file(*name, options)
            .expect("zip entry should be started");
        writer
            .write_all(contents.as_bytes())
            .expect("zip entry should be written");
    }
    writer
        .finish()
        .expect("zip archive should be finalized")
        .into_inner()
}
