use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Last installed version of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub artifact_id: String,
    pub version: String,
    pub run_id: u64,
    pub file_name: String,
}

impl VersionRecord {
    fn matches(&self, artifact_id: u64, build_id: u64) -> bool {
        self.run_id == build_id && self.artifact_id == artifact_id.to_string()
    }
}

#[derive(Default, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    plugins: BTreeMap<String, VersionRecord>,
}

/// Persistent map from repository key to the version installed from it.
///
/// Every successful [`record_install`](Self::record_install) rewrites the
/// whole document before returning.
#[derive(Debug)]
pub struct VersionLedger {
    path: PathBuf,
    records: BTreeMap<String, VersionRecord>,
}

impl VersionLedger {
    /// Load the ledger at `path`. A missing or unreadable file yields an
    /// empty ledger.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<LedgerDocument>(&content) {
                Ok(document) => document.plugins,
                Err(error) => {
                    warn!(
                        "Version ledger {} is unreadable, starting empty: {error}",
                        path.display()
                    );
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("No version ledger at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(error) => {
                warn!(
                    "Failed to read version ledger {}, starting empty: {error}",
                    path.display()
                );
                BTreeMap::new()
            }
        };

        Self { path, records }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` unless the recorded (artifact, build) pair for `key` equals the
    /// given one. Ids are compared for equality only, never ordered.
    #[must_use]
    pub fn is_new_version(&self, key: &str, artifact_id: u64, build_id: u64) -> bool {
        self.records
            .get(key)
            .is_none_or(|record| !record.matches(artifact_id, build_id))
    }

    #[must_use]
    pub fn current_file_name(&self, key: &str) -> Option<&str> {
        self.records.get(key).map(|record| record.file_name.as_str())
    }

    #[must_use]
    pub fn record(&self, key: &str) -> Option<&VersionRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &VersionRecord)> {
        self.records.iter().map(|(key, record)| (key.as_str(), record))
    }

    /// Replace the record for `key` and persist the ledger.
    ///
    /// # Errors
    /// Returns [`UpdateError::LedgerIo`] when the ledger cannot be written; the
    /// in-memory state is left as it was before the call.
    pub fn record_install(
        &mut self,
        key: &str,
        artifact_id: u64,
        build_id: u64,
        file_name: &str,
    ) -> Result<(), UpdateError> {
        let record = VersionRecord {
            artifact_id: artifact_id.to_string(),
            version: format!("run-{build_id}"),
            run_id: build_id,
            file_name: file_name.to_string(),
        };
        let previous = self.records.insert(key.to_string(), record);

        if let Err(error) = self.save() {
            match previous {
                Some(previous) => self.records.insert(key.to_string(), previous),
                None => self.records.remove(key),
            };
            return Err(error);
        }

        debug!("Recorded {key} as artifact {artifact_id} from run {build_id} ({file_name})");
        Ok(())
    }

    fn save(&self) -> Result<(), UpdateError> {
        let document = LedgerDocument {
            plugins: self.records.clone(),
        };
        let data = serde_json::to_vec_pretty(&document).map_err(|error| UpdateError::LedgerIo {
            context: "failed to serialize version ledger",
            source: std::io::Error::other(error),
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                UpdateError::ledger_io("failed to create ledger directory", parent, &error)
            })?;
        }

        write_atomic(&self.path, &data).map_err(|error| {
            UpdateError::ledger_io("failed to write version ledger", &self.path, &error)
        })
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "ledger path has no parent")
    })?;

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("ledger");
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let pid = std::process::id();

    let mut tmp_path = None;
    for attempt in 0..16_u8 {
        let candidate = parent.join(format!(".{file_name}.{pid}.{timestamp}.{attempt}.tmp"));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                file.write_all(data)?;
                file.sync_all()?;
                tmp_path = Some(candidate);
                break;
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => return Err(error),
        }
    }

    let Some(tmp_path) = tmp_path else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "failed to create unique ledger temp file",
        ));
    };

    if let Err(error) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::VersionLedger;

    #[test]
    fn missing_file_is_empty_ledger() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let ledger = VersionLedger::load(temp.path().join("versions.json"));

        assert!(ledger.is_new_version("economy", 7, 42));
        assert!(ledger.current_file_name("economy").is_none());
        assert_eq!(ledger.records().count(), 0);
    }

    #[test]
    fn unreadable_file_is_empty_ledger() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("versions.json");
        std::fs::write(&path, "{not-valid-json").expect("fixture should be written");

        let ledger = VersionLedger::load(&path);
        assert_eq!(ledger.records().count(), 0);
    }

    #[test]
    fn same_pair_is_not_new_any_difference_is() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let mut ledger = VersionLedger::load(temp.path().join("versions.json"));
        ledger
            .record_install("economy", 7, 42, "economy.jar")
            .expect("record should persist");

        assert!(!ledger.is_new_version("economy", 7, 42));
        assert!(ledger.is_new_version("economy", 8, 42));
        assert!(ledger.is_new_version("economy", 7, 43));
        assert!(ledger.is_new_version("economy", 7, 41));
        assert!(ledger.is_new_version("shop", 7, 42));
    }

    #[test]
    fn record_install_persists_immediately_and_overwrites() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("data").join("versions.json");

        let mut ledger = VersionLedger::load(&path);
        ledger
            .record_install("economy", 7, 42, "economy.jar")
            .expect("first record should persist");
        ledger
            .record_install("economy", 9, 50, "economy-2.jar")
            .expect("second record should persist");

        let reloaded = VersionLedger::load(&path);
        let record = reloaded.record("economy").expect("record should survive reload");
        assert_eq!(record.artifact_id, "9");
        assert_eq!(record.run_id, 50);
        assert_eq!(record.version, "run-50");
        assert_eq!(reloaded.current_file_name("economy"), Some("economy-2.jar"));
        assert_eq!(reloaded.records().count(), 1);
    }

    #[test]
    fn persisted_document_uses_plugins_section() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("versions.json");
        let mut ledger = VersionLedger::load(&path);
        ledger
            .record_install("repoA", 7, 42, "foo.jar")
            .expect("record should persist");

        let raw: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&path).expect("ledger should be readable"),
        )
        .expect("ledger should be JSON");

        assert_eq!(
            raw,
            serde_json::json!({
                "plugins": {
                    "repoA": {
                        "artifactId": "7",
                        "version": "run-42",
                        "runId": 42,
                        "fileName": "foo.jar"
                    }
                }
            })
        );
    }

    #[test]
    fn failed_write_keeps_previous_in_memory_state() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").expect("blocker should be written");

        let mut ledger = VersionLedger::load(blocker.join("versions.json"));
        let result = ledger.record_install("economy", 7, 42, "economy.jar");

        assert!(result.is_err());
        assert!(ledger.is_new_version("economy", 7, 42));
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let mut ledger = VersionLedger::load(temp.path().join("versions.json"));
        ledger
            .record_install("economy", 7, 42, "economy.jar")
            .expect("record should persist");

        let leftovers = std::fs::read_dir(temp.path())
            .expect("read temp dir entries")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
