use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use plugsync_core::{DEFAULT_API_BASE_URL, RepositoryConfig};
use plugsync_platform::AppPaths;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub auto_check: bool,

    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,

    #[serde(default)]
    pub auto_update_on_startup: bool,

    #[serde(default = "default_true")]
    pub delete_after_extract: bool,

    #[serde(default)]
    pub plugins_dir: Option<PathBuf>,

    #[serde(default)]
    pub downloads_dir: Option<PathBuf>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Upper bound for each CI API call.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    60
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_download_timeout() -> u64 {
    600
}

fn default_retry_delays() -> Vec<u64> {
    vec![0, 2, 5]
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_check: true,
            check_interval_minutes: default_check_interval(),
            auto_update_on_startup: false,
            delete_after_extract: true,
            plugins_dir: None,
            downloads_dir: None,
            api_base_url: default_api_base_url(),
            http_timeout_secs: default_http_timeout(),
            download_timeout_secs: default_download_timeout(),
            retry_delays_secs: default_retry_delays(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            repositories: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(AppError::SettingsRead {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&content).map_err(|source| AppError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn plugins_dir(&self, paths: &AppPaths) -> PathBuf {
        self.plugins_dir
            .clone()
            .unwrap_or_else(|| paths.plugins_dir())
    }

    pub fn downloads_dir(&self, paths: &AppPaths) -> PathBuf {
        self.downloads_dir
            .clone()
            .unwrap_or_else(|| paths.downloads_dir())
    }

    /// Interval between scheduled checks, never shorter than one minute.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes.max(1).saturating_mul(60))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use plugsync_platform::AppPaths;
    use serde_json::json;

    use super::Settings;
    use crate::error::AppError;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();

        assert!(settings.auto_check);
        assert_eq!(settings.check_interval_minutes, 60);
        assert!(!settings.auto_update_on_startup);
        assert!(settings.delete_after_extract);
        assert_eq!(settings.api_base_url, "https://api.github.com");
        assert_eq!(settings.http_timeout_secs, 30);
        assert_eq!(settings.download_timeout_secs, 600);
        assert_eq!(settings.retry_delays_secs, vec![0, 2, 5]);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
        assert!(settings.repositories.is_empty());
    }

    #[test]
    fn partial_document_fills_in_defaults() {
        let value = json!({
            "check_interval_minutes": 15,
            "repositories": {
                "economy": {
                    "owner": "perro-dev",
                    "repo": "economy",
                    "workflow": 123456,
                    "auto_update": true
                }
            }
        });

        let settings: Settings =
            serde_json::from_value(value).expect("settings JSON should deserialize");

        assert_eq!(settings.check_interval(), Duration::from_secs(15 * 60));
        assert!(settings.auto_check);
        let economy = &settings.repositories["economy"];
        assert_eq!(economy.workflow.as_deref(), Some("123456"));
        assert!(economy.auto_update);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().expect("tempdir should be created");

        let settings =
            Settings::load(&temp.path().join("settings.json")).expect("missing file is fine");

        assert!(settings.auto_check);
    }

    #[test]
    fn unparsable_file_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "{ not json").expect("settings file should be written");

        let result = Settings::load(&path);

        assert!(matches!(result, Err(AppError::SettingsParse { .. })));
    }

    #[test]
    fn directories_fall_back_to_app_paths() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let paths = AppPaths::rooted_at(temp.path());
        let mut settings = Settings::default();

        assert_eq!(settings.plugins_dir(&paths), paths.plugins_dir());
        assert_eq!(settings.downloads_dir(&paths), paths.downloads_dir());

        settings.plugins_dir = Some(temp.path().join("server").join("plugins"));
        assert_eq!(
            settings.plugins_dir(&paths),
            temp.path().join("server").join("plugins")
        );
    }

    #[test]
    fn zero_interval_is_clamped() {
        let settings = Settings {
            check_interval_minutes: 0,
            ..Settings::default()
        };

        assert_eq!(settings.check_interval(), Duration::from_secs(60));
    }

    #[test]
    fn huge_interval_saturates() {
        let settings = Settings {
            check_interval_minutes: u64::MAX,
            ..Settings::default()
        };

        assert_eq!(settings.check_interval(), Duration::from_secs(u64::MAX));
    }
}
