use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info, warn};
use tempfile::{NamedTempFile, TempPath};

use crate::error::UpdateError;
use crate::fetcher::TIMESTAMP_FORMAT;

pub const DEFAULT_INSTALLABLE_EXTENSION: &str = "jar";

/// Result of extracting one archive into the target directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Installed file names in archive order.
    pub installed: Vec<String>,
    pub removed_previous: Option<String>,
}

impl InstallOutcome {
    /// The name recorded in the ledger for this install.
    #[must_use]
    pub fn last_installed(&self) -> Option<&str> {
        self.installed.last().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}

/// Extracts installable payloads from downloaded archives into the plugin
/// directory, replacing the repository's previously installed file.
#[derive(Debug, Clone)]
pub struct Installer {
    target_dir: PathBuf,
    extension: String,
    delete_archive_after_extract: bool,
}

impl Installer {
    #[must_use]
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            extension: DEFAULT_INSTALLABLE_EXTENSION.to_string(),
            delete_archive_after_extract: true,
        }
    }

    #[must_use]
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_ascii_lowercase();
        self
    }

    #[must_use]
    pub fn delete_archive_after_extract(mut self, delete: bool) -> Self {
        self.delete_archive_after_extract = delete;
        self
    }

    #[must_use]
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    fn is_installable(&self, name: &str) -> bool {
        name.rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(&self.extension))
    }

    /// Extract every installable entry of `archive` into the target directory.
    ///
    /// Entries are staged next to their destination first. Only once every
    /// entry has been extracted is `previous_file` (the name the ledger holds
    /// for `repository_key`) replaced; any failure leaves the target
    /// directory as it was. An archive without installable entries yields an
    /// empty outcome. The archive is deleted afterwards, whether or not the
    /// install succeeded, when `delete_archive_after_extract` is set.
    ///
    /// # Errors
    /// Returns [`UpdateError::Archive`] when the archive cannot be read and
    /// [`UpdateError::InstallIo`] when files cannot be removed or written.
    pub fn install_from(
        &self,
        archive: &Path,
        repository_key: &str,
        previous_file: Option<&str>,
    ) -> Result<InstallOutcome, UpdateError> {
        info!(
            "Extracting .{} files from {} into {} for {repository_key}",
            self.extension,
            archive.display(),
            self.target_dir.display()
        );

        let result = self.extract(archive, repository_key, previous_file);
        self.cleanup_archive(archive);
        result
    }

    fn extract(
        &self,
        archive: &Path,
        repository_key: &str,
        previous_file: Option<&str>,
    ) -> Result<InstallOutcome, UpdateError> {
        let file = File::open(archive).map_err(|error| {
            UpdateError::install_io_with_path("failed to open archive", archive, &error)
        })?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|error| UpdateError::archive("failed to read zip archive", error))?;

        let mut entries = Vec::new();
        for index in 0..zip.len() {
            let entry = zip
                .by_index(index)
                .map_err(|error| UpdateError::archive("failed to read zip entry", error))?;
            if !entry.is_file() {
                continue;
            }
            let Some(base_name) = entry
                .enclosed_name()
                .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
            else {
                warn!("Skipping zip entry with unsafe path: {}", entry.name());
                continue;
            };
            if self.is_installable(&base_name) {
                entries.push((index, base_name));
            }
        }

        let mut outcome = InstallOutcome::default();
        if entries.is_empty() {
            warn!(
                "Archive {} contains no .{} files, keeping the installed version of {repository_key}",
                archive.display(),
                self.extension
            );
            return Ok(outcome);
        }

        std::fs::create_dir_all(&self.target_dir).map_err(|error| {
            UpdateError::install_io_with_path(
                "failed to create plugin directory",
                &self.target_dir,
                &error,
            )
        })?;

        let mut staged = Vec::with_capacity(entries.len());
        for (index, base_name) in entries {
            let mut entry = zip
                .by_index(index)
                .map_err(|error| UpdateError::archive("failed to read zip entry", error))?;
            let mut temp = NamedTempFile::new_in(&self.target_dir).map_err(|error| {
                UpdateError::install_io_with_path(
                    "failed to stage archive entry",
                    &self.target_dir,
                    &error,
                )
            })?;
            std::io::copy(&mut entry, temp.as_file_mut()).map_err(|error| {
                UpdateError::install_io_with_path(
                    "failed to extract archive entry",
                    &self.target_dir.join(&base_name),
                    &error,
                )
            })?;
            temp.as_file().sync_all().map_err(|error| {
                UpdateError::install_io_with_path("failed to flush staged entry", temp.path(), &error)
            })?;
            staged.push((base_name, temp));
        }
        drop(zip);

        let previous = match previous_file {
            Some(previous) => self.set_aside_previous(previous)?,
            None => None,
        };

        match self.persist_staged(staged) {
            Ok(installed) => {
                if let Some((name, _backup)) = previous {
                    info!("Removed previous version {name}");
                    outcome.removed_previous = Some(name);
                }
                outcome.installed = installed;
                Ok(outcome)
            }
            Err(error) => {
                if let Some((name, backup)) = previous {
                    self.restore_previous(&name, backup);
                }
                Err(error)
            }
        }
    }

    /// Move every staged entry to its final name. On failure the entries
    /// already moved are removed again.
    fn persist_staged(&self, staged: Vec<(String, NamedTempFile)>) -> Result<Vec<String>, UpdateError> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut installed: Vec<String> = Vec::with_capacity(staged.len());

        for (base_name, temp) in staged {
            match persist_without_clobber(&self.target_dir, temp, &base_name, &timestamp) {
                Ok(file_name) => {
                    if file_name == base_name {
                        info!("Installed {file_name}");
                    } else {
                        info!("Installed {base_name} as {file_name} (name already taken)");
                    }
                    installed.push(file_name);
                }
                Err(error) => {
                    for name in &installed {
                        if let Err(remove_error) = std::fs::remove_file(self.target_dir.join(name)) {
                            warn!("Failed to roll back {name}: {remove_error}");
                        }
                    }
                    return Err(error);
                }
            }
        }

        Ok(installed)
    }

    /// Move the previously installed file out of the way. The returned
    /// path deletes it when dropped.
    fn set_aside_previous(&self, previous: &str) -> Result<Option<(String, TempPath)>, UpdateError> {
        if Path::new(previous).file_name().and_then(|name| name.to_str()) != Some(previous) {
            warn!("Ignoring recorded file name outside the plugin directory: {previous}");
            return Ok(None);
        }

        let path = self.target_dir.join(previous);
        let backup = tempfile::Builder::new()
            .prefix(".previous-")
            .tempfile_in(&self.target_dir)
            .map_err(|error| {
                UpdateError::install_io_with_path(
                    "failed to stage previous version",
                    &self.target_dir,
                    &error,
                )
            })?
            .into_temp_path();

        match std::fs::rename(&path, &backup) {
            Ok(()) => Ok(Some((previous.to_string(), backup))),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("Previous version {previous} is already gone");
                Ok(None)
            }
            Err(error) => Err(UpdateError::install_io_with_path(
                "failed to remove previous version",
                &path,
                &error,
            )),
        }
    }

    fn restore_previous(&self, name: &str, backup: TempPath) {
        let path = self.target_dir.join(name);
        match backup.keep() {
            Ok(backup_path) => {
                if let Err(error) = std::fs::rename(&backup_path, &path) {
                    warn!(
                        "Failed to restore {name} from {}: {error}",
                        backup_path.display()
                    );
                } else {
                    info!("Restored previous version {name}");
                }
            }
            Err(error) => warn!("Failed to restore {name}: {}", error.error),
        }
    }

    fn cleanup_archive(&self, archive: &Path) {
        if !self.delete_archive_after_extract {
            return;
        }
        match std::fs::remove_file(archive) {
            Ok(()) => debug!("Deleted archive {}", archive.display()),
            Err(error) => warn!("Failed to delete archive {}: {error}", archive.display()),
        }
    }

    /// Installable files currently present in the target directory, sorted.
    ///
    /// # Errors
    /// Returns [`UpdateError::InstallIo`] when the directory exists but cannot
    /// be read.
    pub fn list_installed(&self) -> Result<Vec<String>, UpdateError> {
        let entries = match std::fs::read_dir(&self.target_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(UpdateError::install_io_with_path(
                    "failed to read plugin directory",
                    &self.target_dir,
                    &error,
                ));
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| self.is_installable(name))
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Move `staged` to `base_name`, never overwriting an existing file. A taken
/// name gets `-<timestamp>` inserted before the extension, then a numeric
/// suffix if that is taken too.
fn persist_without_clobber(
    target_dir: &Path,
    staged: NamedTempFile,
    base_name: &str,
    timestamp: &str,
) -> Result<String, UpdateError> {
    let (stem, extension) = base_name.rsplit_once('.').unwrap_or((base_name, ""));

    let candidates = std::iter::once(base_name.to_string())
        .chain(std::iter::once(join_name(stem, timestamp, extension)))
        .chain((1..=64_u32).map(|n| join_name(stem, &format!("{timestamp}-{n}"), extension)));

    let mut staged = staged;
    for candidate in candidates {
        let path = target_dir.join(&candidate);
        match staged.persist_noclobber(&path) {
            Ok(_) => return Ok(candidate),
            Err(error) if error.error.kind() == std::io::ErrorKind::AlreadyExists => {
                staged = error.file;
            }
            Err(error) => {
                return Err(UpdateError::install_io_with_path(
                    "failed to install file",
                    &path,
                    &error.error,
                ));
            }
        }
    }

    Err(UpdateError::install_io(
        "failed to install file",
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free name for {base_name} in {}", target_dir.display()),
        ),
    ))
}

fn join_name(stem: &str, suffix: &str, extension: &str) -> String {
    if extension.is_empty() {
        format!("{stem}-{suffix}")
    } else {
        format!("{stem}-{suffix}.{extension}")
    }
}
