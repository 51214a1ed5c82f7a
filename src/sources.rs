//! Sources-list toggle
//!
//! Extra packages are only ever installed from the installation medium, since
//! that is what has already been verified. While a [`SourcesListGuard`] is
//! held, the target's `sources.list` contains only the lines that reference
//! the local medium; the original file is moved aside and renamed back when
//! the guard is released or dropped.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::error::{InstallError, Result};

/// Suffix of the original list while the filtered copy is in place.
pub const BACKUP_SUFFIX: &str = ".apt-setup";

/// Lines containing this marker reference the installation medium.
pub const LOCAL_MEDIUM_MARKER: &str = "cdrom:";

/// Scoped rewrite of a sources list down to local-medium lines.
#[derive(Debug)]
pub struct SourcesListGuard {
    path: PathBuf,
    backup: PathBuf,
    active: bool,
}

impl SourcesListGuard {
    /// Move `path` aside and write a copy holding only lines containing
    /// `marker`.
    ///
    /// Without any matching line there is nothing to filter to: the original
    /// is put straight back and the guard is inactive.
    pub fn acquire<P: AsRef<Path>>(path: P, marker: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let backup = backup_path(&path);

        fs::rename(&path, &backup).map_err(|e| {
            InstallError::sources_list(format!("failed to move {} aside: {}", path.display(), e))
        })?;

        let mut guard = Self {
            path,
            backup,
            active: true,
        };

        let original = match fs::read_to_string(&guard.backup) {
            Ok(content) => content,
            Err(e) => {
                guard.restore()?;
                return Err(e.into());
            }
        };

        let Some(filtered) = filter_local_lines(&original, marker) else {
            info!(
                "No {} entry in {}, leaving it untouched",
                marker,
                guard.path.display()
            );
            guard.restore()?;
            return Ok(guard);
        };

        if let Err(e) = fs::write(&guard.path, filtered) {
            guard.restore()?;
            return Err(e.into());
        }

        info!(
            "Restricted {} to installation medium entries",
            guard.path.display()
        );
        Ok(guard)
    }

    /// Whether the filtered list is currently in place.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Put the original list back.
    pub fn release(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        fs::rename(&self.backup, &self.path).map_err(|e| {
            InstallError::sources_list(format!(
                "failed to restore {} from {}: {}",
                self.path.display(),
                self.backup.display(),
                e
            ))
        })?;
        debug!("Restored {}", self.path.display());
        Ok(())
    }
}

impl Drop for SourcesListGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("{}", e);
        }
    }
}

/// `sources.list` -> `sources.list.apt-setup`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Lines of `content` containing `marker`, line endings preserved.
/// `None` when no line matches.
pub fn filter_local_lines(content: &str, marker: &str) -> Option<String> {
    let filtered: String = content
        .split_inclusive('\n')
        .filter(|line| line.contains(marker))
        .collect();

    if filtered.is_empty() {
        None
    } else {
        Some(filtered)
    }
}
