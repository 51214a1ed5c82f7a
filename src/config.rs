//! Configuration file handling for the extras install pass.
//!
//! Every field has a default matching the stock installer layout, so a
//! config file only needs to name what differs. Values given on the command
//! line override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::chroot::{ChrootOptions, DEFAULT_BIND_MOUNTS};
use crate::selections::RECORDED_SELECTIONS_PATH;
use crate::sources::LOCAL_MEDIUM_MARKER;

/// Settings for one install pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Root of the system being installed
    pub target: PathBuf,
    /// Selections record written by other installer components
    pub record_path: PathBuf,
    /// Installer state directory, created at startup
    pub state_dir: PathBuf,
    /// Sources list, relative to `target`
    pub sources_list: PathBuf,
    /// Marker identifying installation medium lines in the sources list
    pub local_medium_marker: String,
    /// Restrict the sources list to the installation medium during the pass
    pub filter_sources: bool,
    /// Host paths bind-mounted into the target during the commit
    pub bind_mounts: Vec<PathBuf>,
    /// Install a policy-rc.d that stops maintainer scripts starting services
    pub block_service_starts: bool,
    /// Resolve only; never commit
    pub dry_run: bool,
}

impl InstallerConfig {
    /// Absolute path of the target's sources list
    pub fn sources_list_path(&self) -> PathBuf {
        self.target.join(&self.sources_list)
    }

    pub fn chroot_options(&self) -> ChrootOptions {
        ChrootOptions {
            bind_mounts: self.bind_mounts.clone(),
            block_service_starts: self.block_service_starts,
        }
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.target.is_absolute() {
            anyhow::bail!("Target root must be an absolute path");
        }
        if self.target == Path::new("/") {
            anyhow::bail!("Target root must not be the live system root");
        }

        if self.sources_list.as_os_str().is_empty() || self.sources_list.is_absolute() {
            anyhow::bail!("Sources list must be a path relative to the target root");
        }

        if self.filter_sources && self.local_medium_marker.trim().is_empty() {
            anyhow::bail!("Local medium marker must be specified when filtering sources");
        }

        if self.record_path.as_os_str().is_empty() {
            anyhow::bail!("Selections record path must be specified");
        }

        if let Some(mount) = self.bind_mounts.iter().find(|m| !m.is_absolute()) {
            anyhow::bail!("Bind mount source {:?} must be an absolute path", mount);
        }

        Ok(())
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            target: PathBuf::from("/target"),
            record_path: PathBuf::from(RECORDED_SELECTIONS_PATH),
            state_dir: PathBuf::from("/var/lib/ubiquity"),
            sources_list: PathBuf::from("etc/apt/sources.list"),
            local_medium_marker: LOCAL_MEDIUM_MARKER.to_string(),
            filter_sources: true,
            bind_mounts: DEFAULT_BIND_MOUNTS.iter().map(PathBuf::from).collect(),
            block_service_starts: true,
            dry_run: false,
        }
    }
}
