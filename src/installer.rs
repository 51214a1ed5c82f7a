//! Installer module
//!
//! Runs the extras install pass end to end: restrict the target's sources to
//! the installation medium, open the package cache, resolve the recorded
//! selections and commit whatever ended up marked.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{error, info};

use crate::cache::{PackageCache, PackageName};
use crate::chroot::Mounter;
use crate::commit::{CommitReport, commit_transaction};
use crate::config::InstallerConfig;
use crate::error::Result;
use crate::filter::{FilterOutcome, filter_multiarch};
use crate::progress::ProgressReporter;
use crate::resolver::{ResolveOutcome, do_install};
use crate::selections::query_recorded_installed;
use crate::sources::SourcesListGuard;

/// What one install pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Whether the sources list was restricted to the installation medium
    pub sources_filtered: bool,
    /// Packages left for the later multiarch pass
    pub deferred: BTreeSet<PackageName>,
    pub resolve: ResolveOutcome,
    /// `None` when nothing needed committing or in dry-run mode
    pub commit: Option<CommitReport>,
}

/// Installer instance
pub struct Installer {
    config: InstallerConfig,
}

impl Installer {
    /// Create a new installer instance
    pub fn new(config: InstallerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Install the packages other installer components asked for.
    ///
    /// `open_cache` is called once the sources list is filtered, so the cache
    /// only sees the installation medium. The original sources list is back
    /// in place when this returns, whether it succeeded or not.
    pub fn install_extras<C, F, M>(
        &self,
        open_cache: F,
        mounter: &mut M,
        progress: &mut dyn ProgressReporter,
    ) -> Result<InstallReport>
    where
        C: PackageCache,
        F: FnOnce(&InstallerConfig) -> Result<C>,
        M: Mounter + ?Sized,
    {
        let guard = if self.config.filter_sources {
            Some(SourcesListGuard::acquire(
                self.config.sources_list_path(),
                &self.config.local_medium_marker,
            )?)
        } else {
            None
        };
        let sources_filtered = guard.as_ref().is_some_and(SourcesListGuard::is_active);

        let result = self.run_pass(open_cache, mounter, progress, sources_filtered);

        if let Some(guard) = guard {
            if let Err(e) = guard.release() {
                if result.is_ok() {
                    return Err(e);
                }
                error!("{}", e);
            }
        }

        result
    }

    fn run_pass<C, F, M>(
        &self,
        open_cache: F,
        mounter: &mut M,
        progress: &mut dyn ProgressReporter,
        sources_filtered: bool,
    ) -> Result<InstallReport>
    where
        C: PackageCache,
        F: FnOnce(&InstallerConfig) -> Result<C>,
        M: Mounter + ?Sized,
    {
        let mut cache = open_cache(&self.config)?;

        let recorded = query_recorded_installed(&self.config.record_path)?;
        info!("{} recorded package(s) requested", recorded.len());

        let FilterOutcome {
            selection,
            deferred,
        } = filter_multiarch(recorded, &cache);
        if !deferred.is_empty() {
            info!("Deferring {} multiarch package(s)", deferred.len());
        }

        let resolve = do_install(&mut cache, &selection);
        let summary = resolve.clone().into_result()?;

        let commit = if !summary.has_changes() {
            info!("Nothing to install");
            None
        } else if self.config.dry_run {
            info!(
                "[dry-run] would install: {}",
                summary.installed.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            None
        } else {
            Some(commit_transaction(
                &mut cache,
                &self.config.target,
                &self.config.chroot_options(),
                mounter,
                progress,
            )?)
        };

        Ok(InstallReport {
            sources_filtered,
            deferred,
            resolve,
            commit,
        })
    }
}
