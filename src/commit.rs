//! Commit driver
//!
//! Wraps the package cache's fetch/unpack/configure transaction in chroot
//! preparation and progress reporting, and sorts commit failures into the two
//! channels the installer cares about:
//!
//! - **Fetch failure**: transient I/O. The transaction is aborted, nothing is
//!   reported as partially installed.
//! - **Solver error**: the transaction ran and complained. The message is kept
//!   and shown together with whatever is still broken afterwards.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::{CommitError, PackageCache, PackageName, broken_packages};
use crate::chroot::{ChrootGuard, ChrootOptions, Mounter};
use crate::error::Result;
use crate::progress::{BrokenReport, ProgressReporter, ProgressScope};

/// What the commit left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    /// Fetch failure that aborted the transaction
    pub aborted: Option<String>,
    /// Solver error raised by the transaction
    pub commit_error: Option<String>,
    /// Packages broken after the commit
    pub broken: BTreeSet<PackageName>,
}

impl CommitReport {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.commit_error.is_none() && self.broken.is_empty()
    }
}

/// Commit every pending mark with the target prepared for package scripts.
///
/// Progress is always stopped and the chroot always cleaned up, whichever
/// way this returns.
pub fn commit_transaction<C, M>(
    cache: &mut C,
    target: &Path,
    options: &ChrootOptions,
    mounter: &mut M,
    progress: &mut dyn ProgressReporter,
) -> Result<CommitReport>
where
    C: PackageCache + ?Sized,
    M: Mounter + ?Sized,
{
    let mut progress = ProgressScope::start(progress, "Installing extra packages");
    progress.set(10);

    let chroot = ChrootGuard::setup(target, options, mounter)?;
    let mut report = CommitReport::default();

    match cache.commit(&mut *progress) {
        Ok(()) => info!("Package transaction committed"),
        Err(CommitError::Fetch(msg)) => {
            error!("Failed to fetch packages, aborting: {}", msg);
            progress.error(&format!("Failed to fetch packages: {}", msg));
            report.aborted = Some(msg);
            chroot.teardown()?;
            return Ok(report);
        }
        Err(CommitError::Solver(msg)) => {
            warn!("Package transaction reported an error: {}", msg);
            report.commit_error = Some(msg);
        }
    }

    chroot.teardown()?;

    report.broken = broken_packages(cache);
    let broken = BrokenReport {
        broken: report.broken.clone(),
        commit_error: report.commit_error.clone(),
    };
    if !broken.is_empty() {
        progress.report_broken(&broken);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::{CommitScript, MemoryCache};
    use crate::cache::PackageState;
    use std::path::PathBuf;

    #[derive(Default)]
    struct CountingMounter {
        binds: usize,
        unmounts: usize,
    }

    impl Mounter for CountingMounter {
        fn bind(&mut self, _source: &Path, _target: &Path) -> Result<()> {
            self.binds += 1;
            Ok(())
        }

        fn unmount(&mut self, _target: &Path) -> Result<()> {
            self.unmounts += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Milestones(Vec<String>);

    impl ProgressReporter for Milestones {
        fn start(&mut self, _title: &str) {
            self.0.push("start".into());
        }
        fn set(&mut self, percent: u8) {
            self.0.push(format!("set {}", percent));
        }
        fn info(&mut self, _message: &str) {}
        fn error(&mut self, _message: &str) {
            self.0.push("error".into());
        }
        fn report_broken(&mut self, _report: &BrokenReport) {
            self.0.push("broken".into());
        }
        fn stop(&mut self) {
            self.0.push("stop".into());
        }
    }

    fn opts() -> ChrootOptions {
        ChrootOptions {
            bind_mounts: vec![PathBuf::from("/proc"), PathBuf::from("/sys")],
            block_service_starts: false,
        }
    }

    #[test]
    fn test_clean_commit() {
        let mut cache = MemoryCache::builder().package("a").build();
        cache.mark_install("a").unwrap();
        let mut mounter = CountingMounter::default();
        let mut progress = Milestones::default();

        let report =
            commit_transaction(&mut cache, Path::new("/target"), &opts(), &mut mounter, &mut progress)
                .unwrap();

        assert!(report.is_clean());
        assert_eq!(cache.state("a"), Some(PackageState::Installed));
        assert_eq!((mounter.binds, mounter.unmounts), (2, 2));
        assert_eq!(progress.0, vec!["start", "set 10", "stop"]);
    }

    #[test]
    fn test_fetch_failure_aborts() {
        let mut cache = MemoryCache::builder()
            .package("a")
            .commit_script(CommitScript::FetchFailure {
                message: "Hash Sum mismatch".into(),
            })
            .build();
        cache.mark_install("a").unwrap();
        let mut mounter = CountingMounter::default();
        let mut progress = Milestones::default();

        let report =
            commit_transaction(&mut cache, Path::new("/target"), &opts(), &mut mounter, &mut progress)
                .unwrap();

        assert_eq!(report.aborted.as_deref(), Some("Hash Sum mismatch"));
        assert!(report.broken.is_empty());
        assert_eq!(mounter.unmounts, 2);
        assert_eq!(progress.0, vec!["start", "set 10", "error", "stop"]);
    }

    #[test]
    fn test_solver_error_reported_with_broken() {
        let mut cache = MemoryCache::builder()
            .package("a")
            .package("b")
            .commit_script(CommitScript::SolverFailure {
                message: "E: Sub-process /usr/bin/dpkg returned an error code (1)".into(),
                broken: ["b".to_string()].into(),
            })
            .build();
        cache.mark_install("a").unwrap();
        let mut mounter = CountingMounter::default();
        let mut progress = Milestones::default();

        let report =
            commit_transaction(&mut cache, Path::new("/target"), &opts(), &mut mounter, &mut progress)
                .unwrap();

        assert!(report.commit_error.is_some());
        assert_eq!(report.broken, BTreeSet::from(["b".to_string()]));
        assert_eq!(progress.0, vec!["start", "set 10", "broken", "stop"]);
    }
}
