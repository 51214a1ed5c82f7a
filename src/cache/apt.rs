//! libapt-pkg backed package cache
//!
//! Opens the apt cache of the target root (not the live system) through
//! `rust-apt` and exposes it as a [`PackageCache`]. Fetch and install
//! progress is written by apt itself; milestones go through the installer's
//! [`ProgressReporter`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rust_apt::cache::{Cache, PackageSort};
use rust_apt::config::Config;
use rust_apt::error::{AptErrors, pending_error};
use rust_apt::progress::{AcquireProgress, InstallProgress};
use rust_apt::{BaseDep, Dependency};
use tracing::{debug, info};

use super::{
    CacheError, Candidate, CommitError, DependencyGroup, Package, PackageCache, PackageName,
    PackageState, Relation,
};
use crate::error::{InstallError, Result};
use crate::progress::ProgressReporter;

/// Package cache of the target system.
pub struct AptCache {
    root: PathBuf,
    cache: Option<Cache>,
    /// Packages reverted to keep since the last commit or clear
    kept: BTreeSet<PackageName>,
}

impl AptCache {
    /// Open the apt cache rooted at `target`.
    pub fn open<P: AsRef<Path>>(target: P) -> Result<Self> {
        let root = target.as_ref().to_path_buf();
        let cache = Self::build(&root).map_err(InstallError::Cache)?;
        info!("apt cache opened: root={}", root.display());

        Ok(Self {
            root,
            cache: Some(cache),
            kept: BTreeSet::new(),
        })
    }

    fn build(root: &Path) -> std::result::Result<Cache, CacheError> {
        let root_str = root
            .to_str()
            .ok_or_else(|| CacheError::Backend("Root path contains invalid UTF-8".into()))?;

        let config = Config::new();
        config.set("RootDir", root_str);
        config.set("DPkg::Chroot-Directory", root_str);

        Cache::new::<&str>(&[]).map_err(|e| CacheError::Backend(apt_message(&e)))
    }

    fn cache(&self) -> std::result::Result<&Cache, CacheError> {
        self.cache
            .as_ref()
            .ok_or_else(|| CacheError::Backend("apt cache is not open".into()))
    }

    /// Solver errors apt queued up during the last call, if any.
    fn take_solver_error() -> std::result::Result<(), CacheError> {
        if pending_error() {
            Err(CacheError::Solver(apt_message(&AptErrors::new())))
        } else {
            Ok(())
        }
    }
}

impl PackageCache for AptCache {
    fn package(&self, name: &str) -> Option<Package> {
        let cache = self.cache().ok()?;
        let pkg = cache.get(name)?;

        let candidate = pkg.candidate().map(|ver| Candidate {
            version: ver.version().to_string(),
            depends: ver.dependencies().map(convert_groups).unwrap_or_default(),
            recommends: ver.recommends().map(convert_groups).unwrap_or_default(),
        });

        Some(Package {
            name: pkg.name().to_string(),
            installed: pkg.is_installed(),
            upgradable: pkg.is_upgradable(),
            auto_installed: pkg.is_auto_installed(),
            candidate,
        })
    }

    fn state(&self, name: &str) -> Option<PackageState> {
        let cache = self.cache().ok()?;
        let pkg = cache.get(name)?;

        let state = if pkg.is_inst_broken() {
            PackageState::Broken
        } else if pkg.marked_install() || pkg.marked_upgrade() {
            PackageState::MarkedInstall
        } else if self.kept.contains(name) {
            PackageState::MarkedKeep
        } else if pkg.is_installed() && pkg.is_upgradable() {
            PackageState::Upgradable
        } else if pkg.is_installed() {
            PackageState::Installed
        } else {
            PackageState::NotInstalled
        };
        Some(state)
    }

    fn package_names(&self) -> Vec<PackageName> {
        match self.cache() {
            Ok(cache) => cache
                .packages(&PackageSort::default())
                .map(|pkg| pkg.name().to_string())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn mark_install(&mut self, name: &str) -> std::result::Result<(), CacheError> {
        self.kept.remove(name);
        let cache = self.cache()?;
        let pkg = cache
            .get(name)
            .ok_or_else(|| CacheError::UnknownPackage(name.to_string()))?;

        pkg.mark_install(true, true);
        Self::take_solver_error()?;

        // let apt's problem resolver work around the new mark before any
        // package gets kept back
        if cache.depcache().broken_count() > 0 {
            pkg.protect();
            cache
                .resolve(true)
                .map_err(|e| CacheError::Solver(apt_message(&e)))?;
            debug!("apt problem resolver ran for {}", name);
        }
        Ok(())
    }

    fn mark_keep(&mut self, name: &str) -> std::result::Result<(), CacheError> {
        // field borrow, so `kept` stays writable while `pkg` is alive
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| CacheError::Backend("apt cache is not open".into()))?;
        let pkg = cache
            .get(name)
            .ok_or_else(|| CacheError::UnknownPackage(name.to_string()))?;

        pkg.mark_keep();
        self.kept.insert(name.to_string());
        Self::take_solver_error()
    }

    fn mark_auto(&mut self, name: &str, auto: bool) -> std::result::Result<(), CacheError> {
        let cache = self.cache()?;
        let pkg = cache
            .get(name)
            .ok_or_else(|| CacheError::UnknownPackage(name.to_string()))?;

        pkg.mark_auto(auto);
        Self::take_solver_error()
    }

    fn broken_count(&self) -> usize {
        self.cache()
            .map(|cache| cache.depcache().broken_count() as usize)
            .unwrap_or(0)
    }

    fn is_inst_broken(&self, name: &str) -> bool {
        self.cache()
            .ok()
            .and_then(|cache| cache.get(name))
            .is_some_and(|pkg| pkg.is_inst_broken())
    }

    // libapt-pkg recomputes after every mark; grouping is not exposed.
    fn begin_action_group(&mut self) {}

    fn end_action_group(&mut self) {}

    fn commit(
        &mut self,
        progress: &mut dyn ProgressReporter,
    ) -> std::result::Result<(), CommitError> {
        let cache = self
            .cache
            .take()
            .ok_or_else(|| CommitError::Solver("apt cache is not open".into()))?;

        progress.info("Downloading packages");
        if let Err(e) = cache.get_archives(&mut AcquireProgress::apt()) {
            let msg = apt_message(&e);
            self.cache = Some(cache);
            return Err(CommitError::Fetch(msg));
        }

        progress.set(50);
        progress.info("Installing packages");
        let result = cache
            .do_install(&mut InstallProgress::apt())
            .map_err(|e| CommitError::Solver(apt_message(&e)));

        // Re-read the target's status so broken packages reflect what dpkg left
        self.kept.clear();
        let reopened = Self::build(&self.root).map_err(|e| CommitError::Solver(e.to_string()))?;
        self.cache = Some(reopened);
        debug!("apt cache reopened after commit");

        result
    }

    fn clear(&mut self) -> std::result::Result<(), CacheError> {
        self.cache = None;
        self.cache = Some(Self::build(&self.root)?);
        self.kept.clear();
        debug!("Discarded pending apt marks");
        Ok(())
    }
}

fn convert_groups(deps: Vec<Dependency>) -> Vec<DependencyGroup> {
    deps.iter()
        .map(|dep| dep.iter().map(convert_base).collect())
        .collect()
}

fn convert_base(base: &BaseDep) -> Relation {
    Relation {
        name: base.name().to_string(),
        version: base.version().map(|v| v.to_string()),
    }
}

fn apt_message(errors: &AptErrors) -> String {
    errors
        .iter()
        .map(|e| e.msg.clone())
        .collect::<Vec<_>>()
        .join("; ")
}
