//! Package cache capability boundary
//!
//! The install pass never resolves dependencies itself. Everything it needs
//! from the package manager (lookup, candidate relations, install/keep marks,
//! broken-package introspection, commit) goes through [`PackageCache`].
//!
//! # Implementations
//!
//! - [`memory::MemoryCache`]: scripted in-process cache, loadable from a JSON
//!   snapshot. Drives the tests and the `simulate` command.
//! - `apt::AptCache` (feature `apt`): libapt-pkg rooted at the target.

use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::progress::ProgressReporter;

#[cfg(feature = "apt")]
pub mod apt;
pub mod memory;

/// Package identifier, unique within a cache.
pub type PackageName = String;

/// A list of alternatives (`a | b | c`); any one satisfies the group.
pub type DependencyGroup = Vec<Relation>;

/// Per-package status as seen by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PackageState {
    NotInstalled,
    Installed,
    Upgradable,
    MarkedInstall,
    MarkedKeep,
    Broken,
}

/// One dependency target of a candidate version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Target name, possibly carrying an architecture qualifier (`libc6:i386`)
    pub name: String,
    /// Version constraint as written (e.g. `>= 2.35`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Relation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    /// Architecture qualifier after the `:` separator, if any.
    pub fn arch_qualifier(&self) -> Option<&str> {
        self.name.split_once(':').map(|(_, arch)| arch)
    }

    pub fn is_arch_qualified(&self) -> bool {
        self.arch_qualifier().is_some()
    }
}

/// The version the cache would install for a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub version: String,
    #[serde(default)]
    pub depends: Vec<DependencyGroup>,
    #[serde(default)]
    pub recommends: Vec<DependencyGroup>,
}

impl Candidate {
    /// Every alternative of every depends and recommends group.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.depends.iter().chain(&self.recommends).flatten()
    }
}

/// Read-only snapshot of a package returned by [`PackageCache::package`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: PackageName,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub upgradable: bool,
    #[serde(default)]
    pub auto_installed: bool,
    #[serde(default)]
    pub candidate: Option<Candidate>,
}

impl Package {
    /// Not installed yet, or installed with a newer candidate available.
    pub fn needs_install(&self) -> bool {
        !self.installed || self.upgradable
    }
}

/// Errors raised by cache mutators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The underlying solver failed while applying a mark
    #[error("solver error: {0}")]
    Solver(String),

    #[error("unknown package: {0}")]
    UnknownPackage(String),

    /// Backend could not be opened or reset
    #[error("{0}")]
    Backend(String),
}

/// The two failure channels of a commit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// Transient I/O failure while fetching archives; nothing was installed
    #[error("failed to fetch packages: {0}")]
    Fetch(String),

    /// The install transaction itself reported an error
    #[error("{0}")]
    Solver(String),
}

/// Capabilities the install pass needs from a package database.
///
/// Implementations own all package state. Callers only issue transitions and
/// re-read state afterwards; nothing here is cached on the caller's side.
pub trait PackageCache {
    /// Look up a package by name.
    fn package(&self, name: &str) -> Option<Package>;

    /// Current state of a package, `None` on a lookup miss.
    fn state(&self, name: &str) -> Option<PackageState>;

    /// Every package name known to the cache.
    fn package_names(&self) -> Vec<PackageName>;

    /// Mark a package (and its dependencies) for installation.
    fn mark_install(&mut self, name: &str) -> Result<(), CacheError>;

    /// Undo any pending change on a package.
    fn mark_keep(&mut self, name: &str) -> Result<(), CacheError>;

    /// Set or clear the "automatically installed" flag.
    fn mark_auto(&mut self, name: &str, auto: bool) -> Result<(), CacheError>;

    /// Number of packages whose marked state cannot be satisfied.
    fn broken_count(&self) -> usize;

    fn is_inst_broken(&self, name: &str) -> bool;

    /// Defer expensive recomputation until [`end_action_group`](Self::end_action_group).
    fn begin_action_group(&mut self);

    fn end_action_group(&mut self);

    /// Fetch, unpack and configure everything marked.
    fn commit(&mut self, progress: &mut dyn ProgressReporter) -> Result<(), CommitError>;

    /// Drop every pending mark, returning to the last committed state.
    fn clear(&mut self) -> Result<(), CacheError>;
}

/// Names of all packages currently broken.
///
/// Recomputed from the cache on every call. The scan stops once
/// `broken_count` packages have been found.
pub fn broken_packages<C: PackageCache + ?Sized>(cache: &C) -> BTreeSet<PackageName> {
    let expected = cache.broken_count();
    let mut broken = BTreeSet::new();
    if expected == 0 {
        return broken;
    }

    for name in cache.package_names() {
        if cache.is_inst_broken(&name) {
            broken.insert(name);
            if broken.len() >= expected {
                break;
            }
        }
    }
    broken
}

/// Scoped action group; the group ends when the guard is dropped.
pub struct ActionGroup<'a, C: PackageCache + ?Sized> {
    cache: &'a mut C,
}

impl<'a, C: PackageCache + ?Sized> ActionGroup<'a, C> {
    pub fn new(cache: &'a mut C) -> Self {
        cache.begin_action_group();
        Self { cache }
    }
}

impl<C: PackageCache + ?Sized> Deref for ActionGroup<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &*self.cache
    }
}

impl<C: PackageCache + ?Sized> DerefMut for ActionGroup<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut *self.cache
    }
}

impl<C: PackageCache + ?Sized> Drop for ActionGroup<'_, C> {
    fn drop(&mut self) {
        self.cache.end_action_group();
    }
}
