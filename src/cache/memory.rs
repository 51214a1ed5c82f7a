//! In-process package cache driven by a scripted package table.
//!
//! Dependency resolution is not modelled. Instead, conflict rules state which
//! packages become broken when a trigger package is marked. That is enough to
//! reproduce the broken-package sequences a real solver produces and to run
//! the recovery algorithm against them, both from tests and from a JSON
//! snapshot via the `simulate` command.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    Candidate, CacheError, CommitError, Package, PackageCache, PackageName, PackageState,
    Relation,
};
use crate::error::{InstallError, Result};
use crate::progress::ProgressReporter;

/// Which mark on the trigger package activates a [`ConflictRule`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleTrigger {
    #[default]
    Install,
    /// Only packages currently marked for install are broken by a keep rule
    Keep,
}

/// "Marking `trigger` breaks `breaks`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRule {
    pub trigger: PackageName,
    #[serde(default)]
    pub on: RuleTrigger,
    pub breaks: BTreeSet<PackageName>,
    /// The breakage stays until the cache is cleared, even if the trigger
    /// is reverted to keep (a self-conflict).
    #[serde(default)]
    pub survives_keep: bool,
}

/// What [`MemoryCache::commit`] does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "result")]
pub enum CommitScript {
    #[default]
    Succeed,
    FetchFailure {
        message: String,
    },
    /// Install the marks, then report `message` and leave `broken` broken.
    SolverFailure {
        message: String,
        #[serde(default)]
        broken: BTreeSet<PackageName>,
    },
}

/// Serializable description of a [`MemoryCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub packages: Vec<Package>,
    #[serde(default)]
    pub conflicts: Vec<ConflictRule>,
    /// Packages broken before anything is marked
    #[serde(default)]
    pub broken: BTreeSet<PackageName>,
    /// Packages whose mark raises a solver error, with the error text
    #[serde(default)]
    pub failing_marks: BTreeMap<PackageName, String>,
    #[serde(default)]
    pub commit: CommitScript,
}

/// Every state-changing call made on a [`MemoryCache`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Install(PackageName),
    Keep(PackageName),
    Auto(PackageName, bool),
    Clear,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Install,
    Keep,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    packages: BTreeMap<PackageName, Package>,
    conflicts: Vec<ConflictRule>,
    preexisting: BTreeSet<PackageName>,
    failing_marks: BTreeMap<PackageName, String>,
    commit_script: CommitScript,
    marks: BTreeMap<PackageName, Mark>,
    sticky: BTreeSet<PackageName>,
    mutations: Vec<Mutation>,
    action_depth: usize,
}

impl MemoryCache {
    pub fn builder() -> MemoryCacheBuilder {
        MemoryCacheBuilder::default()
    }

    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            packages: snapshot
                .packages
                .into_iter()
                .map(|pkg| (pkg.name.clone(), pkg))
                .collect(),
            conflicts: snapshot.conflicts,
            preexisting: snapshot.broken,
            failing_marks: snapshot.failing_marks,
            commit_script: snapshot.commit,
            ..Self::default()
        }
    }

    /// Load a cache from a JSON [`CacheSnapshot`] file.
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            InstallError::general(format!("Failed to read snapshot {}: {}", path.display(), e))
        })?;
        let snapshot: CacheSnapshot = serde_json::from_str(&content)?;
        debug!(
            "Loaded cache snapshot {} ({} packages)",
            path.display(),
            snapshot.packages.len()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// State-changing calls made so far.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Current action group nesting.
    pub fn action_depth(&self) -> usize {
        self.action_depth
    }

    fn broken_set(&self) -> BTreeSet<PackageName> {
        let mut broken: BTreeSet<PackageName> =
            self.preexisting.iter().chain(&self.sticky).cloned().collect();

        for rule in &self.conflicts {
            match (rule.on, self.marks.get(&rule.trigger)) {
                (RuleTrigger::Install, Some(Mark::Install)) => {
                    broken.extend(rule.breaks.iter().cloned());
                }
                (RuleTrigger::Keep, Some(Mark::Keep)) => {
                    broken.extend(
                        rule.breaks
                            .iter()
                            .filter(|name| self.marks.get(*name) == Some(&Mark::Install))
                            .cloned(),
                    );
                }
                _ => {}
            }
        }

        broken.retain(|name| self.packages.contains_key(name));
        broken
    }

    fn known(&self, name: &str) -> std::result::Result<(), CacheError> {
        if self.packages.contains_key(name) {
            Ok(())
        } else {
            Err(CacheError::UnknownPackage(name.to_string()))
        }
    }
}

impl PackageCache for MemoryCache {
    fn package(&self, name: &str) -> Option<Package> {
        self.packages.get(name).cloned()
    }

    fn state(&self, name: &str) -> Option<PackageState> {
        let pkg = self.packages.get(name)?;
        let state = if self.broken_set().contains(name) {
            PackageState::Broken
        } else {
            match self.marks.get(name) {
                Some(Mark::Install) => PackageState::MarkedInstall,
                Some(Mark::Keep) => PackageState::MarkedKeep,
                None if pkg.installed && pkg.upgradable => PackageState::Upgradable,
                None if pkg.installed => PackageState::Installed,
                None => PackageState::NotInstalled,
            }
        };
        Some(state)
    }

    fn package_names(&self) -> Vec<PackageName> {
        self.packages.keys().cloned().collect()
    }

    fn mark_install(&mut self, name: &str) -> std::result::Result<(), CacheError> {
        self.known(name)?;
        self.mutations.push(Mutation::Install(name.to_string()));
        self.marks.insert(name.to_string(), Mark::Install);

        for rule in &self.conflicts {
            if rule.trigger == name && rule.on == RuleTrigger::Install && rule.survives_keep {
                self.sticky.extend(rule.breaks.iter().cloned());
            }
        }

        // libapt leaves the partial mark behind when it raises
        match self.failing_marks.get(name) {
            Some(message) => Err(CacheError::Solver(message.clone())),
            None => Ok(()),
        }
    }

    fn mark_keep(&mut self, name: &str) -> std::result::Result<(), CacheError> {
        self.known(name)?;
        self.mutations.push(Mutation::Keep(name.to_string()));
        self.marks.insert(name.to_string(), Mark::Keep);
        Ok(())
    }

    fn mark_auto(&mut self, name: &str, auto: bool) -> std::result::Result<(), CacheError> {
        let pkg = self
            .packages
            .get_mut(name)
            .ok_or_else(|| CacheError::UnknownPackage(name.to_string()))?;
        pkg.auto_installed = auto;
        self.mutations.push(Mutation::Auto(name.to_string(), auto));
        Ok(())
    }

    fn broken_count(&self) -> usize {
        self.broken_set().len()
    }

    fn is_inst_broken(&self, name: &str) -> bool {
        self.broken_set().contains(name)
    }

    fn begin_action_group(&mut self) {
        self.action_depth += 1;
    }

    fn end_action_group(&mut self) {
        self.action_depth = self.action_depth.saturating_sub(1);
    }

    fn commit(&mut self, progress: &mut dyn ProgressReporter) -> std::result::Result<(), CommitError> {
        self.mutations.push(Mutation::Commit);

        if let CommitScript::FetchFailure { message } = &self.commit_script {
            return Err(CommitError::Fetch(message.clone()));
        }

        let marked: Vec<PackageName> = self
            .marks
            .iter()
            .filter(|(_, mark)| **mark == Mark::Install)
            .map(|(name, _)| name.clone())
            .collect();
        for name in marked {
            if let Some(pkg) = self.packages.get_mut(&name) {
                let version = pkg
                    .candidate
                    .as_ref()
                    .map(|c| c.version.clone())
                    .unwrap_or_default();
                progress.info(&format!("Setting up {} ({})", name, version));
                pkg.installed = true;
                pkg.upgradable = false;
            }
        }
        self.marks.clear();
        self.sticky.clear();

        match &self.commit_script {
            CommitScript::SolverFailure { message, broken } => {
                self.sticky = broken.clone();
                Err(CommitError::Solver(message.clone()))
            }
            _ => Ok(()),
        }
    }

    fn clear(&mut self) -> std::result::Result<(), CacheError> {
        self.mutations.push(Mutation::Clear);
        self.marks.clear();
        self.sticky.clear();
        Ok(())
    }
}

/// Fluent construction of a [`MemoryCache`], mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryCacheBuilder {
    snapshot: CacheSnapshot,
}

impl MemoryCacheBuilder {
    /// A package that is not installed, with a dependency-free candidate.
    pub fn package(self, name: &str) -> Self {
        self.with_package(Package {
            name: name.to_string(),
            installed: false,
            upgradable: false,
            auto_installed: false,
            candidate: Some(Candidate {
                version: "1.0".to_string(),
                ..Candidate::default()
            }),
        })
    }

    pub fn installed(self, name: &str) -> Self {
        self.package(name).update(name, |pkg| {
            pkg.installed = true;
            pkg.auto_installed = true;
        })
    }

    pub fn upgradable(self, name: &str) -> Self {
        self.installed(name).update(name, |pkg| pkg.upgradable = true)
    }

    pub fn with_package(mut self, package: Package) -> Self {
        self.snapshot.packages.retain(|p| p.name != package.name);
        self.snapshot.packages.push(package);
        self
    }

    /// Replace the candidate relations of an existing package.
    pub fn relations(self, name: &str, depends: &[&str], recommends: &[&str]) -> Self {
        let groups = |names: &[&str]| -> Vec<Vec<Relation>> {
            names.iter().map(|n| vec![Relation::new(*n)]).collect()
        };
        let (depends, recommends) = (groups(depends), groups(recommends));
        self.update(name, move |pkg| {
            let candidate = pkg.candidate.get_or_insert_with(Candidate::default);
            candidate.depends = depends;
            candidate.recommends = recommends;
        })
    }

    /// Marking `trigger` for install breaks `breaks` until `trigger` is kept.
    pub fn conflict(mut self, trigger: &str, breaks: &[&str]) -> Self {
        self.snapshot.conflicts.push(rule(trigger, RuleTrigger::Install, breaks, false));
        self
    }

    /// Like [`conflict`](Self::conflict), but keeping `trigger` does not help.
    pub fn sticky_conflict(mut self, trigger: &str, breaks: &[&str]) -> Self {
        self.snapshot.conflicts.push(rule(trigger, RuleTrigger::Install, breaks, true));
        self
    }

    /// Keeping `trigger` breaks whichever of `breaks` are marked for install.
    pub fn keep_conflict(mut self, trigger: &str, breaks: &[&str]) -> Self {
        self.snapshot.conflicts.push(rule(trigger, RuleTrigger::Keep, breaks, false));
        self
    }

    pub fn broken(mut self, name: &str) -> Self {
        self.snapshot.broken.insert(name.to_string());
        self
    }

    pub fn failing_mark(mut self, name: &str, message: &str) -> Self {
        self.snapshot
            .failing_marks
            .insert(name.to_string(), message.to_string());
        self
    }

    pub fn commit_script(mut self, script: CommitScript) -> Self {
        self.snapshot.commit = script;
        self
    }

    pub fn snapshot(self) -> CacheSnapshot {
        self.snapshot
    }

    pub fn build(self) -> MemoryCache {
        MemoryCache::from_snapshot(self.snapshot)
    }

    fn update(mut self, name: &str, f: impl FnOnce(&mut Package)) -> Self {
        if let Some(pkg) = self.snapshot.packages.iter_mut().find(|p| p.name == name) {
            f(pkg);
        }
        self
    }
}

fn rule(trigger: &str, on: RuleTrigger, breaks: &[&str], survives_keep: bool) -> ConflictRule {
    ConflictRule {
        trigger: trigger.to_string(),
        on,
        breaks: breaks.iter().map(|b| b.to_string()).collect(),
        survives_keep,
    }
}
