//! Broken-package resolver
//!
//! Drives the package cache from "selected packages marked for install" to a
//! consistent state. The resolver never looks for alternative packages: when a
//! mark leaves packages broken it reverts the broken packages to keep, over and
//! over, until nothing is broken or the broken set stops changing.
//!
//! # Outcomes
//!
//! | Situation                              | Result                           |
//! |----------------------------------------|----------------------------------|
//! | Cache broken before anything is marked | `PreexistingBroken`, no marks    |
//! | Every mark clean                       | `Success`                        |
//! | Some packages reverted, nothing broken | `Partial`                        |
//! | Recovery stuck with broken packages    | `FatalConflict`, marks cleared   |

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::{ActionGroup, CacheError, PackageCache, PackageName, PackageState, broken_packages};
use crate::error::{InstallError, Result};
use crate::selections::SelectionSet;

/// Upper bound on keep passes for a single package. A cache whose broken set
/// keeps changing forever is treated as stuck once this is reached.
pub const MAX_RECOVERY_PASSES: usize = 256;

/// What happened to one selected package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// Not in the cache; skipped without touching anything.
    Unavailable,
    /// Already installed and current; the auto-installed flag was cleared.
    MarkedManual,
    /// Marked for install with nothing broken.
    Marked,
    /// Marking broke something; recovery reverted `kept` and succeeded.
    Recovered { kept: BTreeSet<PackageName> },
    /// Recovery could not get rid of `broken`.
    Conflict { broken: BTreeSet<PackageName> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkResult {
    pub outcome: MarkOutcome,
    /// Error raised by the solver while marking, if any
    pub apt_error: Option<CacheError>,
}

/// Result of one run of the keep loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Every package reverted to keep
    pub kept: BTreeSet<PackageName>,
    /// Broken set when the loop stopped
    pub remaining: BTreeSet<PackageName>,
    pub passes: usize,
}

/// Per-batch bookkeeping returned on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveSummary {
    /// Selected packages still marked for install at the end of the batch
    pub installed: BTreeSet<PackageName>,
    /// Packages reverted to keep by recovery
    pub kept: BTreeSet<PackageName>,
    /// Already-installed packages flagged as manually installed
    pub manual: BTreeSet<PackageName>,
    pub unavailable: BTreeSet<PackageName>,
    /// Solver errors raised while marking, by package
    pub apt_errors: BTreeMap<PackageName, String>,
}

impl ResolveSummary {
    /// Whether a commit has anything to do.
    pub fn has_changes(&self) -> bool {
        !self.installed.is_empty() || !self.manual.is_empty()
    }
}

/// Outcome of [`do_install`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ResolveOutcome {
    Success(ResolveSummary),
    Partial(ResolveSummary),
    FatalConflict {
        package: PackageName,
        broken: BTreeSet<PackageName>,
    },
    PreexistingBroken {
        broken: BTreeSet<PackageName>,
    },
}

impl ResolveOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Partial(_))
    }

    /// Turn fatal outcomes into the install step error the caller propagates.
    pub fn into_result(self) -> Result<ResolveSummary> {
        match self {
            Self::Success(summary) | Self::Partial(summary) => Ok(summary),
            Self::FatalConflict { package, .. } => Err(InstallError::conflict(&package)),
            Self::PreexistingBroken { broken } => Err(InstallError::BrokenCache(broken)),
        }
    }
}

/// Revert broken packages to keep until none are broken or the broken set
/// repeats.
pub fn recover_broken<C: PackageCache + ?Sized>(cache: &mut C) -> Recovery {
    let mut recovery = Recovery::default();
    let mut broken = broken_packages(cache);

    while !broken.is_empty() {
        if recovery.passes == MAX_RECOVERY_PASSES {
            warn!(
                "Giving up on broken packages after {} passes",
                MAX_RECOVERY_PASSES
            );
            break;
        }
        recovery.passes += 1;

        for name in &broken {
            if let Err(e) = cache.mark_keep(name) {
                warn!("Could not keep {}: {}", name, e);
            }
            recovery.kept.insert(name.clone());
        }

        let next = broken_packages(cache);
        if next == broken {
            // we can do nothing more
            debug!("Broken set unchanged after pass {}", recovery.passes);
            break;
        }
        broken = next;
    }

    recovery.remaining = broken;
    recovery
}

/// Mark one selected package and recover from any breakage it causes.
pub fn mark_install<C: PackageCache + ?Sized>(cache: &mut C, name: &str) -> MarkResult {
    let Some(pkg) = cache.package(name) else {
        debug!("{} is not available, skipping", name);
        return MarkResult {
            outcome: MarkOutcome::Unavailable,
            apt_error: None,
        };
    };

    if !pkg.needs_install() {
        if let Err(e) = cache.mark_auto(name, false) {
            warn!("Could not mark {} as manually installed: {}", name, e);
        }
        return MarkResult {
            outcome: MarkOutcome::MarkedManual,
            apt_error: None,
        };
    }

    let apt_error = match cache.mark_install(name) {
        Ok(()) => None,
        Err(e) => {
            warn!("apt error while marking {}: {}", name, e);
            Some(e)
        }
    };
    debug!("Marked {} for install", name);

    if cache.broken_count() == 0 && apt_error.is_none() {
        return MarkResult {
            outcome: MarkOutcome::Marked,
            apt_error,
        };
    }

    let recovery = recover_broken(cache);
    let outcome = if cache.broken_count() > 0 {
        error!(
            "Unable to install '{}' due to conflicts; still broken: {:?}",
            name, recovery.remaining
        );
        MarkOutcome::Conflict {
            broken: broken_packages(cache),
        }
    } else {
        if !recovery.kept.is_empty() {
            info!("Kept back {:?} to install around {}", recovery.kept, name);
        }
        MarkOutcome::Recovered {
            kept: recovery.kept,
        }
    };

    MarkResult { outcome, apt_error }
}

/// Mark every package of `selection` for install inside one action group.
///
/// Refuses to touch a cache that is already broken. On an unrecoverable
/// conflict every pending mark of the batch is discarded before returning.
pub fn do_install<C: PackageCache + ?Sized>(
    cache: &mut C,
    selection: &SelectionSet,
) -> ResolveOutcome {
    if cache.broken_count() > 0 {
        let broken = broken_packages(cache);
        warn!(
            "not installing additional packages, since there are broken packages: {:?}",
            broken
        );
        return ResolveOutcome::PreexistingBroken { broken };
    }

    let mut summary = ResolveSummary::default();
    {
        let mut group = ActionGroup::new(cache);
        for name in selection {
            let result = mark_install(&mut *group, name);
            if let Some(err) = result.apt_error {
                summary.apt_errors.insert(name.clone(), err.to_string());
            }
            match result.outcome {
                MarkOutcome::Unavailable => {
                    summary.unavailable.insert(name.clone());
                }
                MarkOutcome::MarkedManual => {
                    summary.manual.insert(name.clone());
                }
                MarkOutcome::Marked => {}
                MarkOutcome::Recovered { kept } => summary.kept.extend(kept),
                MarkOutcome::Conflict { broken } => {
                    if let Err(e) = group.clear() {
                        error!("Failed to discard pending marks: {}", e);
                    }
                    return ResolveOutcome::FatalConflict {
                        package: name.clone(),
                        broken,
                    };
                }
            }
        }
    }

    summary.installed = selection
        .iter()
        .filter(|name| cache.state(name) == Some(PackageState::MarkedInstall))
        .cloned()
        .collect();

    info!(
        "{} package(s) marked for install, {} kept back, {} unavailable",
        summary.installed.len(),
        summary.kept.len(),
        summary.unavailable.len()
    );

    if summary.kept.is_empty() {
        ResolveOutcome::Success(summary)
    } else {
        ResolveOutcome::Partial(summary)
    }
}
