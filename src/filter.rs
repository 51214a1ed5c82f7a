//! Multiarch selection filter
//!
//! This pass runs before a foreign architecture is enabled in the target, so
//! anything whose candidate depends on or recommends an architecture-qualified
//! package cannot be satisfied yet. Such packages are deferred to the later
//! multiarch-aware pass instead of being fed to the resolver.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::cache::{Candidate, PackageCache, PackageName};
use crate::selections::SelectionSet;

/// Selection split into what this pass installs and what it defers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOutcome {
    pub selection: SelectionSet,
    pub deferred: BTreeSet<PackageName>,
}

/// True when any depends/recommends alternative names a qualified target.
pub fn has_foreign_arch_relation(candidate: &Candidate) -> bool {
    candidate.relations().any(|relation| relation.is_arch_qualified())
}

/// Remove packages whose candidate references an architecture-qualified
/// dependency. Packages unknown to the cache, or without a candidate, are
/// left in the selection.
pub fn filter_multiarch<C: PackageCache + ?Sized>(
    selection: SelectionSet,
    cache: &C,
) -> FilterOutcome {
    let (deferred, selection): (BTreeSet<_>, BTreeSet<_>) =
        selection.into_iter().partition(|name| {
            cache
                .package(name)
                .and_then(|pkg| pkg.candidate)
                .is_some_and(|candidate| has_foreign_arch_relation(&candidate))
        });

    for name in &deferred {
        debug!("Deferring {} to the multiarch pass", name);
    }

    FilterOutcome {
        selection,
        deferred,
    }
}
