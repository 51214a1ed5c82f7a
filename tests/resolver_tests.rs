//! Tests for the broken-package resolver
//!
//! These tests verify:
//! - Batches that install cleanly, partially, or not at all
//! - Refusal to touch an already broken cache
//! - Multi-pass recovery until the broken set is empty

use std::collections::BTreeSet;

use install_extras::cache::memory::{MemoryCache, Mutation};
use install_extras::cache::{PackageCache, PackageState};
use install_extras::resolver::{
    MAX_RECOVERY_PASSES, ResolveOutcome, ResolveSummary, do_install, recover_broken,
};
use install_extras::{InstallError, SelectionSet};

fn set(names: &[&str]) -> SelectionSet {
    names.iter().map(|n| n.to_string()).collect()
}

fn summary(outcome: ResolveOutcome) -> ResolveSummary {
    match outcome {
        ResolveOutcome::Success(summary) | ResolveOutcome::Partial(summary) => summary,
        other => panic!("expected a successful outcome, got {:?}", other),
    }
}

// =============================================================================
// Batch Outcome Tests
// =============================================================================

#[test]
fn test_clean_batch_is_success() {
    let mut cache = MemoryCache::builder()
        .package("a")
        .package("b")
        .installed("c")
        .build();

    let outcome = do_install(&mut cache, &set(&["a", "b", "c"]));
    assert!(matches!(outcome, ResolveOutcome::Success(_)));

    let summary = summary(outcome);
    assert_eq!(summary.installed, set(&["a", "b"]));
    assert_eq!(summary.manual, set(&["c"]));
    assert!(summary.kept.is_empty());
    assert!(summary.has_changes());
}

#[test]
fn test_conflicting_package_kept_back() {
    // b breaks {b, c}; keeping b clears everything
    let mut cache = MemoryCache::builder()
        .package("a")
        .package("b")
        .package("c")
        .conflict("b", &["b", "c"])
        .build();

    let outcome = do_install(&mut cache, &set(&["a", "b"]));
    assert!(matches!(outcome, ResolveOutcome::Partial(_)));

    let summary = summary(outcome);
    assert_eq!(summary.installed, set(&["a"]));
    assert!(summary.kept.contains("b"));
    assert_eq!(cache.broken_count(), 0);
    assert_eq!(cache.state("a"), Some(PackageState::MarkedInstall));
    assert_eq!(cache.state("b"), Some(PackageState::MarkedKeep));
}

#[test]
fn test_self_conflict_is_fatal_and_clears_marks() {
    let mut cache = MemoryCache::builder()
        .package("x")
        .sticky_conflict("x", &["x"])
        .build();

    let outcome = do_install(&mut cache, &set(&["x"]));
    assert_eq!(
        outcome,
        ResolveOutcome::FatalConflict {
            package: "x".into(),
            broken: set(&["x"]),
        }
    );
    assert_eq!(cache.state("x"), Some(PackageState::NotInstalled));
    assert_eq!(cache.broken_count(), 0);

    let err = outcome.into_result().unwrap_err();
    assert!(matches!(err, InstallError::InstallStep(_)));
    assert_eq!(err.to_string(), "Unable to install 'x' due to conflicts.");
}

#[test]
fn test_fatal_conflict_stops_batch() {
    // "a" sorts before "x" and is marked; "z" after it is never looked at
    let mut cache = MemoryCache::builder()
        .package("a")
        .package("x")
        .package("z")
        .sticky_conflict("x", &["x"])
        .build();

    let outcome = do_install(&mut cache, &set(&["a", "x", "z"]));
    assert!(matches!(outcome, ResolveOutcome::FatalConflict { .. }));
    assert!(!cache.mutations().contains(&Mutation::Install("z".into())));
    assert_eq!(cache.state("a"), Some(PackageState::NotInstalled));
}

#[test]
fn test_preexisting_breakage_refuses_batch() {
    let mut cache = MemoryCache::builder()
        .package("a")
        .installed("libold")
        .broken("libold")
        .build();

    let outcome = do_install(&mut cache, &set(&["a"]));
    assert_eq!(
        outcome,
        ResolveOutcome::PreexistingBroken {
            broken: set(&["libold"])
        }
    );
    assert!(cache.mutations().is_empty());

    let err = outcome.into_result().unwrap_err();
    assert_eq!(
        err.to_string(),
        "not installing additional packages, since there are broken packages: libold"
    );
}

#[test]
fn test_only_unavailable_selections() {
    let mut cache = MemoryCache::builder().package("a").build();

    let summary = summary(do_install(&mut cache, &set(&["ghost"])));
    assert_eq!(summary.unavailable, set(&["ghost"]));
    assert!(!summary.has_changes());
    assert!(cache.mutations().is_empty());
    assert_eq!(cache.broken_count(), 0);
}

#[test]
fn test_empty_selection() {
    let mut cache = MemoryCache::builder().package("a").build();
    let summary = summary(do_install(&mut cache, &SelectionSet::new()));
    assert_eq!(summary, ResolveSummary::default());
    assert_eq!(cache.action_depth(), 0);
}

#[test]
fn test_apt_error_recorded_per_package() {
    let mut cache = MemoryCache::builder()
        .package("a")
        .failing_mark("a", "E: Unable to correct problems")
        .build();

    let summary = summary(do_install(&mut cache, &set(&["a"])));
    assert_eq!(
        summary.apt_errors.get("a").map(String::as_str),
        Some("solver error: E: Unable to correct problems")
    );
}

// =============================================================================
// Recovery Loop Tests
// =============================================================================

#[test]
fn test_recovery_runs_multiple_passes() {
    // keeping z breaks c, which was marked earlier in the batch
    let mut cache = MemoryCache::builder()
        .package("c")
        .package("z")
        .conflict("z", &["z"])
        .keep_conflict("z", &["c"])
        .build();
    cache.mark_install("c").unwrap();
    cache.mark_install("z").unwrap();

    let recovery = recover_broken(&mut cache);
    assert_eq!(recovery.passes, 2);
    assert_eq!(recovery.kept, set(&["c", "z"]));
    assert!(recovery.remaining.is_empty());
    assert_eq!(cache.broken_count(), 0);
}

#[test]
fn test_multi_pass_batch_is_partial() {
    let mut cache = MemoryCache::builder()
        .package("c")
        .package("z")
        .conflict("z", &["z"])
        .keep_conflict("z", &["c"])
        .build();

    let summary = summary(do_install(&mut cache, &set(&["c", "z"])));
    assert_eq!(summary.kept, set(&["c", "z"]));
    assert!(summary.installed.is_empty());
}

#[test]
fn test_recovery_on_clean_cache_does_nothing() {
    let mut cache = MemoryCache::builder().package("a").build();
    let recovery = recover_broken(&mut cache);
    assert_eq!(recovery.passes, 0);
    assert!(recovery.kept.is_empty());
    assert!(cache.mutations().is_empty());
}

#[test]
fn test_recovery_stops_at_fixed_point() {
    let mut cache = MemoryCache::builder()
        .package("p")
        .package("q")
        .sticky_conflict("p", &["p", "q"])
        .build();
    cache.mark_install("p").unwrap();

    let recovery = recover_broken(&mut cache);
    assert!(recovery.passes <= MAX_RECOVERY_PASSES);
    assert_eq!(recovery.passes, 1);
    assert_eq!(recovery.remaining, BTreeSet::from(["p".to_string(), "q".to_string()]));
}
