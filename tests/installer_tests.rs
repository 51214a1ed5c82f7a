//! Tests for the extras install pass
//!
//! These tests verify:
//! - The full pass against an in-memory cache and a scratch target root
//! - Chroot mounts are undone in reverse order, also when the commit fails
//! - Progress is always stopped
//! - The sources list is restored on every path

use std::fs;
use std::path::{Path, PathBuf};

use install_extras::cache::memory::{CommitScript, MemoryCache};
use install_extras::cache::{PackageCache, PackageState};
use install_extras::chroot::{Mounter, POLICY_RC_D};
use install_extras::progress::{BrokenReport, ProgressReporter};
use install_extras::{InstallError, Installer, InstallerConfig, ResolveOutcome};
use tempfile::TempDir;

const SOURCES: &str = "deb cdrom:[Ubuntu 24.04 LTS]/ noble main restricted\n\
                       deb http://archive.ubuntu.com/ubuntu noble main universe\n";

// =============================================================================
// Test Doubles
// =============================================================================

/// Records bind sources and unmount targets.
#[derive(Default)]
struct RecordingMounter {
    ops: Vec<String>,
}

impl Mounter for RecordingMounter {
    fn bind(&mut self, source: &Path, _target: &Path) -> install_extras::Result<()> {
        self.ops.push(format!("bind {}", source.display()));
        Ok(())
    }

    fn unmount(&mut self, target: &Path) -> install_extras::Result<()> {
        self.ops.push(format!("umount {}", target.display()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Vec<String>,
    broken: Option<BrokenReport>,
}

impl ProgressReporter for RecordingProgress {
    fn start(&mut self, title: &str) {
        self.events.push(format!("start {}", title));
    }
    fn set(&mut self, percent: u8) {
        self.events.push(format!("set {}", percent));
    }
    fn info(&mut self, message: &str) {
        self.events.push(format!("info {}", message));
    }
    fn error(&mut self, message: &str) {
        self.events.push(format!("error {}", message));
    }
    fn report_broken(&mut self, report: &BrokenReport) {
        self.events.push("broken".to_string());
        self.broken = Some(report.clone());
    }
    fn stop(&mut self) {
        self.events.push("stop".to_string());
    }
}

struct Fixture {
    _dir: TempDir,
    config: InstallerConfig,
}

impl Fixture {
    fn new(selections: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir_all(target.join("etc/apt")).unwrap();
        fs::write(target.join("etc/apt/sources.list"), SOURCES).unwrap();

        let record = dir.path().join("apt-installed");
        fs::write(&record, selections.join("\n")).unwrap();

        let config = InstallerConfig {
            target,
            record_path: record,
            state_dir: dir.path().join("state"),
            bind_mounts: vec![PathBuf::from("/proc"), PathBuf::from("/dev")],
            block_service_starts: true,
            ..InstallerConfig::default()
        };
        Self { _dir: dir, config }
    }

    fn sources(&self) -> String {
        fs::read_to_string(self.config.sources_list_path()).unwrap()
    }

    fn policy(&self) -> PathBuf {
        self.config.target.join(POLICY_RC_D)
    }
}

// =============================================================================
// End-to-End Pass Tests
// =============================================================================

#[test]
fn test_full_pass_installs_and_cleans_up() {
    let fixture = Fixture::new(&["a", "b", "wine", "ghost"]);
    let installer = Installer::new(fixture.config.clone());
    let mut mounter = RecordingMounter::default();
    let mut progress = RecordingProgress::default();

    let report = installer
        .install_extras(
            |_| {
                Ok(MemoryCache::builder()
                    .package("a")
                    .package("b")
                    .package("c")
                    .package("wine")
                    .relations("wine", &["libwine"], &["wine32:i386"])
                    .conflict("b", &["b", "c"])
                    .build())
            },
            &mut mounter,
            &mut progress,
        )
        .unwrap();

    assert!(report.sources_filtered);
    assert!(report.deferred.contains("wine"));
    match &report.resolve {
        ResolveOutcome::Partial(summary) => {
            assert!(summary.installed.contains("a"));
            assert!(summary.kept.contains("b"));
            assert!(summary.unavailable.contains("ghost"));
        }
        other => panic!("expected partial outcome, got {:?}", other),
    }
    assert!(report.commit.as_ref().unwrap().is_clean());

    assert_eq!(
        mounter.ops,
        vec![
            "bind /proc".to_string(),
            "bind /dev".to_string(),
            format!("umount {}", fixture.config.target.join("dev").display()),
            format!("umount {}", fixture.config.target.join("proc").display()),
        ]
    );
    assert_eq!(
        progress.events.first().map(String::as_str),
        Some("start Installing extra packages")
    );
    assert_eq!(progress.events.last().map(String::as_str), Some("stop"));
    assert!(progress.events.contains(&"info Setting up a (1.0)".to_string()));

    assert!(!fixture.policy().exists());
    assert_eq!(fixture.sources(), SOURCES);
}

#[test]
fn test_solver_error_reports_broken_packages() {
    let fixture = Fixture::new(&["a"]);
    let installer = Installer::new(fixture.config.clone());
    let mut mounter = RecordingMounter::default();
    let mut progress = RecordingProgress::default();

    let report = installer
        .install_extras(
            |_| {
                Ok(MemoryCache::builder()
                    .package("a")
                    .installed("libfoo")
                    .commit_script(CommitScript::SolverFailure {
                        message: "E: Sub-process /usr/bin/dpkg returned an error code (1)".into(),
                        broken: ["libfoo".to_string()].into(),
                    })
                    .build())
            },
            &mut mounter,
            &mut progress,
        )
        .unwrap();

    let commit = report.commit.unwrap();
    assert!(!commit.is_clean());
    assert!(commit.broken.contains("libfoo"));

    let broken = progress.broken.unwrap();
    assert_eq!(broken.commit_error, commit.commit_error);
    assert!(broken.broken.contains("libfoo"));
    assert_eq!(progress.events.last().map(String::as_str), Some("stop"));
    assert_eq!(mounter.ops.iter().filter(|op| op.starts_with("umount")).count(), 2);
    assert_eq!(fixture.sources(), SOURCES);
}

#[test]
fn test_fetch_failure_aborts_without_broken_report() {
    let fixture = Fixture::new(&["a"]);
    let installer = Installer::new(fixture.config.clone());
    let mut mounter = RecordingMounter::default();
    let mut progress = RecordingProgress::default();

    let report = installer
        .install_extras(
            |_| {
                Ok(MemoryCache::builder()
                    .package("a")
                    .commit_script(CommitScript::FetchFailure {
                        message: "Could not open file /media/cdrom/pool/a.deb".into(),
                    })
                    .build())
            },
            &mut mounter,
            &mut progress,
        )
        .unwrap();

    let commit = report.commit.unwrap();
    assert!(commit.aborted.is_some());
    assert!(progress.broken.is_none());
    assert!(progress.events.iter().any(|e| e.starts_with("error ")));
    assert_eq!(progress.events.last().map(String::as_str), Some("stop"));
    assert!(!fixture.policy().exists());
}

#[test]
fn test_preexisting_breakage_is_fatal() {
    let fixture = Fixture::new(&["a"]);
    let installer = Installer::new(fixture.config.clone());
    let mut mounter = RecordingMounter::default();
    let mut progress = RecordingProgress::default();

    let err = installer
        .install_extras(
            |_| {
                Ok(MemoryCache::builder()
                    .package("a")
                    .installed("b")
                    .broken("b")
                    .build())
            },
            &mut mounter,
            &mut progress,
        )
        .unwrap_err();

    assert!(matches!(err, InstallError::BrokenCache(_)));
    assert!(mounter.ops.is_empty());
    assert!(progress.events.is_empty());
    assert_eq!(fixture.sources(), SOURCES);
}

#[test]
fn test_existing_policy_file_survives_pass() {
    let fixture = Fixture::new(&["a"]);
    fs::create_dir_all(fixture.policy().parent().unwrap()).unwrap();
    fs::write(fixture.policy(), "#!/bin/sh\nexit 0\n").unwrap();
    let installer = Installer::new(fixture.config.clone());

    installer
        .install_extras(
            |_| Ok(MemoryCache::builder().package("a").build()),
            &mut RecordingMounter::default(),
            &mut RecordingProgress::default(),
        )
        .unwrap();

    assert_eq!(fs::read_to_string(fixture.policy()).unwrap(), "#!/bin/sh\nexit 0\n");
}

#[test]
fn test_installed_packages_only_marked_manual() {
    let fixture = Fixture::new(&["vim"]);
    let installer = Installer::new(fixture.config.clone());
    let mut opened = None;

    let report = installer
        .install_extras(
            |_| {
                let cache = MemoryCache::builder().installed("vim").build();
                opened = Some(cache.state("vim"));
                Ok(cache)
            },
            &mut RecordingMounter::default(),
            &mut RecordingProgress::default(),
        )
        .unwrap();

    assert_eq!(opened, Some(Some(PackageState::Installed)));
    match report.resolve {
        ResolveOutcome::Success(summary) => {
            assert!(summary.manual.contains("vim"));
            assert!(summary.installed.is_empty());
        }
        other => panic!("expected success, got {:?}", other),
    }
    // the auto flag change still has to be written
    assert!(report.commit.is_some());
}
