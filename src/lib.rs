//! install-extras library
//!
//! Installs the packages recorded by other installer components into the
//! target system and recovers from dependency conflicts by keeping packages
//! back instead of failing the whole installation.

pub mod cache;
pub mod chroot;
pub mod cli;
pub mod commit;
pub mod config;
pub mod error;
pub mod filter;
pub mod installer;
pub mod progress;
pub mod resolver;
pub mod sanity;
pub mod selections;
pub mod sources;

// Re-export main types for convenience
pub use cache::memory::{CacheSnapshot, MemoryCache};
pub use cache::{CacheError, CommitError, Package, PackageCache, PackageState, broken_packages};
#[cfg(feature = "apt")]
pub use cache::apt::AptCache;
pub use chroot::{ChrootGuard, ChrootOptions, Mounter, NoopMounter, SystemMounter};
pub use commit::{CommitReport, commit_transaction};
pub use config::InstallerConfig;
pub use error::{InstallError, Result};
pub use installer::{InstallReport, Installer};
pub use progress::{BrokenReport, LogProgress, ProgressReporter};
pub use resolver::{ResolveOutcome, ResolveSummary, do_install};
pub use selections::{SelectionSet, query_recorded_installed};
pub use sources::SourcesListGuard;
