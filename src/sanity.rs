//! Pre-flight sanity checks for runtime environment
//!
//! This module verifies the system environment before the install pass:
//! - Running with root privileges (EUID 0)
//! - The target root exists and carries a sources list
//!
//! If any check fails, the program exits with a clear error message
//! before anything in the target is touched.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::InstallerConfig;

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub is_root: bool,
    /// Target root, when it is not a directory
    pub missing_target: Option<PathBuf>,
    /// Sources list, when filtering is on and the file does not exist
    pub missing_sources: Option<PathBuf>,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.is_root && self.missing_target.is_none() && self.missing_sources.is_none()
    }
}

/// Check if running as root (EUID 0)
fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Perform all sanity checks and return the result
pub fn verify_environment(config: &InstallerConfig) -> SanityCheckResult {
    let missing_target = (!config.target.is_dir()).then(|| config.target.clone());

    let sources = config.sources_list_path();
    let missing_sources = (config.filter_sources && !sources.is_file()).then_some(sources);

    SanityCheckResult {
        is_root: is_running_as_root(),
        missing_target,
        missing_sources,
    }
}

/// Print a pretty error message to stderr and exit
pub fn print_error_and_exit(result: &SanityCheckResult) -> ! {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║              install-extras - Pre-flight Check Failed            ║");
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();

    if !result.is_root {
        eprintln!("❌ ERROR: Root privileges required");
        eprintln!("   Packages are installed into the target and bind mounts are made.");
        eprintln!();
        eprintln!("   Solution: Run with sudo or as root user:");
        eprintln!("     sudo install-extras");
        eprintln!();
    }

    if let Some(target) = &result.missing_target {
        eprintln!("❌ ERROR: Target root not found");
        eprintln!("   {} is not a directory.", target.display());
        eprintln!();
        eprintln!("   Solution: Mount the target system or pass --target.");
        eprintln!();
    }

    if let Some(sources) = &result.missing_sources {
        eprintln!("❌ ERROR: Sources list not found");
        eprintln!("   {} does not exist.", sources.display());
        eprintln!();
        eprintln!("   Solution: Set \"filter_sources\": false or fix the target's apt setup.");
        eprintln!();
    }

    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║  Fix the above issues and try again.                             ║");
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();

    std::process::exit(1);
}

/// Skip root check (for development/testing)
/// Set INSTALL_EXTRAS_SKIP_ROOT_CHECK=1 to skip
pub fn should_skip_root_check() -> bool {
    std::env::var("INSTALL_EXTRAS_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Run pre-flight checks with optional root check skip
pub fn run_preflight_checks_with_options(config: &InstallerConfig, skip_root: bool) {
    debug!("Running pre-flight sanity checks (skip_root={})...", skip_root);

    let mut result = verify_environment(config);

    if skip_root || should_skip_root_check() {
        warn!("Root check skipped");
        result.is_root = true;
    }

    if !result.is_ok() {
        print_error_and_exit(&result);
    }

    info!("Pre-flight checks passed for {}", config.target.display());
}
