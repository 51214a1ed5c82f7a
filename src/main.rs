//! install-extras - Main entry point
//!
//! Installs the packages other installer components recorded into the target
//! root, recovering from dependency conflicts by keeping packages back.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, error, info, warn};

use install_extras::cache::{PackageCache, PackageState};
use install_extras::cache::memory::MemoryCache;
use install_extras::chroot::{NoopMounter, SystemMounter};
use install_extras::cli::{Cli, Commands};
use install_extras::config::InstallerConfig;
use install_extras::filter::filter_multiarch;
use install_extras::installer::{InstallReport, Installer};
use install_extras::progress::LogProgress;
use install_extras::resolver::{ResolveOutcome, do_install};
use install_extras::sanity;
use install_extras::selections::query_recorded_installed;

/// Initialize the logger with appropriate settings
fn init_logger(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    // RUST_LOG overrides the level chosen on the command line
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Main application entry point
fn main() {
    // SAFETY: nothing else is running yet; no other thread reads the
    // environment concurrently.
    unsafe { std::env::set_var("DPKG_UNTRANSLATED_MESSAGES", "1") };

    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    debug!("CLI arguments parsed");

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Some(Commands::Validate { file }) = &cli.command {
        return validate_config_file(file);
    }

    let config = load_config(&cli)?;

    match cli.command {
        Some(Commands::Selections { json }) => print_selections(&config, json),
        Some(Commands::Simulate { snapshot }) => simulate(&config, &snapshot),
        Some(Commands::Install) | None => run_install(config),
        Some(Commands::Validate { .. }) => Ok(()),
    }
}

/// Config file (or defaults) with command-line overrides applied
fn load_config(cli: &Cli) -> Result<InstallerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            InstallerConfig::load_from_file(path)?
        }
        None => InstallerConfig::default(),
    };

    if let Some(target) = &cli.target {
        config.target = target.clone();
    }
    if cli.dry_run {
        config.dry_run = true;
    }

    config.validate()?;
    Ok(config)
}

fn validate_config_file(path: &Path) -> Result<()> {
    info!("Validating configuration file: {:?}", path);
    let config = InstallerConfig::load_from_file(path)?;
    config
        .validate()
        .context("Configuration validation failed")?;

    info!("Configuration validation successful");
    println!("✓ Configuration file is valid: {:?}", path);
    Ok(())
}

fn print_selections(config: &InstallerConfig, as_json: bool) -> Result<()> {
    let selections = query_recorded_installed(&config.record_path)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&selections)?);
    } else {
        for name in &selections {
            println!("{}", name);
        }
    }
    Ok(())
}

/// Filter and resolve the recorded selections against a cache snapshot.
/// Nothing is committed and the target is not touched.
fn simulate(config: &InstallerConfig, snapshot: &Path) -> Result<()> {
    let mut cache = MemoryCache::load_snapshot(snapshot)?;
    let recorded = query_recorded_installed(&config.record_path)?;

    let filtered = filter_multiarch(recorded, &cache);
    let outcome = do_install(&mut cache, &filtered.selection);
    let pending: Vec<_> = cache
        .package_names()
        .into_iter()
        .filter(|name| cache.state(name) == Some(PackageState::MarkedInstall))
        .collect();

    let output = json!({
        "deferred": filtered.deferred,
        "resolve": outcome,
        "marked_install": pending,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_install(config: InstallerConfig) -> Result<()> {
    sanity::run_preflight_checks_with_options(&config, config.dry_run);

    if let Err(e) = fs::create_dir_all(&config.state_dir) {
        if !config.dry_run {
            return Err(e).with_context(|| {
                format!("Failed to create state directory {:?}", config.state_dir)
            });
        }
        warn!("Could not create state directory {:?}: {}", config.state_dir, e);
    }

    let installer = Installer::new(config);
    let mut progress = LogProgress::default();

    let report = if installer.config().dry_run {
        installer.install_extras(open_target_cache, &mut NoopMounter, &mut progress)?
    } else {
        installer.install_extras(open_target_cache, &mut SystemMounter, &mut progress)?
    };

    print_report(&report);
    Ok(())
}

#[cfg(feature = "apt")]
fn open_target_cache(
    config: &InstallerConfig,
) -> install_extras::Result<install_extras::cache::apt::AptCache> {
    install_extras::cache::apt::AptCache::open(&config.target)
}

#[cfg(not(feature = "apt"))]
fn open_target_cache(config: &InstallerConfig) -> install_extras::Result<MemoryCache> {
    Err(install_extras::InstallError::general(format!(
        "cannot open the package cache in {}: built without the `apt` feature \
         (rebuild with --features apt)",
        config.target.display()
    )))
}

fn print_report(report: &InstallReport) {
    if !report.deferred.is_empty() {
        println!(
            "• Deferred to the multiarch pass: {}",
            join(report.deferred.iter())
        );
    }

    match &report.resolve {
        ResolveOutcome::Success(summary) | ResolveOutcome::Partial(summary) => {
            if !summary.unavailable.is_empty() {
                println!("• Not available: {}", join(summary.unavailable.iter()));
            }
            if !summary.kept.is_empty() {
                println!("• Kept back due to conflicts: {}", join(summary.kept.iter()));
            }
            for (name, err) in &summary.apt_errors {
                println!("• apt error while marking {}: {}", name, err);
            }
        }
        // fatal outcomes are returned as errors before a report exists
        ResolveOutcome::FatalConflict { .. } | ResolveOutcome::PreexistingBroken { .. } => {}
    }

    match &report.commit {
        Some(commit) if commit.is_clean() => println!("✓ Extra packages installed"),
        Some(commit) => {
            if let Some(msg) = &commit.aborted {
                eprintln!("✗ Package download failed, nothing installed: {}", msg);
            }
            if let Some(msg) = &commit.commit_error {
                eprintln!("✗ Package installation reported an error: {}", msg);
            }
            if !commit.broken.is_empty() {
                eprintln!("✗ Broken packages: {}", join(commit.broken.iter()));
            }
        }
        None => println!("✓ Nothing committed"),
    }
}

fn join<'a>(names: impl Iterator<Item = &'a String>) -> String {
    names.map(String::as_str).collect::<Vec<_>>().join(", ")
}
