//! Error handling module for install-extras
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every fatal condition of an install pass ends up as one of these variants so
//! the caller can halt the install flow at a coarse granularity.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::cache::CacheError;

/// Main error type for install-extras
#[derive(Error, Debug)]
pub enum InstallError {
    /// IO errors (record file, sources list, policy file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An install step failed and the batch was abandoned
    #[error("{0}")]
    InstallStep(String),

    /// The package database was already broken before any mark was made
    #[error(
        "not installing additional packages, since there are broken packages: {}",
        join(.0)
    )]
    BrokenCache(BTreeSet<String>),

    /// Package cache adapter errors
    #[error("Package cache error: {0}")]
    Cache(#[from] CacheError),

    /// Bind mount setup/teardown errors
    #[error("Mount error: {0}")]
    Mount(String),

    /// Sources list toggle errors
    #[error("Sources list error: {0}")]
    SourcesList(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for install-extras operations
pub type Result<T> = std::result::Result<T, InstallError>;

fn join(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

// Convenient error constructors
impl InstallError {
    /// The step error raised when a package's conflicts could not be resolved
    pub fn conflict(package: &str) -> Self {
        Self::InstallStep(format!("Unable to install '{}' due to conflicts.", package))
    }

    /// Create a mount error
    pub fn mount(msg: impl Into<String>) -> Self {
        Self::Mount(msg.into())
    }

    /// Create a sources list error
    pub fn sources_list(msg: impl Into<String>) -> Self {
        Self::SourcesList(msg.into())
    }

    /// Create a general error
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }
}
