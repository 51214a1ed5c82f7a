//! Progress reporting collaborator
//!
//! The installer front end (debconf) only ever sees coarse milestones and a
//! final summary of whatever is left broken. This module defines that
//! contract and a `tracing`-backed implementation.

use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::PackageName;

/// Post-commit summary shown to the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokenReport {
    pub broken: BTreeSet<PackageName>,
    pub commit_error: Option<String>,
}

impl BrokenReport {
    pub fn is_empty(&self) -> bool {
        self.broken.is_empty() && self.commit_error.is_none()
    }
}

/// Receiver of coarse progress milestones.
pub trait ProgressReporter {
    fn start(&mut self, title: &str);

    /// Overall completion in percent (0-100).
    fn set(&mut self, percent: u8);

    fn info(&mut self, message: &str);

    fn error(&mut self, message: &str);

    fn report_broken(&mut self, report: &BrokenReport);

    fn stop(&mut self);
}

/// Progress reporter that writes every milestone to the log.
#[derive(Debug, Default)]
pub struct LogProgress {
    title: Option<String>,
    percent: u8,
}

impl LogProgress {
    pub fn percent(&self) -> u8 {
        self.percent
    }
}

impl ProgressReporter for LogProgress {
    fn start(&mut self, title: &str) {
        info!("{}", title);
        self.title = Some(title.to_string());
        self.percent = 0;
    }

    fn set(&mut self, percent: u8) {
        self.percent = percent.min(100);
        info!(
            "{}: {}%",
            self.title.as_deref().unwrap_or("progress"),
            self.percent
        );
    }

    fn info(&mut self, message: &str) {
        info!("{}", message);
    }

    fn error(&mut self, message: &str) {
        error!("{}", message);
    }

    fn report_broken(&mut self, report: &BrokenReport) {
        if let Some(err) = &report.commit_error {
            error!("Package installation reported an error: {}", err);
        }
        if !report.broken.is_empty() {
            let names: Vec<&str> = report.broken.iter().map(String::as_str).collect();
            warn!("Broken packages after installation: {}", names.join(", "));
        }
    }

    fn stop(&mut self) {
        if let Some(title) = self.title.take() {
            info!("{}: done", title);
        }
    }
}

/// Started progress that is always stopped, whichever way the scope exits.
pub struct ProgressScope<'a> {
    inner: &'a mut dyn ProgressReporter,
}

impl<'a> ProgressScope<'a> {
    pub fn start(inner: &'a mut dyn ProgressReporter, title: &str) -> Self {
        inner.start(title);
        Self { inner }
    }
}

impl<'a> Deref for ProgressScope<'a> {
    type Target = dyn ProgressReporter + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl<'a> DerefMut for ProgressScope<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.inner
    }
}

impl Drop for ProgressScope<'_> {
    fn drop(&mut self) {
        self.inner.stop();
    }
}
