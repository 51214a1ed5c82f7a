//! Recorded package selections
//!
//! Other installer components append the packages they want in the installed
//! system to a plain text record, one name per line. This module reads it back.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

use crate::cache::PackageName;
use crate::error::Result;

/// Packages the operator wants installed. Sorted, so every pass over a
/// selection visits packages in the same order.
pub type SelectionSet = BTreeSet<PackageName>;

/// Default location of the selections record.
pub const RECORDED_SELECTIONS_PATH: &str = "/var/lib/ubiquity/apt-installed";

/// Read the selections record at `path`.
///
/// A missing record means nothing was selected and yields an empty set.
pub fn query_recorded_installed<P: AsRef<Path>>(path: P) -> Result<SelectionSet> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(content) => {
            let selections = parse_selections(&content);
            debug!(
                "Read {} recorded selection(s) from {}",
                selections.len(),
                path.display()
            );
            Ok(selections)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No selections record at {}", path.display());
            Ok(SelectionSet::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// One package name per line; whitespace is trimmed and blank lines skipped.
pub fn parse_selections(content: &str) -> SelectionSet {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
