//! Conflict marker detection
//!
//! A failed or partial update leaves `<name>.mine` (the local copy) and
//! `<name>.server` (the remote copy) next to the merged file. While any such
//! marker exists the directory holds an unresolved three-way merge and must
//! not be checked in.
//!
//! Scanning reports conflicts as a value; only listing failures are errors.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix of the local copy left by a conflicting update
pub const MINE_SUFFIX: &str = ".mine";
/// Suffix of the remote copy left by a conflicting update
pub const SERVER_SUFFIX: &str = ".server";

/// Outcome of scanning one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictScan {
    /// No markers
    Clean,
    /// Markers found
    Conflicted {
        /// Directory that was scanned
        directory: PathBuf,
        /// Marker names, sorted
        markers: Vec<String>,
    },
}

impl ConflictScan {
    /// Whether markers were found
    pub fn is_conflicted(&self) -> bool {
        matches!(self, ConflictScan::Conflicted { .. })
    }
}

/// Whether a file name is a conflict marker
pub fn is_conflict_marker(name: &str) -> bool {
    name.ends_with(MINE_SUFFIX) || name.ends_with(SERVER_SUFFIX)
}

/// Scan the live children of a directory for conflict markers
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be listed.
pub fn scan(directory: &Path) -> Result<ConflictScan> {
    let mut markers = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_conflict_marker(&name) {
            markers.push(name);
        }
    }

    if markers.is_empty() {
        return Ok(ConflictScan::Clean);
    }
    markers.sort();
    debug!("Conflict markers in {:?}: {:?}", directory, markers);
    Ok(ConflictScan::Conflicted {
        directory: directory.to_path_buf(),
        markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_names() {
        assert!(is_conflict_marker("c.txt.mine"));
        assert!(is_conflict_marker("c.txt.server"));
        assert!(!is_conflict_marker("mine.txt"));
        assert!(!is_conflict_marker("c.txt"));
    }

    #[test]
    fn test_clean_directory() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("c.txt"), b"x").unwrap();
        assert_eq!(scan(temp_dir.path()).unwrap(), ConflictScan::Clean);
    }

    #[test]
    fn test_markers_are_reported_sorted() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("c.txt"), b"x").unwrap();
        fs::write(temp_dir.path().join("c.txt.server"), b"x").unwrap();
        fs::write(temp_dir.path().join("c.txt.mine"), b"x").unwrap();

        match scan(temp_dir.path()).unwrap() {
            ConflictScan::Conflicted { directory, markers } => {
                assert_eq!(directory, temp_dir.path());
                assert_eq!(markers, vec!["c.txt.mine", "c.txt.server"]);
            }
            ConflictScan::Clean => panic!("expected conflicts"),
        }
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(scan(&temp_dir.path().join("absent")).is_err());
    }
}
