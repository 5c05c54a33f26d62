//! Core data types used throughout the regsync library
//!
//! This module contains the data structures shared by the reconciler, the
//! change-set writer and the check-in orchestrator.
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Reconciled state**: `Change`, `ChangeKind` - what a node contributes to a change-set
//! - **Results**: `ChangeStats`, `CheckInReport` - counters and the outcome of one check-in
//! - **Configuration**: `SyncConfig` - the policy knobs of a sync session
//! - **Progress**: `ChangeNotice`, `SyncCallback` - per-change notifications
//!
//! ## Examples
//!
//! ```rust
//! use regsync::types::SyncConfig;
//!
//! let config = SyncConfig {
//!     username: "admin".to_string(),
//!     ignore_patterns: vec!["*.bak".to_string()],
//!     ..Default::default()
//! };
//! assert!(config.silent_update);
//! ```

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Kind of change a node contributes to the change-set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Newly tracked resource or collection
    Added,
    /// Content or metadata changed since the last synchronization
    Updated,
    /// Removed locally, to be removed remotely
    Deleted,
}

impl ChangeKind {
    /// Value written to the `status` attribute
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciled synchronization state of one node
///
/// Each variant carries only what its state needs. Digests are absent for
/// collections, which have no content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Nothing to send
    Unchanged,
    /// Brand-new node; default attributes are regenerated from these values
    Added {
        /// Acting user recorded as creator and last updater
        author: String,
        /// Creation and modification time
        timestamp: DateTime<Utc>,
        /// Fingerprint of the content
        digest: Option<String>,
    },
    /// Changed node
    Updated {
        /// Fresh fingerprint replacing the recorded one
        digest: Option<String>,
    },
    /// Node to remove
    Deleted,
}

impl Change {
    /// Kind of change, or `None` when the node is not emitted
    pub fn kind(&self) -> Option<ChangeKind> {
        match self {
            Change::Unchanged => None,
            Change::Added { .. } => Some(ChangeKind::Added),
            Change::Updated { .. } => Some(ChangeKind::Updated),
            Change::Deleted => Some(ChangeKind::Deleted),
        }
    }

    /// Whether the node is written to the change-set
    pub fn is_emitted(&self) -> bool {
        !matches!(self, Change::Unchanged)
    }

    /// New digest to record once the change is captured
    pub fn digest(&self) -> Option<&str> {
        match self {
            Change::Added { digest, .. } | Change::Updated { digest } => digest.as_deref(),
            Change::Unchanged | Change::Deleted => None,
        }
    }
}

/// Counters for the changes captured by one reconciliation
///
/// # Examples
///
/// ```rust
/// # use regsync::types::ChangeStats;
/// let stats = ChangeStats {
///     resources_added: 2,
///     resources_updated: 1,
///     resources_deleted: 1,
///     ..Default::default()
/// };
///
/// assert_eq!(stats.sent_count(), 4);
/// assert!(stats.has_changes());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStats {
    /// Nodes sent as added
    pub resources_added: usize,
    /// Nodes sent as updated
    pub resources_updated: usize,
    /// Nodes sent as deleted
    pub resources_deleted: usize,
    /// Content bytes embedded in the change-set
    pub bytes_sent: u64,
    /// Repository paths of every node sent, in discovery order
    pub changed_paths: Vec<String>,
}

impl ChangeStats {
    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.sent_count() > 0
    }

    /// Number of nodes written to the change-set
    pub fn sent_count(&self) -> usize {
        self.resources_added + self.resources_updated + self.resources_deleted
    }

    /// Count one emitted node
    pub fn record(&mut self, kind: ChangeKind, path: &str, bytes: u64) {
        match kind {
            ChangeKind::Added => self.resources_added += 1,
            ChangeKind::Updated => self.resources_updated += 1,
            ChangeKind::Deleted => self.resources_deleted += 1,
        }
        self.bytes_sent += bytes;
        self.changed_paths.push(path.to_string());
    }

    /// Fold another set of counters into this one
    pub fn merge(&mut self, other: ChangeStats) {
        self.resources_added += other.resources_added;
        self.resources_updated += other.resources_updated;
        self.resources_deleted += other.resources_deleted;
        self.bytes_sent += other.bytes_sent;
        self.changed_paths.extend(other.changed_paths);
    }
}

/// Result of a check-in
///
/// Contains the counters of the staged change-set, whether it reached the
/// repository, and any warnings collected on the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInReport {
    /// Repository path the change-set was restored under
    pub checkin_path: String,
    /// What was captured
    pub stats: ChangeStats,
    /// Whether the repository import was invoked
    pub transmitted: bool,
    /// Time taken in milliseconds
    pub duration_ms: u64,
    /// Best-effort failures (skipped fingerprints, local cleanup)
    pub warnings: Vec<String>,
}

impl CheckInReport {
    /// Whether anything was sent to the repository
    pub fn changed(&self) -> bool {
        self.transmitted
    }

    /// Number of nodes in the change-set
    pub fn sent_count(&self) -> usize {
        self.stats.sent_count()
    }
}

/// Notification for one node written to the change-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    /// Local path of the node that was sent
    pub local_path: PathBuf,
    /// Repository path it maps to
    pub repository_path: String,
    /// Kind of change
    pub kind: ChangeKind,
}

/// Change notification callback
pub type SyncCallback = Arc<dyn Fn(ChangeNotice) + Send + Sync>;

/// Configuration for a sync session
///
/// Policy knobs travel with the session instead of being read from process
/// state. Loaded from JSON by the CLI and set through `CheckInBuilder` by
/// library callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Acting user recorded on added nodes and reported on failures
    pub username: String,
    /// When false, emitted resources ask the repository to enforce its own
    /// conflict check
    pub silent_update: bool,
    /// Check in even when conflict markers are present
    pub ignore_conflicts: bool,
    /// Ask a local repository to release its embedded copy after import
    pub clean_registry: bool,
    /// Skip the import when nothing changed
    pub skip_if_unchanged: bool,
    /// Glob patterns for live directory names that are never walked
    pub ignore_patterns: Vec<String>,
    /// Fingerprint the resources of one directory in parallel
    pub parallel_fingerprints: bool,
    /// Where the change-set is staged; the system temp dir when unset
    pub staging_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            silent_update: true,
            ignore_conflicts: false,
            clean_registry: false,
            skip_if_unchanged: true,
            ignore_patterns: Vec::new(),
            parallel_fingerprints: true,
            staging_dir: None,
        }
    }
}

impl SyncConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values a session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(SyncError::InvalidConfiguration(
                "username must not be empty".to_string(),
            ));
        }
        if let Some(dir) = &self.staging_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(SyncError::InvalidConfiguration(format!(
                    "staging_dir {:?} is not a directory",
                    dir
                )));
            }
        }
        Ok(())
    }
}

fn default_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "admin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_change_kind_strings() {
        assert_eq!(ChangeKind::Added.as_str(), "added");
        assert_eq!(ChangeKind::Deleted.to_string(), "deleted");
    }

    #[test]
    fn test_change_carries_only_its_fields() {
        let change = Change::Updated {
            digest: Some("abc".to_string()),
        };
        assert_eq!(change.kind(), Some(ChangeKind::Updated));
        assert_eq!(change.digest(), Some("abc"));
        assert!(Change::Deleted.digest().is_none());
        assert!(!Change::Unchanged.is_emitted());
    }

    #[test]
    fn test_stats_merge() {
        let mut left = ChangeStats::default();
        left.record(ChangeKind::Added, "/a", 10);
        let mut right = ChangeStats::default();
        right.record(ChangeKind::Deleted, "/b", 0);
        left.merge(right);

        assert_eq!(left.sent_count(), 2);
        assert_eq!(left.bytes_sent, 10);
        assert_eq!(left.changed_paths, vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn test_config_from_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("regsync.json");
        std::fs::write(&path, r#"{"username": "alice", "ignore_conflicts": true}"#).unwrap();

        let config = SyncConfig::from_file(&path).unwrap();
        assert_eq!(config.username, "alice");
        assert!(config.ignore_conflicts);
        assert!(config.skip_if_unchanged);
        assert!(config.silent_update);
    }

    #[test]
    fn test_config_rejects_empty_username() {
        let config = SyncConfig {
            username: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SyncError::InvalidConfiguration(_))
        ));
    }
}
