//! Error types for the regsync library
//!
//! This module defines every error a check-in can stop with. The taxonomy keeps
//! user-actionable outcomes (unresolved conflicts, a stale checkout, a
//! cancelled walk) apart from genuine faults (I/O, malformed sidecars, a
//! failing repository) so callers can tell "please resolve conflicts" from
//! "the disk failed".

use crate::repository::RepositoryError;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the regsync library
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for all regsync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON configuration loading
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors while reading or writing XML
    #[error("XML error: {0}")]
    Xml(String),

    /// Conflict markers were found in a directory being checked in
    #[error("Conflicts unresolved in {directory:?}: {}", .markers.join(", "))]
    ConflictsUnresolved {
        /// Directory holding the markers
        directory: PathBuf,
        /// Marker file names found
        markers: Vec<String>,
    },

    /// A sidecar record was written by an older checkout format
    #[error("Stale checkout format in {meta_file:?}")]
    StaleCheckoutFormat {
        /// Offending sidecar file
        meta_file: PathBuf,
    },

    /// No target was given and the working copy carries no root record
    #[error("Working copy at {0:?} has not been checked out")]
    CheckoutRequired(PathBuf),

    /// The parent of a path to add is not tracked
    #[error("Path is not under synchronization control: {0:?}")]
    NotUnderControl(PathBuf),

    /// A sidecar file could not be read or written
    #[error("Metadata error at {meta_file:?}: {source}")]
    Metadata {
        /// Sidecar file involved
        meta_file: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A sidecar record exists but cannot be interpreted
    #[error("Invalid metadata in {meta_file:?}: {reason}")]
    InvalidMetadata {
        /// Sidecar file involved
        meta_file: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// A resource marked added or updated has no readable content
    #[error("Content missing for changed resource: {0:?}")]
    MissingContent(PathBuf),

    /// The change-set could not be staged
    #[error("Staging error: {0}")]
    Staging(String),

    /// The repository refused or failed the import
    #[error("Failed to check in {path} as {username}: {source}")]
    Transmission {
        /// Repository path the change-set was restored under
        path: String,
        /// Acting user
        username: String,
        /// Registry URL, when one was given
        registry_url: Option<String>,
        /// Repository failure
        #[source]
        source: RepositoryError,
    },

    /// The repository host could not be reached
    #[error("Cannot connect to repository at {registry_url}")]
    RepositoryUnreachable {
        /// URL or location that was tried
        registry_url: String,
        /// Repository failure
        #[source]
        source: RepositoryError,
    },

    /// The change-set archive to restore does not exist
    #[error("Change-set archive not found: {0:?}")]
    ArchiveNotFound(PathBuf),

    /// The staging artifact could not be removed
    #[error("Failed to remove staging file {path:?}: {source}")]
    Cleanup {
        /// Staging file path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Invalid repository target
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Pattern parsing error
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error")]
    WalkDir(#[from] walkdir::Error),

    /// The walk was cancelled at a directory boundary
    #[error("Check-in cancelled")]
    Cancelled,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<quick_xml::Error> for SyncError {
    fn from(err: quick_xml::Error) -> Self {
        SyncError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SyncError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        SyncError::Xml(err.to_string())
    }
}

impl From<globset::Error> for SyncError {
    fn from(err: globset::Error) -> Self {
        SyncError::InvalidPattern(err.to_string())
    }
}

impl SyncError {
    /// Create a staging error with a custom message
    pub fn staging(msg: impl Into<String>) -> Self {
        SyncError::Staging(msg.into())
    }

    /// Create an XML error with a custom message
    pub fn xml(msg: impl Into<String>) -> Self {
        SyncError::Xml(msg.into())
    }

    /// Create an invalid-metadata error for a sidecar file
    pub fn invalid_metadata(meta_file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SyncError::InvalidMetadata {
            meta_file: meta_file.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SyncError::Internal(msg.into())
    }

    /// Check if the user can fix this and simply run again
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::ConflictsUnresolved { .. }
                | SyncError::Cancelled
                | SyncError::RepositoryUnreachable { .. }
        )
    }

    /// Check if this error reports unresolved conflict markers
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::ConflictsUnresolved { .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SyncError::ConflictsUnresolved { directory, markers } => {
                format!(
                    "Unresolved conflicts in {:?} ({}). Resolve them, delete the .mine/.server files and check in again.",
                    directory,
                    markers.join(", ")
                )
            }
            SyncError::StaleCheckoutFormat { meta_file } => {
                format!(
                    "{:?} was written by an older checkout format. Check the collection out again before checking in.",
                    meta_file
                )
            }
            SyncError::CheckoutRequired(path) => {
                format!(
                    "{:?} is not a checked-out working copy. Check it out first or pass an explicit target.",
                    path
                )
            }
            SyncError::RepositoryUnreachable { registry_url, .. } => {
                format!(
                    "Could not connect to the repository at {}. Check the address and try again.",
                    registry_url
                )
            }
            SyncError::Transmission { path, username, registry_url, source } => match registry_url {
                Some(url) => format!(
                    "Error restoring {} on {} as user {}: {}",
                    path, url, username, source
                ),
                None => format!("Error restoring {} as user {}: {}", path, username, source),
            },
            _ => self.to_string(),
        }
    }
}
