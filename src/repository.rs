//! The repository boundary
//!
//! A check-in ends with one call to [`Repository::restore`], handing the
//! staged change-set to whatever applies it under a repository path. The
//! engine treats that operation as opaque; this module defines the seam and
//! ships two implementations:
//!
//! - [`DirectoryRepository`] applies change-sets to a plain directory tree,
//!   one folder per collection. It backs the CLI and integration tests.
//! - [`MemoryRepository`] only records what it was given.
//!
//! It also parses check-in targets given as repository paths or URLs.

use crate::changeset::{self, ChangeSetEntry};
use crate::error::{Result, SyncError};
use crate::meta::RecordedStatus;
use crate::utils;
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Failure reported by a repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The repository host cannot be reached
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The repository refused the change-set
    #[error("change-set rejected: {0}")]
    Rejected(String),

    /// I/O failure while consuming the change-set
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Something a change-set can be restored into
pub trait Repository {
    /// Apply a complete change-set document under `path`
    ///
    /// An error means the import did not succeed, and the check-in leaves
    /// the working copy untouched. How much of a failed document reached
    /// the repository is up to the implementation.
    fn restore(&mut self, path: &str, content: &mut dyn Read) -> std::result::Result<(), RepositoryError>;

    /// Release any local copy kept for the import
    ///
    /// Called after a successful check-in when the session asks for it.
    fn clean(&mut self) -> std::result::Result<(), RepositoryError> {
        Ok(())
    }
}

impl<R: Repository + ?Sized> Repository for &mut R {
    fn restore(&mut self, path: &str, content: &mut dyn Read) -> std::result::Result<(), RepositoryError> {
        (**self).restore(path, content)
    }

    fn clean(&mut self) -> std::result::Result<(), RepositoryError> {
        (**self).clean()
    }
}

/// Where a check-in goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Registry URL, absent for a bare repository path
    pub registry_url: Option<String>,
    /// Repository path of the checked-in collection
    pub path: String,
}

/// Path segment separating a registry URL from the repository path
pub const REGISTRY_CONTEXT: &str = "/registry";

impl Target {
    /// Parse a target
    ///
    /// Accepts an absolute repository path such as `/_system/ws`, or a URL
    /// whose path contains `/registry`, e.g.
    /// `https://host:9443/registry/_system/ws`, where everything after the
    /// last `/registry` is the repository path.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidTarget`] if the value is neither
    ///
    /// # Example
    ///
    /// ```rust
    /// # use regsync::repository::Target;
    /// let target = Target::parse("https://localhost:9443/registry/_system/ws").unwrap();
    /// assert_eq!(target.registry_url.as_deref(), Some("https://localhost:9443/registry"));
    /// assert_eq!(target.path, "/_system/ws");
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.starts_with('/') {
            return Ok(Self {
                registry_url: None,
                path: input.to_string(),
            });
        }

        let url = Url::parse(input)
            .map_err(|e| SyncError::InvalidTarget(format!("{}: {}", input, e)))?;
        let url_path = url.path();
        let idx = url_path.rfind(REGISTRY_CONTEXT).ok_or_else(|| {
            SyncError::InvalidTarget(format!("{} does not contain {}", input, REGISTRY_CONTEXT))
        })?;
        let path = &url_path[idx + REGISTRY_CONTEXT.len()..];
        if !path.is_empty() && !path.starts_with('/') {
            return Err(SyncError::InvalidTarget(format!(
                "{} does not contain {}",
                input, REGISTRY_CONTEXT
            )));
        }

        let mut base = url.clone();
        base.set_path(&url_path[..idx + REGISTRY_CONTEXT.len()]);
        base.set_query(None);
        base.set_fragment(None);
        let path = match path.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        Ok(Self {
            registry_url: Some(base.to_string()),
            path,
        })
    }
}

/// Repository kept as a directory tree
///
/// The collection at repository path `/a/b` is the folder `<root>/a/b`.
/// A document is checked in full before anything is written, so a
/// rejected document leaves the tree alone. An I/O failure while applying
/// members can leave it partially updated.
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
    restores: usize,
}

impl DirectoryRepository {
    /// Open a repository rooted at an existing directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            restores: 0,
        }
    }

    /// Root folder
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of successful restores
    pub fn restore_count(&self) -> usize {
        self.restores
    }

    /// Refuse member names that would leave their collection folder
    fn check_members(entry: &ChangeSetEntry) -> std::result::Result<(), RepositoryError> {
        for member in &entry.children {
            if !utils::is_plain_name(&member.name) {
                return Err(RepositoryError::Rejected(format!(
                    "invalid member name {:?} in {}",
                    member.name, entry.name
                )));
            }
            Self::check_members(member)?;
        }
        Ok(())
    }

    fn apply_members(&self, dir: &Path, entry: &ChangeSetEntry) -> io::Result<()> {
        for member in &entry.children {
            let target = dir.join(&member.name);
            match (member.is_collection, member.status) {
                (_, RecordedStatus::Deleted) => {
                    utils::remove_path(&target)?;
                    debug!("Removed {:?}", target);
                }
                (true, _) => {
                    fs::create_dir_all(&target)?;
                    self.apply_members(&target, member)?;
                }
                (false, _) => {
                    if let Some(content) = &member.content {
                        fs::write(&target, content)?;
                        debug!("Wrote {:?} ({} bytes)", target, content.len());
                    }
                }
            }
        }
        Ok(())
    }
}

impl Repository for DirectoryRepository {
    fn restore(&mut self, path: &str, content: &mut dyn Read) -> std::result::Result<(), RepositoryError> {
        if !self.root.is_dir() {
            return Err(RepositoryError::Unreachable(format!(
                "repository root {:?} does not exist",
                self.root
            )));
        }
        let relative =
            utils::registry_path_to_relative(path).map_err(|e| RepositoryError::Rejected(e.to_string()))?;
        let document = changeset::parse_document(BufReader::new(content))
            .map_err(|e| RepositoryError::Rejected(e.to_string()))?;
        Self::check_members(&document)?;

        let dir = self.root.join(relative);
        match document.status {
            RecordedStatus::Deleted => {
                utils::remove_path(&dir)?;
            }
            _ => {
                fs::create_dir_all(&dir)?;
                self.apply_members(&dir, &document)?;
            }
        }
        self.restores += 1;
        info!("Restored {} changes under {}", document.change_count(), path);
        Ok(())
    }
}

/// A restore call captured by [`MemoryRepository`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRestore {
    /// Repository path
    pub path: String,
    /// Raw document bytes
    pub document: Vec<u8>,
}

impl RecordedRestore {
    /// Parse the captured document
    pub fn parse(&self) -> Result<ChangeSetEntry> {
        changeset::parse_document(&self.document[..])
    }
}

/// Repository that records restores in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryRepository {
    /// Every restore received, in order
    pub restores: Vec<RecordedRestore>,
    /// Number of `clean` calls
    pub cleanups: usize,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent restore
    pub fn last(&self) -> Option<&RecordedRestore> {
        self.restores.last()
    }
}

impl Repository for MemoryRepository {
    fn restore(&mut self, path: &str, content: &mut dyn Read) -> std::result::Result<(), RepositoryError> {
        let mut document = Vec::new();
        content.read_to_end(&mut document)?;
        self.restores.push(RecordedRestore {
            path: path.to_string(),
            document,
        });
        Ok(())
    }

    fn clean(&mut self) -> std::result::Result<(), RepositoryError> {
        self.cleanups += 1;
        Ok(())
    }
}
