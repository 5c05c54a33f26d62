//! Tree reconciliation
//!
//! The reconciler walks a working copy, merges each node's sidecar record
//! with the live filesystem and a fresh fingerprint, and writes every node
//! that changed into a [`ChangeSetWriter`].
//!
//! ## Per-node decisions
//!
//! | Sidecar status | Live content | Result |
//! |---|---|---|
//! | none (no sidecar) | any | not tracked, never sent |
//! | `added` | must exist | sent as added, default attributes regenerated |
//! | `updated` | must exist | sent as updated with a fresh digest |
//! | `deleted` | ignored | sent as deleted, local copy removed afterwards |
//! | absent attribute | digest matches | nothing |
//! | absent attribute | digest differs or none recorded | sent as updated |
//!
//! ## Children
//!
//! A directory's resources come from its `.meta` folder, so a resource
//! deleted from disk is still found through its record. Its subdirectories
//! come from the live listing and are walked even without a record of their
//! own, since they may hold newly added resources further down.
//!
//! ## Effects
//!
//! The walk never touches the working copy. Sidecar rewrites and removals
//! are returned as [`LocalEffect`]s in a [`WalkSummary`]; the caller applies
//! them once the change-set has been accepted.

use crate::changeset::ChangeSetWriter;
use crate::conflict::{self, ConflictScan};
use crate::error::{Result, SyncError};
use crate::fingerprint;
use crate::meta::{self, MetaRecord, RecordedStatus, SidecarEntry, META_DIRECTORY};
use crate::types::{Change, ChangeKind, ChangeNotice, ChangeStats, SyncCallback, SyncConfig};
use crate::utils;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A change to the working copy, applied after a successful check-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEffect {
    /// Persist a record with its status stripped and its digest updated
    RewriteSidecar {
        /// Sidecar file
        meta_file: PathBuf,
        /// Record to persist
        record: MetaRecord,
    },
    /// Remove a node sent as deleted
    Remove {
        /// File or directory to remove
        local_path: PathBuf,
        /// Its sidecar file, for resources
        meta_file: Option<PathBuf>,
    },
}

/// What one subtree contributed
#[derive(Debug, Default)]
pub struct WalkSummary {
    /// Counters of the nodes sent
    pub stats: ChangeStats,
    /// Working copy changes to apply after a successful check-in
    pub effects: Vec<LocalEffect>,
    /// Nodes skipped on the best-effort path
    pub warnings: Vec<String>,
}

impl WalkSummary {
    /// Number of nodes sent
    pub fn sent_count(&self) -> usize {
        self.stats.sent_count()
    }

    /// Fold a child summary into this one
    pub fn absorb(&mut self, other: WalkSummary) {
        self.stats.merge(other.stats);
        self.effects.extend(other.effects);
        self.warnings.extend(other.warnings);
    }
}

/// Compile ignore patterns matched against live directory names
pub fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Working copy walker
pub struct Reconciler<'a, W: Write> {
    config: &'a SyncConfig,
    ignore: GlobSet,
    writer: &'a mut ChangeSetWriter<W>,
    callback: Option<SyncCallback>,
    cancel: Option<Arc<AtomicBool>>,
    now: DateTime<Utc>,
}

impl<'a, W: Write> Reconciler<'a, W> {
    /// Create a reconciler writing into `writer`
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidPattern`] if an ignore pattern does not compile
    pub fn new(config: &'a SyncConfig, writer: &'a mut ChangeSetWriter<W>) -> Result<Self> {
        Ok(Self {
            config,
            ignore: build_ignore_set(&config.ignore_patterns)?,
            writer,
            callback: None,
            cancel: None,
            now: Utc::now(),
        })
    }

    /// Notify `callback` for every node sent
    pub fn with_callback(mut self, callback: Option<SyncCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Stop at the next directory once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Option<Arc<AtomicBool>>) -> Self {
        self.cancel = flag;
        self
    }

    /// Use a fixed time for added nodes
    pub fn with_timestamp(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Reconcile the working copy rooted at `root`, mapped to `path`
    ///
    /// The root collection is always written, even when nothing below it
    /// changed.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ConflictsUnresolved`] if a walked directory holds conflict markers
    /// - [`SyncError::StaleCheckoutFormat`] if a directory record uses the old format
    /// - [`SyncError::MissingContent`] if an added or updated resource has no file
    /// - [`SyncError::Metadata`] / [`SyncError::InvalidMetadata`] for unusable sidecars
    /// - [`SyncError::Cancelled`] if the cancel flag was raised
    pub fn reconcile_root(&mut self, root: &Path, path: &str) -> Result<WalkSummary> {
        debug!("Reconciling {:?} as {}", root, path);
        self.reconcile_directory(root, path, true)
    }

    fn reconcile_directory(&mut self, dir: &Path, path: &str, is_root: bool) -> Result<WalkSummary> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(SyncError::Cancelled);
            }
        }

        let mut summary = WalkSummary::default();
        let meta_file = meta::directory_meta_path(dir);
        let stored = meta::read(&meta_file)?;
        if stored.as_ref().is_some_and(MetaRecord::has_legacy_attributes) {
            return Err(SyncError::StaleCheckoutFormat { meta_file });
        }

        if let ConflictScan::Conflicted { directory, markers } = conflict::scan(dir)? {
            if !self.config.ignore_conflicts {
                return Err(SyncError::ConflictsUnresolved { directory, markers });
            }
            warn!("Checking in {:?} despite conflict markers {:?}", directory, markers);
        }

        let name = utils::resource_name(path);
        let mut record = stored.unwrap_or_else(|| MetaRecord::new(&name, path, true));
        record.set_name(&name);

        let status = record
            .status()
            .map_err(|reason| SyncError::invalid_metadata(&meta_file, reason))?;
        let change = match status {
            RecordedStatus::Unchanged => Change::Unchanged,
            RecordedStatus::Added => Change::Added {
                author: self.config.username.clone(),
                timestamp: self.now,
                digest: None,
            },
            RecordedStatus::Updated => Change::Updated { digest: None },
            RecordedStatus::Deleted => Change::Deleted,
        };
        if let Change::Added { author, timestamp, .. } = &change {
            record.apply_added_defaults(author, *timestamp);
        }

        if let Some(kind) = change.kind() {
            if kind != ChangeKind::Deleted {
                summary.effects.push(LocalEffect::RewriteSidecar {
                    meta_file: meta_file.clone(),
                    record: record.clone(),
                });
            }
            record.set_status(kind.into());
            summary.stats.record(kind, path, 0);
            self.notify(dir, path, kind);
        }

        self.writer
            .begin_directory(record.element(), is_root || change.is_emitted())?;
        summary.absorb(self.reconcile_resources(dir, path)?);
        for (child_name, child_dir) in self.live_subdirectories(dir)? {
            let child_path = utils::join_registry_path(path, &child_name);
            summary.absorb(self.reconcile_directory(&child_dir, &child_path, false)?);
        }
        self.writer.end_directory()?;

        if change == Change::Deleted {
            summary.effects.push(LocalEffect::Remove {
                local_path: dir.to_path_buf(),
                meta_file: None,
            });
        }
        trace!("{} contributed {} changes", path, summary.sent_count());
        Ok(summary)
    }

    fn reconcile_resources(&mut self, dir: &Path, dir_path: &str) -> Result<WalkSummary> {
        let mut planned = Vec::new();
        for entry in meta::list_resource_entries(dir)? {
            let Some(record) = meta::read(&entry.meta_file)? else {
                continue;
            };
            let status = record
                .status()
                .map_err(|reason| SyncError::invalid_metadata(&entry.meta_file, reason))?;
            planned.push((entry, record, status));
        }

        let fingerprint_of = |(entry, _, status): &(SidecarEntry, MetaRecord, RecordedStatus)| {
            (*status != RecordedStatus::Deleted)
                .then(|| fingerprint::fingerprint_file(&dir.join(&entry.name)))
        };
        let digests: Vec<Option<Result<String>>> = if self.config.parallel_fingerprints {
            planned.par_iter().map(fingerprint_of).collect()
        } else {
            planned.iter().map(fingerprint_of).collect()
        };

        let mut summary = WalkSummary::default();
        for ((entry, record, status), digest) in planned.into_iter().zip(digests) {
            summary.absorb(self.reconcile_resource(dir, dir_path, entry, record, status, digest)?);
        }
        Ok(summary)
    }

    fn reconcile_resource(
        &mut self,
        dir: &Path,
        dir_path: &str,
        entry: SidecarEntry,
        mut record: MetaRecord,
        status: RecordedStatus,
        digest: Option<Result<String>>,
    ) -> Result<WalkSummary> {
        let mut summary = WalkSummary::default();
        let local_path = dir.join(&entry.name);
        let path = utils::join_registry_path(dir_path, &entry.name);
        record.set_name(&entry.name);

        let change = match status {
            RecordedStatus::Added => Change::Added {
                author: self.config.username.clone(),
                timestamp: self.now,
                digest: Some(required_digest(digest, &local_path)?),
            },
            RecordedStatus::Updated => Change::Updated {
                digest: Some(required_digest(digest, &local_path)?),
            },
            RecordedStatus::Deleted => Change::Deleted,
            RecordedStatus::Unchanged => match digest {
                Some(Ok(fresh)) if record.digest() == Some(fresh.as_str()) => {
                    trace!("{} unchanged", path);
                    return Ok(summary);
                }
                Some(Ok(fresh)) => Change::Updated { digest: Some(fresh) },
                Some(Err(e)) => {
                    warn!("Skipping {:?}: cannot fingerprint: {}", local_path, e);
                    summary
                        .warnings
                        .push(format!("skipped {}: {}", local_path.display(), e));
                    return Ok(summary);
                }
                None => return Ok(summary),
            },
        };
        let Some(kind) = change.kind() else {
            return Ok(summary);
        };

        if !self.config.silent_update && !self.config.ignore_conflicts {
            record.set_ignore_conflicts(false);
        }
        if let Change::Added { author, timestamp, .. } = &change {
            record.apply_added_defaults(author, *timestamp);
        }
        if let Some(fresh) = change.digest() {
            record.set_digest(fresh);
        }

        if kind == ChangeKind::Deleted {
            summary.effects.push(LocalEffect::Remove {
                local_path: local_path.clone(),
                meta_file: Some(entry.meta_file),
            });
        } else {
            summary.effects.push(LocalEffect::RewriteSidecar {
                meta_file: entry.meta_file,
                record: record.clone(),
            });
        }

        record.set_status(kind.into());
        let content = (kind != ChangeKind::Deleted).then_some(local_path.as_path());
        let bytes = self.writer.write_resource(record.element(), content)?;
        summary.stats.record(kind, &path, bytes);
        self.notify(&local_path, &path, kind);
        trace!("{} sent as {}", path, kind);
        Ok(summary)
    }

    fn live_subdirectories(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                warn!("Skipping non UTF-8 directory name in {:?}", dir);
                continue;
            };
            if name == META_DIRECTORY
                || conflict::is_conflict_marker(&name)
                || self.ignore.is_match(&name)
            {
                continue;
            }
            children.push((name, entry.path()));
        }
        children.sort();
        Ok(children)
    }

    fn notify(&self, local_path: &Path, path: &str, kind: ChangeKind) {
        if let Some(callback) = &self.callback {
            callback(ChangeNotice {
                local_path: local_path.to_path_buf(),
                repository_path: path.to_string(),
                kind,
            });
        }
    }
}

fn required_digest(digest: Option<Result<String>>, local_path: &Path) -> Result<String> {
    match digest {
        Some(Ok(digest)) => Ok(digest),
        Some(Err(SyncError::Io(e))) if e.kind() == io::ErrorKind::NotFound => {
            Err(SyncError::MissingContent(local_path.to_path_buf()))
        }
        Some(Err(e)) => Err(e),
        None => fingerprint::fingerprint_file(local_path),
    }
}
