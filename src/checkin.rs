//! Check-in orchestration
//!
//! A [`CheckIn`] owns one sync session. For a working copy it:
//!
//! 1. stages the reconciled change-set into a temporary file,
//! 2. skips the repository entirely when nothing changed (unless told to send
//!    anyway),
//! 3. otherwise restores the staged document into the repository,
//! 4. removes the staging file, reporting but never failing on cleanup,
//! 5. and only then applies the local effects of the walk: stripping the
//!    status from captured sidecars and removing nodes sent as deleted.
//!
//! A failed import therefore leaves the working copy exactly as it was, and
//! running the check-in again sends the same change-set.
//!
//! A check-in can also pass an existing change-set archive straight to the
//! repository without reconciling anything.
//!
//! ## Example
//!
//! ```rust,no_run
//! use regsync::{CheckInBuilder, DirectoryRepository};
//!
//! # fn main() -> regsync::Result<()> {
//! let mut check_in = CheckInBuilder::new()
//!     .username("admin")
//!     .silent_update(false)
//!     .build("./ws")?;
//!
//! let mut repository = DirectoryRepository::new("./repo");
//! let report = check_in.execute(&mut repository)?;
//! println!("sent {} changes", report.sent_count());
//! # Ok(())
//! # }
//! ```

use crate::changeset::ChangeSetWriter;
use crate::error::{Result, SyncError};
use crate::meta;
use crate::reconcile::{LocalEffect, Reconciler, WalkSummary};
use crate::repository::{Repository, RepositoryError, Target};
use crate::types::{ChangeStats, CheckInReport, SyncCallback, SyncConfig};
use crate::utils;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Prefix of staging file names
pub const STAGING_PREFIX: &str = "~dump";
/// Suffix of staging file names
pub const STAGING_SUFFIX: &str = ".xml";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// What a check-in reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInSource {
    /// Reconcile a working copy
    WorkingCopy(PathBuf),
    /// Restore an existing change-set document, plain or gzip-compressed
    Archive {
        /// Archive file, relative to the working copy when one is given
        archive: PathBuf,
        /// Working copy whose root record names the target
        working_copy: Option<PathBuf>,
    },
}

impl CheckInSource {
    fn working_copy(&self) -> Option<&Path> {
        match self {
            CheckInSource::WorkingCopy(root) => Some(root),
            CheckInSource::Archive { working_copy, .. } => working_copy.as_deref(),
        }
    }

    fn location(&self) -> &Path {
        match self {
            CheckInSource::WorkingCopy(root) => root,
            CheckInSource::Archive { archive, working_copy } => {
                working_copy.as_deref().unwrap_or(archive)
            }
        }
    }
}

/// One check-in session
pub struct CheckIn {
    source: CheckInSource,
    config: SyncConfig,
    checkin_path: String,
    registry_url: Option<String>,
    skip_if_unchanged: bool,
    callback: Option<SyncCallback>,
    cancel: Option<Arc<AtomicBool>>,
    sent_count: Option<usize>,
}

impl CheckIn {
    /// Start building a check-in
    pub fn builder() -> CheckInBuilder {
        CheckInBuilder::new()
    }

    /// Create a check-in session
    ///
    /// The repository path comes from `target` when given, otherwise from
    /// the `path` recorded on the working copy's root record. When both exist
    /// and differ the change-set is sent even if nothing changed.
    ///
    /// # Errors
    ///
    /// - [`SyncError::CheckoutRequired`] if there is neither a target nor a root record
    /// - [`SyncError::InvalidTarget`] if the target cannot be parsed
    /// - [`SyncError::InvalidConfiguration`] if the working copy is not a directory
    pub fn new(source: CheckInSource, target: Option<&str>, config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let root_record = match source.working_copy() {
            Some(root) => {
                if !root.is_dir() {
                    return Err(SyncError::InvalidConfiguration(format!(
                        "working copy {:?} is not a directory",
                        root
                    )));
                }
                meta::read(&meta::directory_meta_path(root))?
            }
            None => None,
        };
        let recorded_path = root_record.as_ref().and_then(|r| r.path()).map(str::to_string);
        let recorded_url = root_record
            .as_ref()
            .and_then(|r| r.registry_url())
            .map(str::to_string);

        let (checkin_path, registry_url, moved) = match target {
            Some(target) => {
                let target = Target::parse(target)?;
                let moved = recorded_path.as_deref().is_some_and(|p| p != target.path);
                (target.path, target.registry_url, moved)
            }
            None => match recorded_path {
                Some(path) => (path, recorded_url, false),
                None => return Err(SyncError::CheckoutRequired(source.location().to_path_buf())),
            },
        };
        if moved {
            debug!("Target {} differs from the checked-out path; sending unconditionally", checkin_path);
        }

        Ok(Self {
            skip_if_unchanged: config.skip_if_unchanged && !moved,
            source,
            config,
            checkin_path,
            registry_url,
            callback: None,
            cancel: None,
            sent_count: None,
        })
    }

    /// Repository path the change-set is restored under
    pub fn checkin_path(&self) -> &str {
        &self.checkin_path
    }

    /// Registry URL, absent for a local repository
    pub fn registry_url(&self) -> Option<&str> {
        self.registry_url.as_deref()
    }

    /// Session configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Number of nodes staged by the last [`execute`](Self::execute)
    ///
    /// `None` until a working copy has been staged successfully, and always
    /// `None` for archive check-ins.
    pub fn sent_count(&self) -> Option<usize> {
        self.sent_count
    }

    /// Notify `callback` for every node sent
    pub fn set_callback(&mut self, callback: SyncCallback) {
        self.callback = Some(callback);
    }

    /// Stop the walk at the next directory once `flag` is set
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Run the check-in against `repository`
    ///
    /// # Returns
    ///
    /// A [`CheckInReport`]; `report.changed()` tells whether the repository
    /// was contacted.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ConflictsUnresolved`] if conflict markers were found; nothing is sent
    /// - [`SyncError::StaleCheckoutFormat`] if the working copy uses the old format
    /// - [`SyncError::Staging`] if the change-set cannot be staged
    /// - [`SyncError::RepositoryUnreachable`] if the repository cannot be reached
    /// - [`SyncError::Transmission`] if the repository fails the import
    /// - [`SyncError::Metadata`] if a captured sidecar cannot be rewritten afterwards
    /// - [`SyncError::ArchiveNotFound`] if an archive check-in has no archive
    #[instrument(skip(self, repository), fields(path = %self.checkin_path))]
    pub fn execute<R: Repository + ?Sized>(&mut self, repository: &mut R) -> Result<CheckInReport> {
        info!("Checking in to {}", self.checkin_path);
        let start = Instant::now();

        let mut report = match self.source.clone() {
            CheckInSource::WorkingCopy(root) => self.check_in_working_copy(&root, repository)?,
            CheckInSource::Archive { archive, working_copy } => {
                self.restore_archive(&archive, working_copy.as_deref(), repository)?
            }
        };

        if report.transmitted && self.config.clean_registry && self.registry_url.is_none() {
            if let Err(e) = repository.clean() {
                warn!("Repository cleanup failed: {}", e);
                report.warnings.push(format!("repository cleanup failed: {}", e));
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Check-in of {} finished: {} changes, transmitted: {}",
            self.checkin_path,
            report.sent_count(),
            report.transmitted
        );
        Ok(report)
    }

    /// Stage the change-set into `out` without touching anything
    ///
    /// Neither the working copy nor any repository is modified; the
    /// returned summary lists the effects a real check-in would apply.
    ///
    /// # Errors
    ///
    /// Same walk errors as [`execute`](Self::execute), and
    /// [`SyncError::InvalidConfiguration`] for archive check-ins.
    pub fn stage<W: Write>(&self, out: W) -> Result<(WalkSummary, W)> {
        let CheckInSource::WorkingCopy(root) = &self.source else {
            return Err(SyncError::InvalidConfiguration(
                "an archive check-in has no working copy to stage".to_string(),
            ));
        };

        let mut writer = ChangeSetWriter::new(out)?;
        let summary = Reconciler::new(&self.config, &mut writer)?
            .with_callback(self.callback.clone())
            .with_cancel_flag(self.cancel.clone())
            .reconcile_root(root, &self.checkin_path)?;
        let out = writer.finish()?;
        debug!("Staged {} changes for {}", summary.sent_count(), self.checkin_path);
        Ok((summary, out))
    }

    /// Count what a check-in would send
    pub fn pending_changes(&self) -> Result<ChangeStats> {
        let (summary, _) = self.stage(io::sink())?;
        Ok(summary.stats)
    }

    fn check_in_working_copy<R: Repository + ?Sized>(
        &mut self,
        root: &Path,
        repository: &mut R,
    ) -> Result<CheckInReport> {
        let staging = self.create_staging_file()?;
        let staging_path = staging.path().to_path_buf();

        let (summary, out) = self.stage(BufWriter::new(staging.as_file()))?;
        out.into_inner().map_err(|e| {
            SyncError::staging(format!("cannot flush {:?}: {}", staging_path, e.error()))
        })?;
        let WalkSummary {
            stats,
            effects,
            mut warnings,
        } = summary;
        self.sent_count = Some(stats.sent_count());

        let transmit = stats.has_changes() || !self.skip_if_unchanged;
        let outcome = if transmit {
            self.transmit(repository, &staging_path)
        } else {
            info!("Nothing changed under {:?}; not contacting the repository", root);
            Ok(())
        };

        if let Err(source) = staging.close() {
            let err = SyncError::Cleanup {
                path: staging_path,
                source,
            };
            warn!("{}", err);
            warnings.push(err.to_string());
        }
        outcome?;

        self.apply_effects(effects, &mut warnings)?;
        Ok(CheckInReport {
            checkin_path: self.checkin_path.clone(),
            stats,
            transmitted: transmit,
            duration_ms: 0,
            warnings,
        })
    }

    fn restore_archive<R: Repository + ?Sized>(
        &self,
        archive: &Path,
        working_copy: Option<&Path>,
        repository: &mut R,
    ) -> Result<CheckInReport> {
        let path = match working_copy {
            Some(dir) if archive.is_relative() => dir.join(archive),
            _ => archive.to_path_buf(),
        };
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SyncError::ArchiveNotFound(path.clone()),
            _ => SyncError::Io(e),
        })?;

        let mut reader = BufReader::new(file);
        let compressed = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
        debug!("Restoring archive {:?} (gzip: {})", path, compressed);
        let result = if compressed {
            let mut decoder = GzDecoder::new(reader);
            repository.restore(&self.checkin_path, &mut decoder)
        } else {
            repository.restore(&self.checkin_path, &mut reader)
        };
        result.map_err(|source| self.transmission_error(source))?;

        Ok(CheckInReport {
            checkin_path: self.checkin_path.clone(),
            stats: ChangeStats::default(),
            transmitted: true,
            duration_ms: 0,
            warnings: Vec::new(),
        })
    }

    fn create_staging_file(&self) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX).suffix(STAGING_SUFFIX);
        let result = match &self.config.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        result.map_err(|e| SyncError::staging(format!("cannot create staging file: {}", e)))
    }

    fn transmit<R: Repository + ?Sized>(&self, repository: &mut R, staged: &Path) -> Result<()> {
        let file = File::open(staged).map_err(|e| {
            SyncError::staging(format!("cannot reopen staged change-set {:?}: {}", staged, e))
        })?;
        let mut reader = BufReader::new(file);
        debug!("Transmitting {:?} to {}", staged, self.checkin_path);
        repository
            .restore(&self.checkin_path, &mut reader)
            .map_err(|source| self.transmission_error(source))
    }

    fn transmission_error(&self, source: RepositoryError) -> SyncError {
        match source {
            RepositoryError::Unreachable(_) => SyncError::RepositoryUnreachable {
                registry_url: self
                    .registry_url
                    .clone()
                    .unwrap_or_else(|| "local repository".to_string()),
                source,
            },
            source => SyncError::Transmission {
                path: self.checkin_path.clone(),
                username: self.config.username.clone(),
                registry_url: self.registry_url.clone(),
                source,
            },
        }
    }

    fn apply_effects(&self, effects: Vec<LocalEffect>, warnings: &mut Vec<String>) -> Result<()> {
        let mut rewritten = 0usize;
        let mut removed = 0usize;
        for effect in effects {
            match effect {
                LocalEffect::RewriteSidecar { meta_file, record } => {
                    meta::write(&meta_file, &record)?;
                    rewritten += 1;
                }
                LocalEffect::Remove {
                    local_path,
                    meta_file,
                } => {
                    for path in meta_file.iter().chain(std::iter::once(&local_path)) {
                        if let Err(e) = utils::remove_path(path) {
                            warn!("Failed to remove {:?}: {}", path, e);
                            warnings.push(format!("failed to remove {}: {}", path.display(), e));
                        }
                    }
                    removed += 1;
                }
            }
        }
        debug!("Rewrote {} sidecars, removed {} nodes", rewritten, removed);
        Ok(())
    }
}

/// Builder for [`CheckIn`]
///
/// # Examples
///
/// ```rust,no_run
/// use regsync::CheckInBuilder;
///
/// # fn main() -> regsync::Result<()> {
/// let check_in = CheckInBuilder::new()
///     .username("alice")
///     .target("https://localhost:9443/registry/_system/ws")
///     .ignore_patterns(vec!["target".to_string()])
///     .build("./ws")?;
/// # Ok(())
/// # }
/// ```
pub struct CheckInBuilder {
    config: SyncConfig,
    target: Option<String>,
    callback: Option<SyncCallback>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for CheckInBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckInBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
            target: None,
            callback: None,
            cancel: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the acting user
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    /// Set silent update
    ///
    /// When off, emitted resources carry `ignoreConflicts="false"` and the
    /// repository rejects updates that conflict with its own copy.
    pub fn silent_update(mut self, silent: bool) -> Self {
        self.config.silent_update = silent;
        self
    }

    /// Check in even when conflict markers are present
    pub fn ignore_conflicts(mut self, ignore: bool) -> Self {
        self.config.ignore_conflicts = ignore;
        self
    }

    /// Ask a local repository to clean up after a successful import
    pub fn clean_registry(mut self, clean: bool) -> Self {
        self.config.clean_registry = clean;
        self
    }

    /// Skip the import when nothing changed (default)
    pub fn skip_if_unchanged(mut self, skip: bool) -> Self {
        self.config.skip_if_unchanged = skip;
        self
    }

    /// Set ignore patterns for live directory names
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.ignore_patterns = patterns;
        self
    }

    /// Fingerprint the resources of one directory in parallel (default)
    pub fn parallel_fingerprints(mut self, parallel: bool) -> Self {
        self.config.parallel_fingerprints = parallel;
        self
    }

    /// Stage change-sets in `dir` instead of the system temp dir
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = Some(dir.into());
        self
    }

    /// Check in to a repository path or registry URL
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Receive a notification per node sent
    pub fn callback(mut self, callback: SyncCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Cancel the walk once `flag` is set
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Build a check-in of a working copy
    ///
    /// # Errors
    ///
    /// See [`CheckIn::new`].
    pub fn build(self, working_copy: impl Into<PathBuf>) -> Result<CheckIn> {
        self.finish(CheckInSource::WorkingCopy(working_copy.into()))
    }

    /// Build a check-in that restores an existing change-set archive
    ///
    /// # Errors
    ///
    /// See [`CheckIn::new`].
    pub fn build_from_archive(
        self,
        archive: impl Into<PathBuf>,
        working_copy: Option<PathBuf>,
    ) -> Result<CheckIn> {
        self.finish(CheckInSource::Archive {
            archive: archive.into(),
            working_copy,
        })
    }

    fn finish(self, source: CheckInSource) -> Result<CheckIn> {
        let mut check_in = CheckIn::new(source, self.target.as_deref(), self.config)?;
        check_in.callback = self.callback;
        check_in.cancel = self.cancel;
        Ok(check_in)
    }
}
