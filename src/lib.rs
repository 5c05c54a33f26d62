//! # Regsync - Check-in synchronization for repository working copies
//!
//! A library for sending the local changes of a checked-out working copy
//! back to a hierarchical content repository.
//!
//! ## Overview
//!
//! A working copy mirrors a subtree of the repository on disk. Next to every
//! file and folder sits a small XML record (the sidecar) kept in a `.meta`
//! folder, remembering the node's repository path, its MD5 digest at the last
//! sync and an optional status marker. Regsync allows you to:
//! - Detect added, updated and deleted nodes by merging sidecars with the
//!   live filesystem and a fresh fingerprint
//! - Refuse to check in while unresolved `.mine`/`.server` conflict markers
//!   remain
//! - Stream every change into a single XML change-set document with embedded
//!   content
//! - Hand that document to a [`Repository`] in one `restore` call
//! - Update sidecars and remove deleted files only once the repository
//!   accepted the change-set
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use regsync::{CheckInBuilder, DirectoryRepository};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut check_in = CheckInBuilder::new()
//!     .username("admin")
//!     .build("./ws")?;
//!
//! let mut repository = DirectoryRepository::new("./repo");
//! let report = check_in.execute(&mut repository)?;
//! if report.changed() {
//!     println!("Sent {} changes", report.sent_count());
//! } else {
//!     println!("Nothing to check in");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Marking changes
//!
//! New nodes need a record before they are sent, and deleted files are only
//! sent once their record says so:
//!
//! ```rust,no_run
//! # use regsync::{working_copy, SyncConfig};
//! # use std::path::Path;
//! # fn main() -> regsync::Result<()> {
//! working_copy::mark_added(Path::new("./ws/docs"), &SyncConfig::default())?;
//! working_copy::mark_missing_deleted(Path::new("./ws"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, SyncError>`. Conflicts
//! ([`SyncError::ConflictsUnresolved`]) are reported before anything is
//! sent; repository failures keep the working copy exactly as it was, so
//! the same check-in can simply be retried.
//!
//! ## Module Organization
//!
//! - [`checkin`]: Session orchestration and the builder
//! - [`reconcile`]: Tree walk and per-node change detection
//! - [`changeset`]: Streaming change-set writer and parser
//! - [`meta`]: Sidecar records
//! - [`conflict`]: Conflict marker detection
//! - [`fingerprint`]: MD5 content digests
//! - [`repository`]: The repository seam and its implementations
//! - [`working_copy`]: Marking added and deleted nodes
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

// Public API modules
pub mod changeset;
pub mod checkin;
pub mod conflict;
pub mod error;
pub mod fingerprint;
pub mod meta;
pub mod reconcile;
pub mod repository;
pub mod types;
pub mod utils;
pub mod working_copy;
pub mod xml;

// Re-export main types for convenience
pub use checkin::{CheckIn, CheckInBuilder, CheckInSource};
pub use error::{Result, SyncError};
pub use meta::{MetaRecord, RecordedStatus};
pub use repository::{DirectoryRepository, MemoryRepository, Repository, RepositoryError, Target};
pub use types::*;
