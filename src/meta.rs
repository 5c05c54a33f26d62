//! Sidecar metadata records
//!
//! Every tracked directory holds a `.meta` subfolder with one record for the
//! directory itself (`~.xml`) and one per tracked child resource
//! (`~<encoded name>.xml`). A record is a single `<resource>` element:
//!
//! ```xml
//! <resource name="a.txt" path="/_system/ws/a.txt" isCollection="false"
//!           status="updated" md5="5d41402abc4b2a76b9719d911017c592">
//!     <mediaType>txt</mediaType>
//!     <creator>admin</creator>
//!     ...
//! </resource>
//! ```
//!
//! The `status` attribute is a one-shot dirty marker: it is stripped when a
//! record is persisted with [`write`] after its change was captured. Every
//! attribute and child element this engine does not interpret is carried
//! through rewrites verbatim.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use regsync::meta::{self, MetaRecord, RecordedStatus};
//! use std::path::Path;
//!
//! # fn main() -> regsync::Result<()> {
//! let dir = Path::new("./ws");
//! let mut record = MetaRecord::new("a.txt", "/_system/ws/a.txt", false);
//! record.set_status(RecordedStatus::Added);
//! meta::write_with_status(&meta::resource_meta_path(dir, "a.txt"), &record)?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SyncError};
use crate::utils;
use crate::xml::{self, XmlElement};
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::trace;

/// Name of the per-directory metadata subfolder
pub const META_DIRECTORY: &str = ".meta";
/// Prefix of every sidecar file name
pub const META_FILE_PREFIX: &str = "~";
/// Extension of every sidecar file name
pub const META_FILE_EXTENSION: &str = ".xml";
/// Root element of a record
pub const RESOURCE_ELEMENT: &str = "resource";

/// Resource name attribute
pub const ATTR_NAME: &str = "name";
/// Repository path attribute
pub const ATTR_PATH: &str = "path";
/// Collection flag attribute
pub const ATTR_IS_COLLECTION: &str = "isCollection";
/// One-shot status attribute
pub const ATTR_STATUS: &str = "status";
/// Content digest attribute
pub const ATTR_MD5: &str = "md5";
/// Conflict-suppression attribute
pub const ATTR_IGNORE_CONFLICTS: &str = "ignoreConflicts";
/// Registry URL attribute on the root record
pub const ATTR_REGISTRY_URL: &str = "registryUrl";
/// Attribute written by the old checkout format
pub const LEGACY_CHECKOUT_PATH: &str = "checkoutPath";

/// Status recorded in a sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordedStatus {
    /// No status attribute
    Unchanged,
    /// `status="added"`
    Added,
    /// `status="updated"`
    Updated,
    /// `status="deleted"`
    Deleted,
}

impl RecordedStatus {
    /// Attribute value, `None` for [`RecordedStatus::Unchanged`]
    pub fn as_attribute(&self) -> Option<&'static str> {
        match self {
            RecordedStatus::Unchanged => None,
            RecordedStatus::Added => Some("added"),
            RecordedStatus::Updated => Some("updated"),
            RecordedStatus::Deleted => Some("deleted"),
        }
    }
}

impl FromStr for RecordedStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" => Ok(RecordedStatus::Unchanged),
            "added" => Ok(RecordedStatus::Added),
            "updated" => Ok(RecordedStatus::Updated),
            "deleted" => Ok(RecordedStatus::Deleted),
            other => Err(format!("unknown status {:?}", other)),
        }
    }
}

impl fmt::Display for RecordedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_attribute().unwrap_or("unchanged"))
    }
}

impl From<crate::types::ChangeKind> for RecordedStatus {
    fn from(kind: crate::types::ChangeKind) -> Self {
        match kind {
            crate::types::ChangeKind::Added => RecordedStatus::Added,
            crate::types::ChangeKind::Updated => RecordedStatus::Updated,
            crate::types::ChangeKind::Deleted => RecordedStatus::Deleted,
        }
    }
}

/// One sidecar record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    element: XmlElement,
}

impl MetaRecord {
    /// Create a record with the attributes every node carries
    pub fn new(name: &str, path: &str, is_collection: bool) -> Self {
        let mut element = XmlElement::new(RESOURCE_ELEMENT);
        element.set_attribute(ATTR_NAME, name);
        element.set_attribute(ATTR_PATH, path);
        element.set_attribute(ATTR_IS_COLLECTION, is_collection.to_string());
        Self { element }
    }

    /// Wrap a parsed `<resource>` element
    ///
    /// # Errors
    ///
    /// - [`SyncError::Xml`] if the element is not a `<resource>`
    pub fn from_element(element: XmlElement) -> Result<Self> {
        if element.name != RESOURCE_ELEMENT {
            return Err(SyncError::xml(format!(
                "expected <{}> record, found <{}>",
                RESOURCE_ELEMENT, element.name
            )));
        }
        Ok(Self { element })
    }

    /// Underlying element
    pub fn element(&self) -> &XmlElement {
        &self.element
    }

    /// Consume the record into its element
    pub fn into_element(self) -> XmlElement {
        self.element
    }

    /// Resource name
    pub fn name(&self) -> Option<&str> {
        self.element.attribute(ATTR_NAME)
    }

    /// Normalize the resource name to the node's filesystem name
    pub fn set_name(&mut self, name: &str) {
        self.element.set_attribute(ATTR_NAME, name);
    }

    /// Repository path
    pub fn path(&self) -> Option<&str> {
        self.element.attribute(ATTR_PATH)
    }

    /// Whether the record describes a collection
    pub fn is_collection(&self) -> bool {
        self.element.attribute(ATTR_IS_COLLECTION) == Some("true")
    }

    /// Recorded status
    ///
    /// # Errors
    ///
    /// Returns a description of the value when it is not a known status.
    pub fn status(&self) -> std::result::Result<RecordedStatus, String> {
        self.element
            .attribute(ATTR_STATUS)
            .unwrap_or("")
            .parse()
    }

    /// Set or clear the status attribute
    pub fn set_status(&mut self, status: RecordedStatus) {
        match status.as_attribute() {
            Some(value) => self.element.set_attribute(ATTR_STATUS, value),
            None => {
                self.element.remove_attribute(ATTR_STATUS);
            }
        }
    }

    /// Digest recorded at the last synchronization
    pub fn digest(&self) -> Option<&str> {
        self.element.attribute(ATTR_MD5).filter(|d| !d.is_empty())
    }

    /// Record a new digest
    pub fn set_digest(&mut self, digest: &str) {
        self.element.set_attribute(ATTR_MD5, digest);
    }

    /// Conflict-suppression flag
    pub fn ignore_conflicts(&self) -> Option<bool> {
        self.element
            .attribute(ATTR_IGNORE_CONFLICTS)
            .map(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Set the conflict-suppression flag
    pub fn set_ignore_conflicts(&mut self, ignore: bool) {
        self.element.set_attribute(ATTR_IGNORE_CONFLICTS, ignore.to_string());
    }

    /// Registry URL recorded at checkout
    pub fn registry_url(&self) -> Option<&str> {
        self.element.attribute(ATTR_REGISTRY_URL).filter(|u| !u.is_empty())
    }

    /// Record the registry URL
    pub fn set_registry_url(&mut self, url: &str) {
        self.element.set_attribute(ATTR_REGISTRY_URL, url);
    }

    /// Whether the record was written by the old checkout format
    pub fn has_legacy_attributes(&self) -> bool {
        self.element.attribute(LEGACY_CHECKOUT_PATH).is_some()
    }

    /// Text of a child element such as `creator` or `mediaType`
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.element.child_text(name)
    }

    /// Regenerate the default attributes of a newly added node
    ///
    /// Creator and last updater become `author`, creation and modification
    /// times become `timestamp` in epoch milliseconds, `description` and
    /// `uuid` exist, and resources get a media type guessed from their name
    /// unless one is already recorded.
    pub fn apply_added_defaults(&mut self, author: &str, timestamp: DateTime<Utc>) {
        if !self.is_collection() && self.element.child("mediaType").is_none() {
            let media_type = utils::guess_media_type(self.name().unwrap_or_default());
            self.element.set_child_text("mediaType", media_type);
        }
        let millis = timestamp.timestamp_millis().to_string();
        self.element.set_child_text("creator", author);
        self.element.set_child_text("createdTime", millis.clone());
        self.element.set_child_text("lastUpdater", author);
        self.element.set_child_text("lastModified", millis);
        self.element.ensure_child("description");
        self.element.ensure_child("uuid");
    }
}

/// A resource record found in a `.meta` folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarEntry {
    /// Decoded resource name
    pub name: String,
    /// Path of the sidecar file
    pub meta_file: PathBuf,
}

/// Metadata subfolder of a directory
pub fn meta_dir(dir: &Path) -> PathBuf {
    dir.join(META_DIRECTORY)
}

/// Sidecar file of a directory's own record
pub fn directory_meta_path(dir: &Path) -> PathBuf {
    meta_dir(dir).join(format!("{}{}", META_FILE_PREFIX, META_FILE_EXTENSION))
}

/// Sidecar file of a child resource
pub fn resource_meta_path(dir: &Path, name: &str) -> PathBuf {
    meta_dir(dir).join(format!(
        "{}{}{}",
        META_FILE_PREFIX,
        utils::encode_resource_name(name),
        META_FILE_EXTENSION
    ))
}

/// Read a record
///
/// Returns `Ok(None)` when no sidecar exists, which is how untracked nodes
/// are told apart from tracked ones.
///
/// # Errors
///
/// - [`SyncError::Metadata`] if the sidecar exists but cannot be read
/// - [`SyncError::InvalidMetadata`] if it is not a well-formed record
pub fn read(meta_file: &Path) -> Result<Option<MetaRecord>> {
    let file = match File::open(meta_file) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SyncError::Metadata {
                meta_file: meta_file.to_path_buf(),
                source,
            })
        }
    };
    let element = xml::parse_element(BufReader::new(file))
        .map_err(|e| SyncError::invalid_metadata(meta_file, e.to_string()))?;
    let record = MetaRecord::from_element(element)
        .map_err(|e| SyncError::invalid_metadata(meta_file, e.to_string()))?;
    trace!("Read sidecar {:?}", meta_file);
    Ok(Some(record))
}

/// Persist a record with its transient status stripped
///
/// # Errors
///
/// - [`SyncError::Metadata`] if the sidecar cannot be written
pub fn write(meta_file: &Path, record: &MetaRecord) -> Result<()> {
    let mut synced = record.clone();
    synced.set_status(RecordedStatus::Unchanged);
    write_with_status(meta_file, &synced)
}

/// Persist a record exactly as given, status included
///
/// Used when marking nodes for the next check-in.
pub fn write_with_status(meta_file: &Path, record: &MetaRecord) -> Result<()> {
    let document = xml::to_document(record.element())?;
    let result = match meta_file.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
    .and_then(|_| utils::atomic_write(meta_file, &document));

    result.map_err(|source| SyncError::Metadata {
        meta_file: meta_file.to_path_buf(),
        source,
    })?;
    trace!("Wrote sidecar {:?}", meta_file);
    Ok(())
}

/// List the resource records of a directory, sorted by name
///
/// The directory's own record is not included. A directory without a
/// `.meta` folder has no entries.
///
/// # Errors
///
/// - [`SyncError::Metadata`] if the `.meta` folder cannot be listed
/// - [`SyncError::InvalidMetadata`] if a sidecar names something other
///   than a plain child of `dir`
pub fn list_resource_entries(dir: &Path) -> Result<Vec<SidecarEntry>> {
    let meta = meta_dir(dir);
    let read_dir = match fs::read_dir(&meta) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SyncError::Metadata {
                meta_file: meta,
                source,
            })
        }
    };

    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| SyncError::Metadata {
            meta_file: meta.clone(),
            source,
        })?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(encoded) = file_name
            .strip_prefix(META_FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(META_FILE_EXTENSION))
        else {
            continue;
        };
        if encoded.is_empty() {
            continue;
        }
        let name = utils::decode_resource_name(encoded);
        if !utils::is_plain_name(&name) {
            return Err(SyncError::invalid_metadata(
                entry.path(),
                format!("resource name {:?} is not a plain file name", name),
            ));
        }
        entries.push(SidecarEntry {
            name,
            meta_file: entry.path(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
