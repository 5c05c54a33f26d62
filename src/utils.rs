//! Utility functions for regsync
//!
//! This module provides small helpers used throughout the library: repository
//! path manipulation, sidecar file-name encoding, media type guessing and
//! filesystem operations with the write/removal guarantees the engine needs.
//!
//! ## Categories of Utilities
//!
//! ### Repository Paths
//! - Last-segment resource names
//! - Joining collection paths with child names
//! - Mapping repository paths onto relative filesystem paths
//!
//! ### Sidecar Names
//! - Form-URL encoding of resource names used in `.meta` file names
//!
//! ### File Operations
//! - Atomic file writing
//! - Best-effort removal of files and directory trees
//! - Byte formatting (human-readable sizes)
//!
//! ## Example Usage
//!
//! ```rust
//! use regsync::utils::{join_registry_path, resource_name};
//!
//! let path = join_registry_path("/_system/ws", "a.txt");
//! assert_eq!(path, "/_system/ws/a.txt");
//! assert_eq!(resource_name(&path), "a.txt");
//! ```

use crate::error::{Result, SyncError};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Separator of repository paths
pub const PATH_SEPARATOR: char = '/';

/// Media type recorded when the extension tells nothing
pub const UNKNOWN_MEDIA_TYPE: &str = "unknown";

/// Last segment of a repository path
///
/// The root path `/` is its own name.
///
/// # Example
///
/// ```rust
/// # use regsync::utils::resource_name;
/// assert_eq!(resource_name("/_system/ws/"), "ws");
/// assert_eq!(resource_name("/"), "/");
/// ```
pub fn resource_name(path: &str) -> String {
    let trimmed = path.trim_end_matches(PATH_SEPARATOR);
    if trimmed.is_empty() {
        return PATH_SEPARATOR.to_string();
    }
    match trimmed.rfind(PATH_SEPARATOR) {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Append a child name to a collection path
pub fn join_registry_path(parent: &str, name: &str) -> String {
    if parent.ends_with(PATH_SEPARATOR) {
        format!("{}{}", parent, name)
    } else {
        format!("{}{}{}", parent, PATH_SEPARATOR, name)
    }
}

/// Map a repository path onto a path relative to a local root
///
/// # Errors
///
/// - [`SyncError::InvalidTarget`] if a segment would escape the root
pub fn registry_path_to_relative(path: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for segment in path.split(PATH_SEPARATOR).filter(|s| !s.is_empty() && *s != ".") {
        if !is_plain_name(segment) {
            return Err(SyncError::InvalidTarget(format!(
                "invalid repository path segment {:?} in {}",
                segment, path
            )));
        }
        relative.push(segment);
    }
    Ok(relative)
}

/// Whether a node name maps onto exactly one normal path component
///
/// Rejects empty names, `.`, `..` and anything holding a separator, so
/// joining the name onto a directory never leaves that directory.
///
/// # Example
///
/// ```rust
/// # use regsync::utils::is_plain_name;
/// assert!(is_plain_name("a.txt"));
/// assert!(!is_plain_name(".."));
/// assert!(!is_plain_name("../a.txt"));
/// ```
pub fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(component)), None) if component == name
    )
}

/// Encode a resource name for use inside a sidecar file name
///
/// Uses form-URL encoding, so spaces become `+`.
pub fn encode_resource_name(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes()).collect()
}

/// Decode a resource name taken from a sidecar file name
///
/// Hand-written sidecars may hold a raw `=` or `&`, which are kept as is.
pub fn decode_resource_name(encoded: &str) -> String {
    url::form_urlencoded::parse(encoded.as_bytes())
        .map(|(key, value)| {
            if value.is_empty() {
                key.into_owned()
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Guess a media type from a resource's extension
///
/// The guess is the extension itself, lower-cased, which the repository
/// resolves through its own media type table. Names without an extension
/// get [`UNKNOWN_MEDIA_TYPE`].
pub fn guess_media_type(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => name[idx + 1..].to_ascii_lowercase(),
        _ => UNKNOWN_MEDIA_TYPE.to_string(),
    }
}

/// Format bytes as human-readable string
///
/// # Example
///
/// ```rust
/// # use regsync::utils::format_bytes;
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file is created next to the target, so the rename never
/// crosses a filesystem boundary.
///
/// # Arguments
///
/// * `path` - Destination file
/// * `content` - Bytes to write
///
/// # Errors
///
/// Returns the underlying I/O error if the temporary file cannot be written
/// or renamed into place.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;
    trace!("Atomically wrote {:?}", path);
    Ok(())
}

/// Remove a file or a whole directory tree
///
/// Returns `Ok(false)` when nothing was there to remove.
pub fn remove_path(path: &Path) -> io::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    trace!("Removed {:?}", path);
    Ok(true)
}
