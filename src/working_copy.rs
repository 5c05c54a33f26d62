//! Marking working copy changes
//!
//! Check-in only sends what sidecar records announce or what fingerprints
//! reveal. New files and folders have no records yet, and deleted files
//! leave records that still say nothing. These helpers write the status
//! markers a user would otherwise add by hand:
//!
//! - [`mark_added`] records an untracked file or directory tree as `added`.
//! - [`mark_missing_deleted`] flags records whose file is gone as `deleted`.

use crate::conflict;
use crate::error::{Result, SyncError};
use crate::meta::{self, MetaRecord, RecordedStatus, META_DIRECTORY};
use crate::reconcile::build_ignore_set;
use crate::types::SyncConfig;
use crate::utils;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Record an untracked file or directory tree as added
///
/// The repository path of every new record derives from the nearest parent
/// directory record. Nodes that already have a record are left alone, as
/// are `.meta` folders, conflict markers and directories matching the
/// configured ignore patterns.
///
/// # Returns
///
/// The local paths that received a new record.
///
/// # Errors
///
/// - [`SyncError::NotUnderControl`] if the parent directory is not tracked
/// - [`SyncError::Metadata`] if a record cannot be written
pub fn mark_added(path: &Path, config: &SyncConfig) -> Result<Vec<PathBuf>> {
    let metadata = std::fs::metadata(path)?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let parent_record = meta::read(&meta::directory_meta_path(&parent))?
        .ok_or_else(|| SyncError::NotUnderControl(path.to_path_buf()))?;
    let parent_path = parent_record
        .path()
        .ok_or_else(|| SyncError::NotUnderControl(path.to_path_buf()))?
        .to_string();
    let name = file_name(path)?;
    let registry_path = utils::join_registry_path(&parent_path, &name);

    let mut marked = Vec::new();
    if !metadata.is_dir() {
        if add_record(&parent, &name, &registry_path, false)? {
            marked.push(path.to_path_buf());
        }
        info!("Marked {} node(s) as added", marked.len());
        return Ok(marked);
    }

    let ignore = build_ignore_set(&config.ignore_patterns)?;
    let walker = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0
                || (name != META_DIRECTORY
                    && !conflict::is_conflict_marker(&name)
                    && !(e.file_type().is_dir() && ignore.is_match(&*name)))
        });

    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(path)
            .map_err(|e| SyncError::internal(e.to_string()))?;
        let mut node_path = registry_path.clone();
        for component in relative.components() {
            node_path = utils::join_registry_path(&node_path, &component.as_os_str().to_string_lossy());
        }

        let added = if entry.file_type().is_dir() {
            add_directory_record(entry.path(), &node_path)?
        } else if entry.file_type().is_file() {
            let dir = entry.path().parent().unwrap_or(path);
            add_record(dir, &file_name(entry.path())?, &node_path, false)?
        } else {
            false
        };
        if added {
            marked.push(entry.path().to_path_buf());
        }
    }

    info!("Marked {} node(s) as added", marked.len());
    Ok(marked)
}

/// Flag every resource record whose file no longer exists as deleted
///
/// Walks `root` and its subdirectories. Records already marked deleted are
/// left as they are.
///
/// # Returns
///
/// The local paths that were flagged.
pub fn mark_missing_deleted(root: &Path) -> Result<Vec<PathBuf>> {
    let mut marked = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != META_DIRECTORY);

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path();
        for sidecar in meta::list_resource_entries(dir)? {
            let local_path = dir.join(&sidecar.name);
            match std::fs::symlink_metadata(&local_path) {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            let Some(mut record) = meta::read(&sidecar.meta_file)? else {
                continue;
            };
            if record.status() == Ok(RecordedStatus::Deleted) {
                continue;
            }
            record.set_status(RecordedStatus::Deleted);
            meta::write_with_status(&sidecar.meta_file, &record)?;
            debug!("Marked {:?} as deleted", local_path);
            marked.push(local_path);
        }
    }

    info!("Marked {} missing resource(s) as deleted", marked.len());
    Ok(marked)
}

fn add_record(dir: &Path, name: &str, registry_path: &str, is_collection: bool) -> Result<bool> {
    let meta_file = meta::resource_meta_path(dir, name);
    if meta_file.exists() {
        return Ok(false);
    }
    let mut record = MetaRecord::new(name, registry_path, is_collection);
    record.set_status(RecordedStatus::Added);
    meta::write_with_status(&meta_file, &record)?;
    debug!("Marked {} as added", registry_path);
    Ok(true)
}

fn add_directory_record(dir: &Path, registry_path: &str) -> Result<bool> {
    let meta_file = meta::directory_meta_path(dir);
    if meta_file.exists() {
        return Ok(false);
    }
    let mut record = MetaRecord::new(&utils::resource_name(registry_path), registry_path, true);
    record.set_status(RecordedStatus::Added);
    meta::write_with_status(&meta_file, &record)?;
    debug!("Marked {} as added", registry_path);
    Ok(true)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::InvalidConfiguration(format!("{:?} has no file name", path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn checkout(root: &Path) {
        let record = MetaRecord::new("ws", "/_system/ws", true);
        meta::write(&meta::directory_meta_path(root), &record).unwrap();
    }

    #[test]
    fn test_mark_added_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        checkout(root);
        fs::write(root.join("a.txt"), b"a").unwrap();

        let marked = mark_added(&root.join("a.txt"), &SyncConfig::default()).unwrap();
        assert_eq!(marked, vec![root.join("a.txt")]);

        let record = meta::read(&meta::resource_meta_path(root, "a.txt")).unwrap().unwrap();
        assert_eq!(record.status().unwrap(), RecordedStatus::Added);
        assert_eq!(record.path(), Some("/_system/ws/a.txt"));

        let again = mark_added(&root.join("a.txt"), &SyncConfig::default()).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_mark_added_tree() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        checkout(root);
        fs::create_dir_all(root.join("docs/img")).unwrap();
        fs::create_dir_all(root.join("docs/target")).unwrap();
        fs::write(root.join("docs/readme.md"), b"r").unwrap();
        fs::write(root.join("docs/img/logo.png"), b"p").unwrap();
        fs::write(root.join("docs/readme.md.mine"), b"m").unwrap();
        fs::write(root.join("docs/target/out.bin"), b"o").unwrap();

        let config = SyncConfig {
            ignore_patterns: vec!["target".to_string()],
            ..Default::default()
        };
        let marked = mark_added(&root.join("docs"), &config).unwrap();
        assert_eq!(marked.len(), 4);

        let img = meta::read(&meta::directory_meta_path(&root.join("docs/img"))).unwrap().unwrap();
        assert_eq!(img.path(), Some("/_system/ws/docs/img"));
        assert!(img.is_collection());
        let logo = meta::read(&meta::resource_meta_path(&root.join("docs/img"), "logo.png"))
            .unwrap()
            .unwrap();
        assert_eq!(logo.path(), Some("/_system/ws/docs/img/logo.png"));
        assert!(!meta::resource_meta_path(&root.join("docs"), "readme.md.mine").exists());
        assert!(!meta::directory_meta_path(&root.join("docs/target")).exists());
    }

    #[test]
    fn test_mark_added_requires_tracked_parent() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();
        let result = mark_added(&temp_dir.path().join("a.txt"), &SyncConfig::default());
        assert!(matches!(result, Err(SyncError::NotUnderControl(_))));
    }

    #[test]
    fn test_mark_missing_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        checkout(root);
        fs::create_dir_all(root.join("sub")).unwrap();
        for (dir, name) in [(root.to_path_buf(), "kept.txt"), (root.join("sub"), "gone.txt")] {
            fs::write(dir.join(name), b"x").unwrap();
            meta::write(&meta::resource_meta_path(&dir, name), &MetaRecord::new(name, "/x", false)).unwrap();
        }
        fs::remove_file(root.join("sub/gone.txt")).unwrap();

        let marked = mark_missing_deleted(root).unwrap();
        assert_eq!(marked, vec![root.join("sub/gone.txt")]);
        let record = meta::read(&meta::resource_meta_path(&root.join("sub"), "gone.txt"))
            .unwrap()
            .unwrap();
        assert_eq!(record.status().unwrap(), RecordedStatus::Deleted);
        assert!(mark_missing_deleted(root).unwrap().is_empty());
    }
}
