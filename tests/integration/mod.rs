//! Integration tests for complete check-in workflows
//!
//! Each test drives a working copy through several check-ins against a
//! directory repository, the way a user would between edits.

use ::regsync::*;
use regsync::meta;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::info;

/// Test harness pairing a working copy with a directory repository
pub struct WorkingCopyHarness {
    pub work_dir: TempDir,
    pub repo_dir: TempDir,
    pub repository: DirectoryRepository,
}

impl WorkingCopyHarness {
    /// Create a checked-out, empty working copy of `/ws`
    pub fn new() -> Self {
        let work_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        meta::write(
            &meta::directory_meta_path(work_dir.path()),
            &MetaRecord::new("ws", "/ws", true),
        )
        .unwrap();
        let repository = DirectoryRepository::new(repo_dir.path());

        Self {
            work_dir,
            repo_dir,
            repository,
        }
    }

    pub fn root(&self) -> &Path {
        self.work_dir.path()
    }

    /// Path of a node in the repository copy of `/ws`
    pub fn remote(&self, relative: &str) -> PathBuf {
        self.repo_dir.path().join("ws").join(relative)
    }

    /// Write a file and record it, and any untracked parent, as added
    pub fn add_file(&self, relative: &str, content: &[u8]) -> anyhow::Result<()> {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;

        let mut dir = self.root().to_path_buf();
        for component in Path::new(relative).components() {
            dir = dir.join(component);
            if dir == path || !meta::directory_meta_path(&dir).exists() {
                working_copy::mark_added(&dir, &SyncConfig::default())?;
                break;
            }
        }
        Ok(())
    }

    /// Run a check-in with default settings
    pub fn check_in(&mut self) -> anyhow::Result<CheckInReport> {
        let mut check_in = CheckInBuilder::new().username("tester").build(self.root())?;
        let report = check_in.execute(&mut self.repository)?;
        info!("Check-in sent {} changes", report.sent_count());
        Ok(report)
    }
}

impl Default for WorkingCopyHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn test_edit_cycle() {
    let mut harness = WorkingCopyHarness::new();

    harness.add_file("readme.md", b"# ws").unwrap();
    harness.add_file("src/main.rs", b"fn main() {}").unwrap();
    let report = harness.check_in().unwrap();
    assert!(report.changed());
    assert_eq!(fs::read(harness.remote("src/main.rs")).unwrap(), b"fn main() {}");

    // Plain edits are picked up by fingerprint
    fs::write(harness.root().join("src/main.rs"), b"fn main() { run() }").unwrap();
    let report = harness.check_in().unwrap();
    assert_eq!(report.stats.resources_updated, 1);
    assert_eq!(report.stats.changed_paths, vec!["/ws/src/main.rs"]);
    assert_eq!(fs::read(harness.remote("src/main.rs")).unwrap(), b"fn main() { run() }");

    // Removal from disk is sent once marked
    fs::remove_file(harness.root().join("readme.md")).unwrap();
    let pending = CheckInBuilder::new()
        .build(harness.root())
        .unwrap()
        .pending_changes()
        .unwrap();
    assert_eq!(pending.sent_count(), 0);

    let marked = working_copy::mark_missing_deleted(harness.root()).unwrap();
    assert_eq!(marked, vec![harness.root().join("readme.md")]);
    let report = harness.check_in().unwrap();
    assert_eq!(report.stats.resources_deleted, 1);
    assert!(!harness.remote("readme.md").exists());
    assert!(!meta::resource_meta_path(harness.root(), "readme.md").exists());

    // Nothing left
    let report = harness.check_in().unwrap();
    assert!(!report.changed());
    assert_eq!(harness.repository.restore_count(), 3);
}

#[test]
fn test_added_tree_keeps_structure() {
    let mut harness = WorkingCopyHarness::new();
    let docs = harness.root().join("docs");
    fs::create_dir_all(docs.join("guide/images")).unwrap();
    fs::write(docs.join("index.html"), b"<html/>").unwrap();
    fs::write(docs.join("guide/intro.md"), b"intro").unwrap();
    fs::write(docs.join("guide/images/logo.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();

    let marked = working_copy::mark_added(&docs, &SyncConfig::default()).unwrap();
    assert_eq!(marked.len(), 6);

    let report = harness.check_in().unwrap();
    assert_eq!(report.stats.resources_added, 6);
    assert_eq!(fs::read(harness.remote("docs/guide/images/logo.png")).unwrap(), [0x89, 0x50, 0x4e, 0x47]);
    assert_eq!(fs::read(harness.remote("docs/guide/intro.md")).unwrap(), b"intro");

    let record = meta::read(&meta::directory_meta_path(&docs.join("guide"))).unwrap().unwrap();
    assert_eq!(record.status().unwrap(), RecordedStatus::Unchanged);
    assert_eq!(record.child_text("creator").as_deref(), Some("tester"));
}

#[test]
fn test_unreachable_repository_then_retry() {
    let work_dir = TempDir::new().unwrap();
    let repo_parent = TempDir::new().unwrap();
    let repo_root = repo_parent.path().join("not-yet");
    meta::write(
        &meta::directory_meta_path(work_dir.path()),
        &MetaRecord::new("ws", "/ws", true),
    )
    .unwrap();
    fs::write(work_dir.path().join("a.txt"), b"alpha").unwrap();
    working_copy::mark_added(&work_dir.path().join("a.txt"), &SyncConfig::default()).unwrap();
    let sidecar = meta::resource_meta_path(work_dir.path(), "a.txt");
    let before = fs::read(&sidecar).unwrap();

    let mut repository = DirectoryRepository::new(&repo_root);
    let mut check_in = CheckInBuilder::new().build(work_dir.path()).unwrap();
    let err = check_in.execute(&mut repository).unwrap_err();
    assert!(matches!(err, SyncError::RepositoryUnreachable { .. }));
    assert!(err.is_recoverable());
    assert_eq!(fs::read(&sidecar).unwrap(), before);

    fs::create_dir_all(&repo_root).unwrap();
    let report = check_in.execute(&mut repository).unwrap();
    assert_eq!(report.stats.resources_added, 1);
    assert_eq!(fs::read(repo_root.join("ws/a.txt")).unwrap(), b"alpha");
}

#[test]
fn test_callback_sees_every_change() {
    let harness = WorkingCopyHarness::new();
    harness.add_file("a.txt", b"a").unwrap();
    harness.add_file("sub/b.txt", b"b").unwrap();

    let notices = Arc::new(Mutex::new(Vec::new()));
    let sink = notices.clone();
    let mut check_in = CheckInBuilder::new()
        .callback(Arc::new(move |notice: ChangeNotice| {
            sink.lock().unwrap().push((notice.repository_path, notice.kind));
        }))
        .build(harness.root())
        .unwrap();
    check_in.execute(&mut MemoryRepository::new()).unwrap();

    let notices = notices.lock().unwrap();
    assert_eq!(
        *notices,
        vec![
            ("/ws/a.txt".to_string(), ChangeKind::Added),
            ("/ws/sub".to_string(), ChangeKind::Added),
            ("/ws/sub/b.txt".to_string(), ChangeKind::Added),
        ]
    );
}

#[test]
fn test_cancelled_check_in_sends_nothing() {
    let harness = WorkingCopyHarness::new();
    harness.add_file("a.txt", b"a").unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    let mut check_in = CheckInBuilder::new()
        .cancel_flag(flag.clone())
        .build(harness.root())
        .unwrap();
    flag.store(true, Ordering::Relaxed);

    let mut repository = MemoryRepository::new();
    let result = check_in.execute(&mut repository);
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(check_in.sent_count(), None);
    assert!(repository.restores.is_empty());
}

#[test]
fn test_parallel_and_sequential_documents_match() {
    let harness = WorkingCopyHarness::new();
    for i in 0..20 {
        harness
            .add_file(&format!("dir_{}/file_{}.txt", i % 3, i), format!("content {}", i).as_bytes())
            .unwrap();
    }

    let mut documents = Vec::new();
    for parallel in [true, false] {
        let check_in = CheckInBuilder::new()
            .parallel_fingerprints(parallel)
            .build(harness.root())
            .unwrap();
        let (summary, document) = check_in.stage(Vec::new()).unwrap();
        assert_eq!(summary.sent_count(), 23);
        documents.push(changeset::parse_document(&document[..]).unwrap());
    }
    assert_eq!(
        documents[0].find("dir_1/file_4.txt").unwrap().content,
        documents[1].find("dir_1/file_4.txt").unwrap().content
    );
    assert_eq!(documents[0].change_count(), documents[1].change_count());
}

#[test]
fn test_dump_then_restore_archive() {
    let harness = WorkingCopyHarness::new();
    harness.add_file("a.txt", b"alpha").unwrap();

    let check_in = CheckInBuilder::new().build(harness.root()).unwrap();
    let archive = harness.repo_dir.path().join("dump.xml");
    let (_, file) = check_in.stage(fs::File::create(&archive).unwrap()).unwrap();
    drop(file);

    // Staging alone leaves the sidecar marked
    let record = meta::read(&meta::resource_meta_path(harness.root(), "a.txt")).unwrap().unwrap();
    assert_eq!(record.status().unwrap(), RecordedStatus::Added);

    let mut restore = CheckInBuilder::new()
        .build_from_archive(&archive, Some(harness.root().to_path_buf()))
        .unwrap();
    let mut repository = DirectoryRepository::new(harness.repo_dir.path());
    let report = restore.execute(&mut repository).unwrap();
    assert!(report.changed());
    assert_eq!(fs::read(harness.remote("a.txt")).unwrap(), b"alpha");
}

#[test]
fn test_ignored_directories_are_not_walked() {
    let harness = WorkingCopyHarness::new();
    harness.add_file("src/lib.rs", b"lib").unwrap();
    harness.add_file("target/out.bin", b"out").unwrap();

    let check_in = CheckInBuilder::new()
        .ignore_patterns(vec!["target".to_string()])
        .build(harness.root())
        .unwrap();
    let stats = check_in.pending_changes().unwrap();
    assert_eq!(stats.changed_paths, vec!["/ws/src", "/ws/src/lib.rs"]);
}
