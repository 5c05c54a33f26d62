//! Main test module for regsync
//!
//! This module includes all test suites:
//! - Integration tests for complete check-in workflows
//! - Property-based tests for invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::regsync::*;
    use regsync::meta;
    use std::fs;
    use tempfile::TempDir;

    fn checkout(root: &std::path::Path) {
        meta::write(&meta::directory_meta_path(root), &MetaRecord::new("ws", "/ws", true)).unwrap();
    }

    #[test]
    fn test_empty_working_copy() {
        let temp_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        checkout(temp_dir.path());

        let mut check_in = CheckInBuilder::new().build(temp_dir.path()).unwrap();
        let report = check_in
            .execute(&mut DirectoryRepository::new(repo_dir.path()))
            .unwrap();

        assert!(!report.changed());
        assert_eq!(check_in.sent_count(), Some(0));
        assert!(!repo_dir.path().join("ws").exists());
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        checkout(temp_dir.path());

        let special_names = vec![
            "file with spaces.txt",
            "file+with+plus.txt",
            "file%with%percent.txt",
            "file&with=query.txt",
            "file(with)parens.txt",
            "file[with]brackets.txt",
        ];

        let mut created = Vec::new();
        for name in &special_names {
            let path = temp_dir.path().join(name);
            if fs::write(&path, format!("Content of {}", name)).is_err() {
                // Skip if OS doesn't support this filename
                continue;
            }
            working_copy::mark_added(&path, &SyncConfig::default()).unwrap();
            created.push(*name);
        }

        let mut check_in = CheckInBuilder::new().build(temp_dir.path()).unwrap();
        let report = check_in
            .execute(&mut DirectoryRepository::new(repo_dir.path()))
            .unwrap();
        assert_eq!(report.sent_count(), created.len());

        for name in &created {
            let content = fs::read_to_string(repo_dir.path().join("ws").join(name)).unwrap();
            assert_eq!(content, format!("Content of {}", name));
        }
        assert!(temp_dir.path().join(".meta/~file+with+spaces.txt.xml").exists());
    }

    #[test]
    fn test_unicode_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        checkout(temp_dir.path());

        let unicode_names = vec!["файл.txt", "文件.txt", "ファイル.txt", "αρχείο.txt"];
        let mut created = Vec::new();
        for name in &unicode_names {
            let path = temp_dir.path().join(name);
            match fs::write(&path, format!("Unicode content: {}", name)) {
                Ok(_) => created.push(*name),
                Err(_) => continue,
            }
            working_copy::mark_added(&path, &SyncConfig::default()).unwrap();
        }

        if created.is_empty() {
            // No unicode support on this system
            return;
        }

        let mut check_in = CheckInBuilder::new().build(temp_dir.path()).unwrap();
        check_in
            .execute(&mut DirectoryRepository::new(repo_dir.path()))
            .unwrap();

        for name in &created {
            let content = fs::read_to_string(repo_dir.path().join("ws").join(name)).unwrap();
            assert_eq!(content, format!("Unicode content: {}", name));
        }

        // Nothing left to send
        let pending = CheckInBuilder::new()
            .build(temp_dir.path())
            .unwrap()
            .pending_changes()
            .unwrap();
        assert_eq!(pending.sent_count(), 0);
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        checkout(temp_dir.path());
        fs::write(temp_dir.path().join("empty.txt"), b"").unwrap();
        working_copy::mark_added(&temp_dir.path().join("empty.txt"), &SyncConfig::default()).unwrap();

        let mut check_in = CheckInBuilder::new().build(temp_dir.path()).unwrap();
        check_in
            .execute(&mut DirectoryRepository::new(repo_dir.path()))
            .unwrap();

        let restored = repo_dir.path().join("ws/empty.txt");
        assert!(restored.exists());
        assert_eq!(fs::read(restored).unwrap().len(), 0);
    }

    #[test]
    fn test_unknown_status_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        checkout(temp_dir.path());
        fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();
        let sidecar = meta::resource_meta_path(temp_dir.path(), "a.txt");
        fs::write(
            &sidecar,
            r#"<?xml version="1.0" encoding="UTF-8"?><resource name="a.txt" path="/ws/a.txt" isCollection="false" status="renamed"/>"#,
        )
        .unwrap();

        let mut check_in = CheckInBuilder::new().build(temp_dir.path()).unwrap();
        let result = check_in.execute(&mut MemoryRepository::new());
        assert!(matches!(result, Err(SyncError::InvalidMetadata { .. })));
    }

    #[test]
    fn test_missing_content_for_added_resource() {
        let temp_dir = TempDir::new().unwrap();
        checkout(temp_dir.path());
        fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();
        working_copy::mark_added(&temp_dir.path().join("a.txt"), &SyncConfig::default()).unwrap();
        fs::remove_file(temp_dir.path().join("a.txt")).unwrap();

        let mut check_in = CheckInBuilder::new().build(temp_dir.path()).unwrap();
        let mut repository = MemoryRepository::new();
        let result = check_in.execute(&mut repository);
        assert!(matches!(result, Err(SyncError::MissingContent(_))));
        assert!(repository.restores.is_empty());
    }
}
