//! Property-based testing for regsync
//!
//! Uses proptest to verify check-in invariants across randomly generated
//! working copies.

use ::regsync::*;
use proptest::prelude::*;
use regsync::fingerprint::fingerprint_bytes;
use regsync::meta;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// How a generated resource looks relative to its last sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Added,
    Updated,
    Deleted,
    Synced,
    Edited,
}

impl ResourceState {
    fn is_sent(&self) -> bool {
        *self != ResourceState::Synced
    }
}

fn state_strategy() -> impl Strategy<Value = ResourceState> {
    prop_oneof![
        Just(ResourceState::Added),
        Just(ResourceState::Updated),
        Just(ResourceState::Deleted),
        Just(ResourceState::Synced),
        Just(ResourceState::Edited),
    ]
}

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Resource names mapped to their content and state
fn working_copy_strategy() -> impl Strategy<Value = BTreeMap<String, (Vec<u8>, ResourceState)>> {
    prop::collection::btree_map("[a-z]{1,8}(\\.[a-z]{1,3})?", (content_strategy(), state_strategy()), 1..12)
}

fn lay_out(root: &Path, resources: &BTreeMap<String, (Vec<u8>, ResourceState)>) {
    meta::write(&meta::directory_meta_path(root), &MetaRecord::new("ws", "/ws", true)).unwrap();
    for (name, (content, state)) in resources {
        fs::write(root.join(name), content).unwrap();
        let mut record = MetaRecord::new(name, &format!("/ws/{}", name), false);
        let synced_digest = match state {
            ResourceState::Edited => {
                let mut previous = content.clone();
                previous.push(0);
                fingerprint_bytes(&previous)
            }
            _ => fingerprint_bytes(content),
        };
        match state {
            ResourceState::Added => record.set_status(RecordedStatus::Added),
            ResourceState::Updated => {
                record.set_digest(&synced_digest);
                record.set_status(RecordedStatus::Updated);
            }
            ResourceState::Deleted => {
                record.set_digest(&synced_digest);
                record.set_status(RecordedStatus::Deleted);
            }
            ResourceState::Synced | ResourceState::Edited => record.set_digest(&synced_digest),
        }
        meta::write_with_status(&meta::resource_meta_path(root, name), &record).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_sent_count_matches_marked_and_edited(resources in working_copy_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        lay_out(temp_dir.path(), &resources);
        let expected = resources.values().filter(|(_, state)| state.is_sent()).count();

        let mut check_in = CheckInBuilder::new().build(temp_dir.path()).unwrap();
        let mut repository = MemoryRepository::new();
        let report = check_in.execute(&mut repository).unwrap();

        prop_assert_eq!(check_in.sent_count(), Some(expected));
        prop_assert_eq!(report.changed(), expected > 0);
        if expected > 0 {
            let document = repository.last().unwrap().parse().unwrap();
            prop_assert_eq!(document.change_count(), expected);
        }
    }

    #[test]
    fn prop_second_check_in_is_empty(resources in working_copy_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        lay_out(temp_dir.path(), &resources);

        let mut repository = MemoryRepository::new();
        CheckInBuilder::new().build(temp_dir.path()).unwrap().execute(&mut repository).unwrap();

        let mut again = CheckInBuilder::new().build(temp_dir.path()).unwrap();
        let report = again.execute(&mut repository).unwrap();
        prop_assert!(!report.changed());
        prop_assert_eq!(again.sent_count(), Some(0));

        for (name, (_, state)) in &resources {
            prop_assert_eq!(temp_dir.path().join(name).exists(), *state != ResourceState::Deleted);
        }
    }

    #[test]
    fn prop_untracked_trees_send_nothing(resources in working_copy_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        for (name, (content, _)) in &resources {
            fs::write(temp_dir.path().join(name), content).unwrap();
        }

        let check_in = CheckInBuilder::new().target("/ws").build(temp_dir.path()).unwrap();
        let stats = check_in.pending_changes().unwrap();
        prop_assert_eq!(stats.sent_count(), 0);
        prop_assert_eq!(stats.bytes_sent, 0);
    }

    #[test]
    fn prop_embedded_content_is_exact(content in content_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let mut resources = BTreeMap::new();
        resources.insert("data.bin".to_string(), (content.clone(), ResourceState::Added));
        lay_out(temp_dir.path(), &resources);

        let check_in = CheckInBuilder::new().build(temp_dir.path()).unwrap();
        let (summary, document) = check_in.stage(Vec::new()).unwrap();
        let parsed = changeset::parse_document(&document[..]).unwrap();

        prop_assert_eq!(summary.stats.bytes_sent, content.len() as u64);
        prop_assert_eq!(parsed.find("data.bin").unwrap().content.as_deref(), Some(&content[..]));
    }
}
