//! # Index Facade Integration
//!
//! The three flavors end to end against one record store: posting-list
//! semantics, the unique constraint as a recoverable error, full-text token
//! lookups, and reopening an index from its descriptor.

use std::sync::Arc;

use marbletree::{
    is_duplicate_key, IndexKind, MemoryRecordStore, PropertyIndex, RecordId, TreeConfig,
};

fn small_config() -> TreeConfig {
    TreeConfig {
        node_page_size: 4,
        entry_points_size: 8,
        optimize_threshold: 0,
        runtime_checks: true,
        ..TreeConfig::default()
    }
}

fn open_index(store: &Arc<MemoryRecordStore>, kind: IndexKind, name: &str) -> PropertyIndex {
    let mut index = PropertyIndex::new(kind, name);
    index.configure(store.clone(), small_config()).unwrap();
    index.open(None).unwrap();
    index
}

#[test]
fn non_unique_keeps_insertion_order_and_removes_whole_slot() {
    let store = Arc::new(MemoryRecordStore::new());
    let index = open_index(&store, IndexKind::NotUnique, "by-tag");

    index.put("x", RecordId::new(10, 1)).unwrap();
    index.put("x", RecordId::new(10, 2)).unwrap();

    assert_eq!(
        index.get("x").unwrap().as_slice(),
        &[RecordId::new(10, 1), RecordId::new(10, 2)]
    );

    // Removing without a RID drops the whole slot.
    assert!(index.remove("x", None).unwrap());
    assert!(index.get("x").unwrap().is_empty());
    assert_eq!(index.size().unwrap(), 0);
}

#[test]
fn unique_violation_is_recoverable() {
    let store = Arc::new(MemoryRecordStore::new());
    let index = open_index(&store, IndexKind::Unique, "by-email");

    index.put("a@example.com", RecordId::new(10, 1)).unwrap();
    let err = index.put("a@example.com", RecordId::new(10, 2)).unwrap_err();
    assert!(is_duplicate_key(&err));

    // The index keeps working after the rejected put.
    index.put("b@example.com", RecordId::new(10, 2)).unwrap();
    assert_eq!(
        index.get_unique("a@example.com").unwrap(),
        Some(RecordId::new(10, 1))
    );
    assert_eq!(
        index.get_unique("b@example.com").unwrap(),
        Some(RecordId::new(10, 2))
    );
    assert_eq!(index.size().unwrap(), 2);
}

#[test]
fn full_text_tokens_accumulate_postings() {
    let store = Arc::new(MemoryRecordStore::new());
    let index = open_index(&store, IndexKind::FullText, "content");

    // Tokenization is the caller's concern; the facade sees tokens.
    let documents = [
        (RecordId::new(12, 1), "the quick brown fox"),
        (RecordId::new(12, 2), "the lazy dog"),
        (RecordId::new(12, 3), "quick quick slow"),
    ];
    for (rid, text) in documents {
        for token in text.split_whitespace() {
            index.put(token, rid).unwrap();
        }
    }

    assert_eq!(
        index.get("quick").unwrap().as_slice(),
        &[RecordId::new(12, 1), RecordId::new(12, 3)]
    );
    assert_eq!(index.get("the").unwrap().len(), 2);
    assert_eq!(index.get("dog").unwrap().as_slice(), &[RecordId::new(12, 2)]);
    assert!(index.get("cat").unwrap().is_empty());

    // Un-indexing one document's token.
    assert!(index.remove("quick", Some(RecordId::new(12, 3))).unwrap());
    assert_eq!(
        index.get("quick").unwrap().as_slice(),
        &[RecordId::new(12, 1)]
    );
}

#[test]
fn index_survives_flush_and_reopen() {
    let store = Arc::new(MemoryRecordStore::new());
    let descriptor_rid = {
        let index = open_index(&store, IndexKind::NotUnique, "persisted");
        for position in 0..50 {
            index
                .put(&format!("key{:03}", position % 10), RecordId::new(10, position))
                .unwrap();
        }
        index.flush().unwrap();
        index.descriptor_rid().unwrap().unwrap()
    };

    let mut index = PropertyIndex::new(IndexKind::NotUnique, "persisted");
    index.configure(store.clone(), small_config()).unwrap();
    index.open(Some(descriptor_rid)).unwrap();

    for bucket in 0..10 {
        let list = index.get(&format!("key{:03}", bucket)).unwrap();
        assert_eq!(list.len(), 5, "bucket {}", bucket);
        // Insertion order within the posting list survives persistence.
        let positions: Vec<i64> = list.iter().map(|rid| rid.cluster_position).collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }
    assert_eq!(index.size().unwrap(), 10);

    let keys = index.keys().unwrap();
    assert_eq!(keys.len(), 10);
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
}
