//! # Record Store Contract
//!
//! The tree persists every node page and its own descriptor as opaque byte
//! blobs through a [`RecordStore`]. The store owns identity assignment: a
//! `create` returns the final [`RecordId`] for the blob, which is how
//! provisional identities get resolved during a flush.
//!
//! The engine only relies on four operations and one guarantee: `update` is
//! idempotent for unchanged bytes, so retrying a failed flush is safe once a
//! page has its final identity.
//!
//! [`MemoryRecordStore`] is the reference implementation used by the test
//! suites and benches. Real deployments plug in whatever backs their
//! clusters; the trait is object-safe and thread-safe by contract.

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::rid::RecordId;

/// Persistence contract consumed by the tree engine.
pub trait RecordStore: Send + Sync {
    /// Persist a new blob and assign its final identity.
    fn create(&self, payload: &[u8]) -> Result<RecordId>;

    /// Read a blob back. Fails with a NotFound-style error naming the RID
    /// when the record was never created or has been deleted.
    fn read(&self, rid: RecordId) -> Result<Vec<u8>>;

    /// Overwrite an existing blob, returning the bumped version.
    fn update(&self, rid: RecordId, payload: &[u8]) -> Result<u32>;

    /// Remove a blob.
    fn delete(&self, rid: RecordId) -> Result<()>;
}

struct StoredRecord {
    version: u32,
    payload: Vec<u8>,
}

struct StoreState {
    records: HashMap<i64, StoredRecord>,
    next_position: i64,
}

/// In-memory [`RecordStore`] with a single cluster.
///
/// Positions are assigned monotonically from 0. The write-operation counter
/// exists for tests that assert flush idempotence.
pub struct MemoryRecordStore {
    cluster_id: i32,
    state: Mutex<StoreState>,
    write_ops: AtomicU64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_cluster(1)
    }

    pub fn with_cluster(cluster_id: i32) -> Self {
        Self {
            cluster_id,
            state: Mutex::new(StoreState {
                records: HashMap::new(),
                next_position: 0,
            }),
            write_ops: AtomicU64::new(0),
        }
    }

    pub fn cluster_id(&self) -> i32 {
        self.cluster_id
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total create + update + delete calls since construction.
    pub fn write_ops(&self) -> u64 {
        self.write_ops.load(Ordering::Relaxed)
    }

    /// Identities of every live record, in no particular order.
    pub fn rids(&self) -> Vec<RecordId> {
        self.state
            .lock()
            .records
            .keys()
            .map(|position| RecordId::new(self.cluster_id, *position))
            .collect()
    }

    fn check_rid(&self, rid: RecordId) -> Result<()> {
        if !rid.is_persistent() {
            bail!("record id {} is not a persistent identity", rid);
        }
        if rid.cluster_id != self.cluster_id {
            bail!(
                "record id {} addresses cluster {} but this store owns cluster {}",
                rid,
                rid.cluster_id,
                self.cluster_id
            );
        }
        Ok(())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn create(&self, payload: &[u8]) -> Result<RecordId> {
        let mut state = self.state.lock();
        let position = state.next_position;
        state.next_position += 1;
        state.records.insert(
            position,
            StoredRecord {
                version: 0,
                payload: payload.to_vec(),
            },
        );
        self.write_ops.fetch_add(1, Ordering::Relaxed);
        Ok(RecordId::new(self.cluster_id, position))
    }

    fn read(&self, rid: RecordId) -> Result<Vec<u8>> {
        self.check_rid(rid)?;
        let state = self.state.lock();
        match state.records.get(&rid.cluster_position) {
            Some(record) => Ok(record.payload.clone()),
            None => bail!("record {} not found", rid),
        }
    }

    fn update(&self, rid: RecordId, payload: &[u8]) -> Result<u32> {
        self.check_rid(rid)?;
        let mut state = self.state.lock();
        let record = match state.records.get_mut(&rid.cluster_position) {
            Some(record) => record,
            None => bail!("record {} not found", rid),
        };
        record.version += 1;
        record.payload = payload.to_vec();
        self.write_ops.fetch_add(1, Ordering::Relaxed);
        Ok(record.version)
    }

    fn delete(&self, rid: RecordId) -> Result<()> {
        self.check_rid(rid)?;
        let mut state = self.state.lock();
        if state.records.remove(&rid.cluster_position).is_none() {
            bail!("record {} not found", rid);
        }
        self.write_ops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_monotonic_positions() {
        let store = MemoryRecordStore::new();
        let a = store.create(b"a").unwrap();
        let b = store.create(b"b").unwrap();
        assert_eq!(a.cluster_position, 0);
        assert_eq!(b.cluster_position, 1);
        assert!(a.is_persistent());
    }

    #[test]
    fn read_returns_created_payload() {
        let store = MemoryRecordStore::new();
        let rid = store.create(b"payload").unwrap();
        assert_eq!(store.read(rid).unwrap(), b"payload");
    }

    #[test]
    fn update_bumps_version() {
        let store = MemoryRecordStore::new();
        let rid = store.create(b"v0").unwrap();
        assert_eq!(store.update(rid, b"v1").unwrap(), 1);
        assert_eq!(store.update(rid, b"v2").unwrap(), 2);
        assert_eq!(store.read(rid).unwrap(), b"v2");
    }

    #[test]
    fn read_after_delete_reports_not_found() {
        let store = MemoryRecordStore::new();
        let rid = store.create(b"gone").unwrap();
        store.delete(rid).unwrap();
        let err = store.read(rid).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn provisional_rid_is_rejected() {
        let store = MemoryRecordStore::new();
        let err = store.read(RecordId::provisional(-2)).unwrap_err();
        assert!(err.to_string().contains("not a persistent identity"));
    }

    #[test]
    fn wrong_cluster_is_rejected() {
        let store = MemoryRecordStore::with_cluster(7);
        let err = store.read(RecordId::new(8, 0)).unwrap_err();
        assert!(err.to_string().contains("cluster"));
    }

    #[test]
    fn write_ops_counts_mutations_only() {
        let store = MemoryRecordStore::new();
        let rid = store.create(b"x").unwrap();
        store.read(rid).unwrap();
        store.update(rid, b"y").unwrap();
        store.delete(rid).unwrap();
        assert_eq!(store.write_ops(), 3);
    }
}
