//! # Record Identity
//!
//! Every persistent object in the engine — tree nodes and the tree descriptor
//! itself — is a byte blob in the record store, addressed by a [`RecordId`]:
//! a `(cluster_id, cluster_position)` pair.
//!
//! Three identity states matter to the tree:
//!
//! - **Invalid** (`cluster_id == -1`): "no such record". Used for absent
//!   parent/child links.
//! - **Provisional** (`cluster_position < -1`): the node exists in memory but
//!   has never been written; the record store assigns the final position on
//!   first create. Provisional identities are handed out by the tree from a
//!   descending counter starting at -2 and must never reach disk.
//! - **Final** (`cluster_position >= 0`): assigned by the record store.
//!
//! ## Wire Form
//!
//! The 10-byte tight encoding is shared with the legacy on-disk format:
//! 4 bytes of big-endian `cluster_id` followed by the low 6 bytes of the
//! big-endian `cluster_position`. Decoding sign-extends the 48-bit position so
//! the invalid sentinel (-1) round-trips.

use eyre::{ensure, Result};
use smallvec::SmallVec;
use std::fmt;

/// Size of the tight wire encoding.
pub const RID_SIZE: usize = 10;

/// List of record identities, inline up to two entries.
///
/// Non-unique and full-text index slots hold one of these; the common case is
/// a single posting.
pub type RidList = SmallVec<[RecordId; 2]>;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    pub cluster_id: i32,
    pub cluster_position: i64,
}

impl RecordId {
    /// The "no record" sentinel used for absent links.
    pub const INVALID: RecordId = RecordId {
        cluster_id: -1,
        cluster_position: -1,
    };

    pub fn new(cluster_id: i32, cluster_position: i64) -> Self {
        Self {
            cluster_id,
            cluster_position,
        }
    }

    /// A not-yet-persisted identity. `position` must be < -1.
    pub fn provisional(position: i64) -> Self {
        debug_assert!(position < -1, "provisional position must be < -1");
        Self {
            cluster_id: -2,
            cluster_position: position,
        }
    }

    /// Whether this identity names a record at all (provisional counts).
    pub fn is_valid(&self) -> bool {
        self.cluster_id != -1
    }

    /// Whether the record store has yet to assign the final position.
    pub fn is_provisional(&self) -> bool {
        self.cluster_position < -1
    }

    /// Valid and already assigned by the record store.
    pub fn is_persistent(&self) -> bool {
        self.is_valid() && self.cluster_position >= 0
    }

    pub fn to_bytes(&self) -> [u8; RID_SIZE] {
        let mut out = [0u8; RID_SIZE];
        out[..4].copy_from_slice(&self.cluster_id.to_be_bytes());
        out[4..].copy_from_slice(&self.cluster_position.to_be_bytes()[2..8]);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= RID_SIZE,
            "buffer too small for record id: {} < {}",
            bytes.len(),
            RID_SIZE
        );

        let cluster_id = i32::from_be_bytes(bytes[..4].try_into().unwrap()); // INVARIANT: length checked above

        // Sign-extend the 48-bit position so -1 survives the round trip.
        let fill = if bytes[4] & 0x80 != 0 { 0xFF } else { 0x00 };
        let mut pos = [fill; 8];
        pos[2..8].copy_from_slice(&bytes[4..10]);
        let cluster_position = i64::from_be_bytes(pos);

        Ok(Self {
            cluster_id,
            cluster_position,
        })
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster_id, self.cluster_position)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sentinel_is_not_valid() {
        assert!(!RecordId::INVALID.is_valid());
        assert!(!RecordId::INVALID.is_provisional());
        assert!(!RecordId::INVALID.is_persistent());
    }

    #[test]
    fn provisional_is_valid_but_not_persistent() {
        let rid = RecordId::provisional(-2);
        assert!(rid.is_valid());
        assert!(rid.is_provisional());
        assert!(!rid.is_persistent());
    }

    #[test]
    fn wire_round_trip_positive() {
        let rid = RecordId::new(6, 123_456_789);
        let decoded = RecordId::from_bytes(&rid.to_bytes()).unwrap();
        assert_eq!(rid, decoded);
    }

    #[test]
    fn wire_round_trip_invalid() {
        let decoded = RecordId::from_bytes(&RecordId::INVALID.to_bytes()).unwrap();
        assert_eq!(decoded, RecordId::INVALID);
    }

    #[test]
    fn wire_round_trip_large_position() {
        let rid = RecordId::new(i32::MAX, (1i64 << 47) - 1);
        let decoded = RecordId::from_bytes(&rid.to_bytes()).unwrap();
        assert_eq!(rid, decoded);
    }

    #[test]
    fn from_bytes_rejects_short_buffer() {
        let err = RecordId::from_bytes(&[0u8; 9]).unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = RecordId::new(1, 100);
        let b = RecordId::new(2, 0);
        let c = RecordId::new(2, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn display_format() {
        assert_eq!(RecordId::new(10, 3).to_string(), "#10:3");
        assert_eq!(RecordId::INVALID.to_string(), "#-1:-1");
    }
}
