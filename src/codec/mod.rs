//! # Key/Value Codecs
//!
//! Slots in a node page hold serialized blobs; a [`Codec`] turns them back
//! into typed keys and values on first access and re-encodes changed slots at
//! write-out. The tree descriptor records the codec *names*, so a stored tree
//! stays readable as long as codecs with those names are still around.
//!
//! Codecs must round-trip: `decode(encode(v)) == v` for every value the tree
//! is asked to hold. The built-ins cover the types the index facade uses;
//! anything else implements [`Codec`] for its own type.

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashSet;

use crate::encoding::varint::{decode_varint, write_varint};
use crate::rid::{RecordId, RidList, RID_SIZE};

/// Encode/decode pair for one type, registered under a stable name.
pub trait Codec<T>: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, value: &T) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// UTF-8 strings.
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn name(&self) -> &'static str {
        "string"
    }

    fn encode(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).wrap_err("string codec: payload is not UTF-8")
    }
}

/// 8-byte big-endian signed integers.
pub struct I64Codec;

impl Codec<i64> for I64Codec {
    fn name(&self) -> &'static str {
        "i64"
    }

    fn encode(&self, value: &i64) -> Result<Vec<u8>> {
        Ok(value.to_be_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<i64> {
        ensure!(
            bytes.len() == 8,
            "i64 codec: expected 8 bytes, got {}",
            bytes.len()
        );
        Ok(i64::from_be_bytes(bytes.try_into().unwrap())) // INVARIANT: length checked above
    }
}

/// A single record identity in its 10-byte wire form.
pub struct RidCodec;

impl Codec<RecordId> for RidCodec {
    fn name(&self) -> &'static str {
        "rid"
    }

    fn encode(&self, value: &RecordId) -> Result<Vec<u8>> {
        Ok(value.to_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<RecordId> {
        ensure!(
            bytes.len() == RID_SIZE,
            "rid codec: expected {} bytes, got {}",
            RID_SIZE,
            bytes.len()
        );
        RecordId::from_bytes(bytes)
    }
}

/// A posting list: varint count followed by 10-byte entries.
pub struct RidListCodec;

impl Codec<RidList> for RidListCodec {
    fn name(&self) -> &'static str {
        "rid-list"
    }

    fn encode(&self, value: &RidList) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(2 + value.len() * RID_SIZE);
        write_varint(&mut out, value.len() as u64);
        for rid in value {
            out.extend_from_slice(&rid.to_bytes());
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RidList> {
        let (count, used) = decode_varint(bytes)?;
        let count = count as usize;
        let body = &bytes[used..];
        ensure!(
            body.len() == count * RID_SIZE,
            "rid-list codec: {} entries need {} bytes, got {}",
            count,
            count * RID_SIZE,
            body.len()
        );
        let mut out = RidList::with_capacity(count);
        for chunk in body.chunks_exact(RID_SIZE) {
            out.push(RecordId::from_bytes(chunk)?);
        }
        Ok(out)
    }
}

/// Raw bytes, stored as-is.
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// The set of codec names this process can resolve.
///
/// Opening a stored tree checks the descriptor's recorded names against the
/// registry before binding the caller-supplied codecs, so a missing codec is
/// reported by name instead of failing slot by slot.
pub struct CodecRegistry {
    known: HashSet<&'static str>,
}

impl CodecRegistry {
    /// Registry with every built-in codec name.
    pub fn builtin() -> Self {
        let mut known = HashSet::new();
        for name in ["string", "i64", "rid", "rid-list", "bytes"] {
            known.insert(name);
        }
        Self { known }
    }

    pub fn register(&mut self, name: &'static str) {
        self.known.insert(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn ensure_known(&self, name: &str) -> Result<()> {
        ensure!(self.contains(name), "codec '{}' is not registered", name);
        Ok(())
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
