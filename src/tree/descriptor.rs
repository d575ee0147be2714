//! # Tree Descriptor
//!
//! The persistent root record of a tree: where the root page lives, how many
//! entries the tree holds, the page size used for new nodes, and the names of
//! the key/value codecs. A tree is reopened from nothing but this record's
//! identity.
//!
//! ## Wire Layout
//!
//! Big-endian:
//!
//! ```text
//! offset  size  field
//! 0       10    root_rid
//! 10      4     size (legacy 32-bit field, kept for bit-compat)
//! 14      2     last_page_size
//! 16      var   varint-length-prefixed key codec name
//! ...     var   varint-length-prefixed value codec name
//! ```
//!
//! The size field stays 4 bytes on disk; the in-memory count is `i64` and
//! saving a tree past `i32::MAX` entries is an error naming the legacy limit.

use eyre::{ensure, Result, WrapErr};

use crate::encoding::varint::{read_prefixed, write_prefixed};
use crate::rid::{RecordId, RID_SIZE};

const FIXED_PREFIX: usize = RID_SIZE + 4 + 2;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeDescriptor {
    pub root_rid: RecordId,
    pub size: i64,
    pub last_page_size: u16,
    pub key_codec_name: String,
    pub value_codec_name: String,
}

impl TreeDescriptor {
    pub fn new(key_codec_name: &str, value_codec_name: &str, page_size: u16) -> Self {
        Self {
            root_rid: RecordId::INVALID,
            size: 0,
            last_page_size: page_size,
            key_codec_name: key_codec_name.to_string(),
            value_codec_name: value_codec_name.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        ensure!(
            self.size >= 0 && self.size <= i32::MAX as i64,
            "tree size {} does not fit the legacy 32-bit descriptor field",
            self.size
        );

        let mut out = Vec::with_capacity(
            FIXED_PREFIX + self.key_codec_name.len() + self.value_codec_name.len() + 4,
        );
        out.extend_from_slice(&self.root_rid.to_bytes());
        out.extend_from_slice(&(self.size as i32).to_be_bytes());
        out.extend_from_slice(&self.last_page_size.to_be_bytes());
        write_prefixed(&mut out, self.key_codec_name.as_bytes());
        write_prefixed(&mut out, self.value_codec_name.as_bytes());
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= FIXED_PREFIX,
            "tree descriptor too short: {} < {}",
            bytes.len(),
            FIXED_PREFIX
        );

        let root_rid = RecordId::from_bytes(&bytes[..RID_SIZE])?;
        let size = i32::from_be_bytes(bytes[RID_SIZE..RID_SIZE + 4].try_into().unwrap()) as i64; // INVARIANT: length checked above
        let last_page_size =
            u16::from_be_bytes(bytes[RID_SIZE + 4..FIXED_PREFIX].try_into().unwrap()); // INVARIANT: length checked above
        ensure!(size >= 0, "tree descriptor carries negative size {}", size);

        let rest = &bytes[FIXED_PREFIX..];
        let (key_name, used) = read_prefixed(rest).wrap_err("tree descriptor key codec name")?;
        let (value_name, _) =
            read_prefixed(&rest[used..]).wrap_err("tree descriptor value codec name")?;

        Ok(Self {
            root_rid,
            size,
            last_page_size,
            key_codec_name: String::from_utf8(key_name.to_vec())
                .wrap_err("tree descriptor key codec name is not UTF-8")?,
            value_codec_name: String::from_utf8(value_name.to_vec())
                .wrap_err("tree descriptor value codec name is not UTF-8")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let descriptor = TreeDescriptor {
            root_rid: RecordId::new(3, 17),
            size: 12345,
            last_page_size: 1024,
            key_codec_name: "string".to_string(),
            value_codec_name: "rid-list".to_string(),
        };
        let bytes = descriptor.encode().unwrap();
        assert_eq!(TreeDescriptor::decode(&bytes).unwrap(), descriptor);
    }

    #[test]
    fn fresh_descriptor_has_invalid_root() {
        let descriptor = TreeDescriptor::new("i64", "bytes", 256);
        assert_eq!(descriptor.root_rid, RecordId::INVALID);
        assert_eq!(descriptor.size, 0);
        let bytes = descriptor.encode().unwrap();
        assert_eq!(TreeDescriptor::decode(&bytes).unwrap(), descriptor);
    }

    #[test]
    fn encode_rejects_size_past_legacy_limit() {
        let descriptor = TreeDescriptor {
            size: i32::MAX as i64 + 1,
            ..TreeDescriptor::new("string", "string", 16)
        };
        let err = descriptor.encode().unwrap_err();
        assert!(err.to_string().contains("32-bit"));
    }

    #[test]
    fn decode_rejects_truncated_names() {
        let descriptor = TreeDescriptor::new("string", "rid-list", 64);
        let bytes = descriptor.encode().unwrap();
        let err = TreeDescriptor::decode(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(err.to_string().contains("codec name"));
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(TreeDescriptor::decode(&[0u8; 8]).is_err());
    }
}
