//! # Wire Encoding Primitives
//!
//! Low-level encoding shared by the node page and descriptor codecs.
//!
//! - [`varint`]: variable-length length prefixes for key/value blobs

pub mod varint;
