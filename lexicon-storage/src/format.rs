//! On-disk record format for LMDB-backed locations.
//!
//! # Layout
//!
//! ```text
//! records db:  key = sequence (u64 BE)   value = [code: i32 BE][value: UTF-8]
//! meta db:     "magic"   → b"LEXIDX\0\x01"
//!              "version" → u32 BE
//!              "count"   → u64 BE
//! ```
//!
//! Keys are the append sequence, so iteration order is write order, which a
//! sink guarantees is increasing value order. Codes are stored verbatim and
//! are not sorted on disk.

use lexicon_core::{Code, IndexEntry, LexiconResult, StorageError};

pub const RECORDS_DB: &str = "records";
pub const META_DB: &str = "meta";

pub const MAGIC_KEY: &[u8] = b"magic";
pub const VERSION_KEY: &[u8] = b"version";
pub const COUNT_KEY: &[u8] = b"count";

pub const MAGIC: [u8; 8] = *b"LEXIDX\0\x01";
pub const FORMAT_VERSION: u32 = 1;

/// Size of the code prefix in a record value.
pub const CODE_SIZE: usize = 4;

pub fn encode_sequence(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

pub fn encode_record(entry: &IndexEntry) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(CODE_SIZE + entry.value.len());
    bytes.extend_from_slice(&entry.code.to_be_bytes());
    bytes.extend_from_slice(entry.value.as_bytes());
    bytes
}

pub fn decode_record(bytes: &[u8], location: &str) -> LexiconResult<IndexEntry> {
    if bytes.len() < CODE_SIZE {
        return Err(corrupt(location, format!("record of {} bytes is too short", bytes.len())));
    }
    let (code_bytes, value_bytes) = bytes.split_at(CODE_SIZE);
    let code_bytes: [u8; CODE_SIZE] = code_bytes
        .try_into()
        .map_err(|_| corrupt(location, "invalid code prefix"))?;
    let value = std::str::from_utf8(value_bytes)
        .map_err(|e| corrupt(location, format!("value is not UTF-8: {}", e)))?;

    Ok(IndexEntry {
        code: Code::from_be_bytes(code_bytes),
        value: value.to_string(),
    })
}

pub fn decode_u32(bytes: &[u8], field: &str, location: &str) -> LexiconResult<u32> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| corrupt(location, format!("{} must be 4 bytes", field)))?;
    Ok(u32::from_be_bytes(raw))
}

pub fn decode_u64(bytes: &[u8], field: &str, location: &str) -> LexiconResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| corrupt(location, format!("{} must be 8 bytes", field)))?;
    Ok(u64::from_be_bytes(raw))
}

/// Check magic and version read from a meta db.
pub fn verify_header(magic: &[u8], version: u32, location: &str) -> LexiconResult<()> {
    if magic != MAGIC {
        return Err(corrupt(
            location,
            format!("invalid magic number: expected {:?}, found {:?}", MAGIC, magic),
        ));
    }
    if version > FORMAT_VERSION {
        return Err(corrupt(
            location,
            format!(
                "unsupported format version {}, max supported is {}",
                version, FORMAT_VERSION
            ),
        ));
    }
    Ok(())
}

pub(crate) fn corrupt(location: &str, reason: impl Into<String>) -> lexicon_core::LexiconError {
    StorageError::Corrupt {
        location: location.to_string(),
        reason: reason.into(),
    }
    .into()
}
