//! Key and value encodings for the structured layer.
//!
//! Layout under a namespace prefix `P`:
//!
//! - string:       `P ‖ 0x01 ‖ key`                          → bytes
//! - hash meta:    `P ‖ 0x02 ‖ hash ‖ 0x00`                  → size (BE i64)
//! - hash field:   `P ‖ 0x02 ‖ hash ‖ 0x01 ‖ field`          → bytes
//! - list meta:    `P ‖ 0x03 ‖ list ‖ 0x00`                  → head, tail (BE i64 x2)
//! - list element: `P ‖ 0x03 ‖ list ‖ 0x01 ‖ ord(index)`     → bytes
//!
//! The 0x00 suffix sorts a structure's meta entry before all of its members,
//! and `ord()` is the sign-flipped big-endian encoding of the element index,
//! so elements sort by logical position even when `head` goes negative.
//! Structure names must not contain bytes 0x00 or 0x01; every name used by
//! the meta layer is ASCII.

use heron_common::error::StructureError;

pub(crate) const TAG_STRING: u8 = 0x01;
pub(crate) const TAG_HASH: u8 = 0x02;
pub(crate) const TAG_LIST: u8 = 0x03;

pub(crate) const SUFFIX_META: u8 = 0x00;
pub(crate) const SUFFIX_MEMBER: u8 = 0x01;

/// Big-endian i64, the value encoding for counters and sizes.
pub fn encode_i64(v: i64) -> [u8; 8] {
    v.to_be_bytes()
}

pub fn decode_i64(raw: &[u8], what: &'static str) -> Result<i64, StructureError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StructureError::InvalidValue { what })?;
    Ok(i64::from_be_bytes(bytes))
}

/// Order-preserving index encoding: flip the sign bit so that signed order
/// matches unsigned byte order.
pub(crate) fn encode_index(index: i64) -> [u8; 8] {
    ((index as u64) ^ (1 << 63)).to_be_bytes()
}

pub(crate) fn string_key(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + 1 + key.len());
    k.extend_from_slice(prefix);
    k.push(TAG_STRING);
    k.extend_from_slice(key);
    k
}

pub(crate) fn hash_prefix(prefix: &[u8], hash: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + 1 + hash.len());
    k.extend_from_slice(prefix);
    k.push(TAG_HASH);
    k.extend_from_slice(hash);
    k
}

pub(crate) fn hash_meta_key(prefix: &[u8], hash: &[u8]) -> Vec<u8> {
    let mut k = hash_prefix(prefix, hash);
    k.push(SUFFIX_META);
    k
}

pub(crate) fn hash_field_key(prefix: &[u8], hash: &[u8], field: &[u8]) -> Vec<u8> {
    let mut k = hash_prefix(prefix, hash);
    k.push(SUFFIX_MEMBER);
    k.extend_from_slice(field);
    k
}

pub(crate) fn list_prefix(prefix: &[u8], list: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + 1 + list.len());
    k.extend_from_slice(prefix);
    k.push(TAG_LIST);
    k.extend_from_slice(list);
    k
}

pub(crate) fn list_meta_key(prefix: &[u8], list: &[u8]) -> Vec<u8> {
    let mut k = list_prefix(prefix, list);
    k.push(SUFFIX_META);
    k
}

pub(crate) fn list_element_key(prefix: &[u8], list: &[u8], index: i64) -> Vec<u8> {
    let mut k = list_prefix(prefix, list);
    k.push(SUFFIX_MEMBER);
    k.extend_from_slice(&encode_index(index));
    k
}
