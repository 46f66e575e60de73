//! Persisted key layout for the document layer.
//!
//! Every system key starts with the one-byte `BASE_PREFIX` to stay clear of
//! user keys written through the raw KV surface:
//!
//! - documents:  `h ‖ 'd' ‖ BE(cid) ‖ BE(did)` — each collection owns a
//!   contiguous, id-ordered key range
//! - sequences:  `h ‖ 's' ‖ keyword`
//! - meta:       `h ‖ 'm'` — namespace prefix handed to `TxStructure`

pub const BASE_PREFIX: u8 = b'h';

const DOCUMENT_TAG: u8 = b'd';
const SEQUENCE_TAG: u8 = b's';
const META_TAG: u8 = b'm';

/// Key of document `did` in collection `cid`.
pub fn collection_document_key(cid: i64, did: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(18);
    key.push(BASE_PREFIX);
    key.push(DOCUMENT_TAG);
    key.extend_from_slice(&cid.to_be_bytes());
    key.extend_from_slice(&did.to_be_bytes());
    key
}

/// Persisted counter key for the sequence named by `keyword`.
pub fn sequence_key(keyword: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + keyword.len());
    key.push(BASE_PREFIX);
    key.push(SEQUENCE_TAG);
    key.extend_from_slice(keyword);
    key
}

/// Keyword of the sequence minting document ids for collection `cid`.
pub fn document_sequence_keyword(cid: i64) -> Vec<u8> {
    format!("doc:{cid}").into_bytes()
}

/// Namespace prefix of the meta store's structured encoding.
pub fn meta_prefix() -> Vec<u8> {
    vec![BASE_PREFIX, META_TAG]
}
