//! Per-frame command dispatch.
//!
//! One stream is one transaction: the first frame of a stream opens a KV
//! transaction whose mode comes from `FLAG_RW`, every non-terminal frame
//! executes against it and yields exactly one response frame, and
//! Commit/Discard (or `FLAG_END` on a read) settle it.

use std::collections::HashMap;
use std::time::Duration;

use heron_kv::{KvEngine, KvTxn, ScanOptions, VMetaReq};
use heron_protocol::codec::{
    decode_key_request, decode_scan_request, decode_set_request, encode_exists_response,
    encode_get_response, encode_scan_response, encode_status,
};
use heron_protocol::types::*;

/// Open transactions of one connection, keyed by stream id.
#[derive(Default)]
pub struct StreamTable {
    streams: HashMap<u64, Box<dyn KvTxn>>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Discard every open transaction. Called when the peer goes away.
    pub fn discard_all(&mut self) {
        for (_, mut txn) in self.streams.drain() {
            txn.discard();
        }
    }
}

impl Drop for StreamTable {
    fn drop(&mut self) {
        self.discard_all();
    }
}

/// Process one request frame, returning its single response frame.
pub fn dispatch(engine: &dyn KvEngine, streams: &mut StreamTable, frame: &Frame) -> Frame {
    match frame.opcode {
        OP_COMMIT => {
            let status = match streams.streams.remove(&frame.stream_id) {
                Some(mut txn) => match txn.commit() {
                    Ok(()) => Status::ok(),
                    Err(e) => Status::from_kv_error(&e),
                },
                // Commit of a never-started stream is a no-op.
                None => Status::ok(),
            };
            respond(frame, FLAG_END, encode_status(&status))
        }
        OP_DISCARD => {
            if let Some(mut txn) = streams.streams.remove(&frame.stream_id) {
                txn.discard();
            }
            respond(frame, FLAG_END, encode_status(&Status::ok()))
        }
        _ => {
            let response = data_frame(engine, streams, frame);
            if frame.is_end() {
                // One-shot read: the stream ends without a commit.
                if let Some(mut txn) = streams.streams.remove(&frame.stream_id) {
                    txn.discard();
                }
            }
            response
        }
    }
}

fn data_frame(engine: &dyn KvEngine, streams: &mut StreamTable, frame: &Frame) -> Frame {
    let txn = match streams.streams.entry(frame.stream_id) {
        std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
        std::collections::hash_map::Entry::Vacant(entry) => match engine.begin(frame.is_rw()) {
            Ok(txn) => entry.insert(txn),
            Err(e) => {
                let status = Status::from_kv_error(&e);
                return respond(frame, 0, error_payload(frame.opcode, status));
            }
        },
    };

    let payload = match frame.opcode {
        OP_SET => handle_set(txn.as_mut(), &frame.payload),
        OP_GET => handle_get(txn.as_mut(), &frame.payload),
        OP_EXISTS => handle_exists(txn.as_mut(), &frame.payload),
        OP_DELETE => handle_delete(txn.as_mut(), &frame.payload),
        OP_SCAN => handle_scan(txn.as_mut(), &frame.payload),
        // decode_frame only admits known opcodes
        _ => error_payload(
            frame.opcode,
            Status {
                code: CODE_INTERNAL,
                msg: format!("unexpected opcode 0x{:02x}", frame.opcode),
            },
        ),
    };
    respond(frame, 0, payload)
}

fn respond(request: &Frame, flags: u8, payload: Vec<u8>) -> Frame {
    Frame {
        opcode: request.opcode,
        flags,
        stream_id: request.stream_id,
        payload,
    }
}

/// Failure payload shaped for the opcode, so clients always decode the
/// response type they asked for.
fn error_payload(opcode: u8, status: Status) -> Vec<u8> {
    match opcode {
        OP_GET => encode_get_response(&GetResponse {
            status,
            ..Default::default()
        }),
        OP_EXISTS => encode_exists_response(&ExistsResponse {
            status,
            exists: false,
        }),
        OP_SCAN => encode_scan_response(&ScanResponse {
            status,
            entries: vec![],
        }),
        _ => encode_status(&status),
    }
}

fn handle_set(txn: &mut dyn KvTxn, payload: &[u8]) -> Vec<u8> {
    let req = match decode_set_request(payload) {
        Ok(req) => req,
        Err(e) => return encode_status(&decode_error(e)),
    };
    let meta = req.meta.map(|m| VMetaReq {
        ttl: Duration::from_millis(m.ttl_ms),
        tag: m.tag,
    });
    let status = match txn.set(&req.key, &req.value, meta) {
        Ok(()) => Status::ok(),
        Err(e) => Status::from_kv_error(&e),
    };
    encode_status(&status)
}

fn handle_get(txn: &mut dyn KvTxn, payload: &[u8]) -> Vec<u8> {
    let req = match decode_key_request(payload) {
        Ok(req) => req,
        Err(e) => return error_payload(OP_GET, decode_error(e)),
    };
    let resp = match txn.get(&req.key) {
        Ok((value, meta)) => GetResponse {
            status: Status::ok(),
            value,
            expires_at: meta.expires_at,
            tag: meta.tag,
        },
        Err(e) => GetResponse {
            status: Status::from_kv_error(&e),
            ..Default::default()
        },
    };
    encode_get_response(&resp)
}

fn handle_exists(txn: &mut dyn KvTxn, payload: &[u8]) -> Vec<u8> {
    let req = match decode_key_request(payload) {
        Ok(req) => req,
        Err(e) => return error_payload(OP_EXISTS, decode_error(e)),
    };
    let resp = match txn.exists(&req.key) {
        Ok(exists) => ExistsResponse {
            status: Status::ok(),
            exists,
        },
        Err(e) => ExistsResponse {
            status: Status::from_kv_error(&e),
            exists: false,
        },
    };
    encode_exists_response(&resp)
}

fn handle_delete(txn: &mut dyn KvTxn, payload: &[u8]) -> Vec<u8> {
    let req = match decode_key_request(payload) {
        Ok(req) => req,
        Err(e) => return encode_status(&decode_error(e)),
    };
    let status = match txn.delete(&req.key) {
        Ok(()) => Status::ok(),
        Err(e) => Status::from_kv_error(&e),
    };
    encode_status(&status)
}

fn handle_scan(txn: &mut dyn KvTxn, payload: &[u8]) -> Vec<u8> {
    let req = match decode_scan_request(payload) {
        Ok(req) => req,
        Err(e) => return error_payload(OP_SCAN, decode_error(e)),
    };
    let limit = if req.limit == 0 {
        MAX_SCAN_ENTRIES
    } else {
        req.limit.min(MAX_SCAN_ENTRIES)
    };
    let opts = ScanOptions {
        prefix: req.prefix,
        offset: req.offset,
        reverse: req.reverse,
        key_only: req.key_only,
        limit: limit as usize,
    };
    let mut entries = Vec::new();
    let result = txn.scan(&opts, &mut |key, value, meta| {
        entries.push(WireEntry {
            key: key.to_vec(),
            value: value.to_vec(),
            expires_at: meta.expires_at,
            tag: meta.tag,
        });
        true
    });
    let resp = match result {
        Ok(()) => ScanResponse {
            status: Status::ok(),
            entries,
        },
        Err(e) => ScanResponse {
            status: Status::from_kv_error(&e),
            entries: vec![],
        },
    };
    encode_scan_response(&resp)
}

fn decode_error(e: heron_common::error::ProtocolError) -> Status {
    Status {
        code: CODE_INTERNAL,
        msg: format!("malformed request: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_kv::provider::MemoryEngine;
    use heron_protocol::codec::{
        decode_exists_response, decode_get_response, decode_scan_response, decode_status,
        encode_key_request, encode_scan_request, encode_set_request,
    };

    fn set_frame(stream_id: u64, key: &[u8], value: &[u8]) -> Frame {
        Frame {
            opcode: OP_SET,
            flags: FLAG_RW,
            stream_id,
            payload: encode_set_request(&SetRequest {
                key: key.to_vec(),
                value: value.to_vec(),
                meta: None,
            }),
        }
    }

    fn key_frame(opcode: u8, flags: u8, stream_id: u64, key: &[u8]) -> Frame {
        Frame {
            opcode,
            flags,
            stream_id,
            payload: encode_key_request(&KeyRequest { key: key.to_vec() }),
        }
    }

    fn terminal_frame(opcode: u8, stream_id: u64) -> Frame {
        Frame {
            opcode,
            flags: FLAG_END,
            stream_id,
            payload: vec![],
        }
    }

    #[test]
    fn test_rw_stream_set_commit_visible() {
        let engine = MemoryEngine::new();
        let mut streams = StreamTable::new();

        let resp = dispatch(&engine, &mut streams, &set_frame(1, b"k", b"v"));
        assert_eq!(resp.opcode, OP_SET);
        assert!(decode_status(&resp.payload).unwrap().is_ok());
        assert_eq!(streams.len(), 1);

        let resp = dispatch(&engine, &mut streams, &terminal_frame(OP_COMMIT, 1));
        assert!(resp.is_end());
        assert!(decode_status(&resp.payload).unwrap().is_ok());
        assert!(streams.is_empty());

        // A fresh stream observes the committed write.
        let resp = dispatch(
            &engine,
            &mut streams,
            &key_frame(OP_GET, FLAG_END, 2, b"k"),
        );
        let get = decode_get_response(&resp.payload).unwrap();
        assert!(get.status.is_ok());
        assert_eq!(get.value, b"v");
        assert!(streams.is_empty());
    }

    #[test]
    fn test_discard_leaves_no_trace() {
        let engine = MemoryEngine::new();
        let mut streams = StreamTable::new();

        dispatch(&engine, &mut streams, &set_frame(1, b"k", b"v"));
        let resp = dispatch(&engine, &mut streams, &terminal_frame(OP_DISCARD, 1));
        assert!(resp.is_end());
        assert!(streams.is_empty());

        let resp = dispatch(
            &engine,
            &mut streams,
            &key_frame(OP_GET, FLAG_END, 2, b"k"),
        );
        let get = decode_get_response(&resp.payload).unwrap();
        assert_eq!(get.status.code, CODE_KEY_NOT_FOUND);
    }

    #[test]
    fn test_write_on_ro_stream_rejected() {
        let engine = MemoryEngine::new();
        let mut streams = StreamTable::new();

        // First frame without FLAG_RW opens a read-only transaction.
        let mut frame = set_frame(1, b"k", b"v");
        frame.flags = 0;
        let resp = dispatch(&engine, &mut streams, &frame);
        let status = decode_status(&resp.payload).unwrap();
        assert_eq!(status.code, CODE_MUTATE_RO);
    }

    #[test]
    fn test_transaction_reads_its_own_writes() {
        let engine = MemoryEngine::new();
        let mut streams = StreamTable::new();

        dispatch(&engine, &mut streams, &set_frame(1, b"k", b"v"));
        let resp = dispatch(&engine, &mut streams, &key_frame(OP_GET, 0, 1, b"k"));
        let get = decode_get_response(&resp.payload).unwrap();
        assert_eq!(get.value, b"v");

        dispatch(&engine, &mut streams, &key_frame(OP_DELETE, 0, 1, b"k"));
        let resp = dispatch(&engine, &mut streams, &key_frame(OP_GET, 0, 1, b"k"));
        let get = decode_get_response(&resp.payload).unwrap();
        assert_eq!(get.status.code, CODE_KEY_NOT_FOUND);
    }

    #[test]
    fn test_exists_on_missing_key() {
        let engine = MemoryEngine::new();
        let mut streams = StreamTable::new();
        let resp = dispatch(
            &engine,
            &mut streams,
            &key_frame(OP_EXISTS, FLAG_END, 1, b"nope"),
        );
        let exists = decode_exists_response(&resp.payload).unwrap();
        assert!(exists.status.is_ok());
        assert!(!exists.exists);
    }

    #[test]
    fn test_commit_of_empty_stream_is_noop() {
        let engine = MemoryEngine::new();
        let mut streams = StreamTable::new();
        let resp = dispatch(&engine, &mut streams, &terminal_frame(OP_COMMIT, 99));
        assert!(decode_status(&resp.payload).unwrap().is_ok());
    }

    #[test]
    fn test_scan_applies_limit_and_order() {
        let engine = MemoryEngine::new();
        let mut streams = StreamTable::new();
        for i in 0..10u8 {
            dispatch(
                &engine,
                &mut streams,
                &set_frame(1, format!("p:{}", i).as_bytes(), &[i]),
            );
        }
        dispatch(&engine, &mut streams, &terminal_frame(OP_COMMIT, 1));

        let scan = Frame {
            opcode: OP_SCAN,
            flags: FLAG_END,
            stream_id: 2,
            payload: encode_scan_request(&ScanRequest {
                prefix: b"p:".to_vec(),
                offset: None,
                reverse: false,
                key_only: false,
                limit: 9,
            }),
        };
        let resp = dispatch(&engine, &mut streams, &scan);
        let scan = decode_scan_response(&resp.payload).unwrap();
        assert!(scan.status.is_ok());
        assert_eq!(scan.entries.len(), 9);
        for (i, entry) in scan.entries.iter().enumerate() {
            assert_eq!(entry.key, format!("p:{}", i).as_bytes());
        }
    }

    #[test]
    fn test_interleaved_streams_are_isolated() {
        let engine = MemoryEngine::new();
        let mut streams = StreamTable::new();

        dispatch(&engine, &mut streams, &set_frame(1, b"a", b"1"));
        dispatch(&engine, &mut streams, &set_frame(2, b"b", b"2"));
        assert_eq!(streams.len(), 2);

        // Stream 2 cannot see stream 1's uncommitted write.
        let resp = dispatch(&engine, &mut streams, &key_frame(OP_GET, 0, 2, b"a"));
        let get = decode_get_response(&resp.payload).unwrap();
        assert_eq!(get.status.code, CODE_KEY_NOT_FOUND);

        dispatch(&engine, &mut streams, &terminal_frame(OP_COMMIT, 1));
        dispatch(&engine, &mut streams, &terminal_frame(OP_DISCARD, 2));

        let resp = dispatch(
            &engine,
            &mut streams,
            &key_frame(OP_GET, FLAG_END, 3, b"b"),
        );
        let get = decode_get_response(&resp.payload).unwrap();
        assert_eq!(get.status.code, CODE_KEY_NOT_FOUND);
    }

    #[test]
    fn test_malformed_payload_yields_internal_error() {
        let engine = MemoryEngine::new();
        let mut streams = StreamTable::new();
        let frame = Frame {
            opcode: OP_SET,
            flags: FLAG_RW,
            stream_id: 1,
            payload: vec![0xFF],
        };
        let resp = dispatch(&engine, &mut streams, &frame);
        let status = decode_status(&resp.payload).unwrap();
        assert_eq!(status.code, CODE_INTERNAL);
    }
}
