//! Encode/decode for the wire protocol.
//!
//! All multi-byte integers are little-endian. Every frame is
//! `[opcode: u8][flags: u8][stream_id: u64][length: u32][payload]`.
//! Decoders signal `Truncated` when more bytes are needed, so a streaming
//! reader can accumulate and retry.

use bytes::{BufMut, BytesMut};

use heron_common::error::ProtocolError;

use crate::types::*;

type Result<T> = std::result::Result<T, ProtocolError>;

// ── Primitive readers ────────────────────────────────────────────────────

fn ensure(buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(ProtocolError::Truncated {
            expected: need,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    let v = buf[0];
    *buf = &buf[1..];
    Ok(v)
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    let v = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    Ok(v)
}

fn read_u64(buf: &mut &[u8]) -> Result<u64> {
    ensure(buf, 8)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buf[..8]);
    *buf = &buf[8..];
    Ok(u64::from_le_bytes(arr))
}

fn read_bool(buf: &mut &[u8]) -> Result<bool> {
    Ok(read_u8(buf)? != 0)
}

fn read_bytes_u32(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = read_u32(buf)? as usize;
    ensure(buf, len)?;
    let v = buf[..len].to_vec();
    *buf = &buf[len..];
    Ok(v)
}

fn read_string_u32(buf: &mut &[u8], field: &'static str) -> Result<String> {
    let bytes = read_bytes_u32(buf)?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

fn write_bytes_u32(out: &mut BytesMut, v: &[u8]) {
    out.put_u32_le(v.len() as u32);
    out.put_slice(v);
}

fn write_string_u32(out: &mut BytesMut, s: &str) {
    write_bytes_u32(out, s.as_bytes());
}

// ── Frames ───────────────────────────────────────────────────────────────

pub fn encode_frame(frame: &Frame) -> BytesMut {
    let mut out = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
    out.put_u8(frame.opcode);
    out.put_u8(frame.flags);
    out.put_u64_le(frame.stream_id);
    out.put_u32_le(frame.payload.len() as u32);
    out.put_slice(&frame.payload);
    out
}

/// Decode one frame from the front of `buf`. Returns the frame and the
/// bytes consumed; `Truncated` means the caller should read more input.
pub fn decode_frame(buf: &[u8]) -> Result<(Frame, usize)> {
    ensure(buf, FRAME_HEADER_SIZE)?;
    let opcode = buf[0];
    if !(OP_SET..=OP_DISCARD).contains(&opcode) {
        return Err(ProtocolError::UnknownOpcode(opcode));
    }
    let flags = buf[1];
    let mut rest = &buf[2..];
    let stream_id = read_u64(&mut rest)?;
    let len = read_u32(&mut rest)?;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len as usize,
            max: MAX_FRAME_SIZE as usize,
        });
    }
    let total = FRAME_HEADER_SIZE + len as usize;
    ensure(buf, total)?;
    Ok((
        Frame {
            opcode,
            flags,
            stream_id,
            payload: buf[FRAME_HEADER_SIZE..total].to_vec(),
        },
        total,
    ))
}

// ── Requests ─────────────────────────────────────────────────────────────

pub fn encode_set_request(req: &SetRequest) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_bytes_u32(&mut out, &req.key);
    write_bytes_u32(&mut out, &req.value);
    match &req.meta {
        Some(meta) => {
            out.put_u8(1);
            out.put_u64_le(meta.ttl_ms);
            out.put_u8(meta.tag);
        }
        None => out.put_u8(0),
    }
    out.to_vec()
}

pub fn decode_set_request(mut buf: &[u8]) -> Result<SetRequest> {
    let key = read_bytes_u32(&mut buf)?;
    let value = read_bytes_u32(&mut buf)?;
    let meta = if read_bool(&mut buf)? {
        Some(ValueMeta {
            ttl_ms: read_u64(&mut buf)?,
            tag: read_u8(&mut buf)?,
        })
    } else {
        None
    };
    Ok(SetRequest { key, value, meta })
}

pub fn encode_key_request(req: &KeyRequest) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_bytes_u32(&mut out, &req.key);
    out.to_vec()
}

pub fn decode_key_request(mut buf: &[u8]) -> Result<KeyRequest> {
    Ok(KeyRequest {
        key: read_bytes_u32(&mut buf)?,
    })
}

pub fn encode_scan_request(req: &ScanRequest) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_bytes_u32(&mut out, &req.prefix);
    match &req.offset {
        Some(offset) => {
            out.put_u8(1);
            write_bytes_u32(&mut out, offset);
        }
        None => out.put_u8(0),
    }
    out.put_u8(req.reverse as u8);
    out.put_u8(req.key_only as u8);
    out.put_u32_le(req.limit);
    out.to_vec()
}

pub fn decode_scan_request(mut buf: &[u8]) -> Result<ScanRequest> {
    let prefix = read_bytes_u32(&mut buf)?;
    let offset = if read_bool(&mut buf)? {
        Some(read_bytes_u32(&mut buf)?)
    } else {
        None
    };
    Ok(ScanRequest {
        prefix,
        offset,
        reverse: read_bool(&mut buf)?,
        key_only: read_bool(&mut buf)?,
        limit: read_u32(&mut buf)?,
    })
}

// ── Responses ────────────────────────────────────────────────────────────

fn write_status(out: &mut BytesMut, status: &Status) {
    out.put_u32_le(status.code);
    write_string_u32(out, &status.msg);
}

fn read_status(buf: &mut &[u8]) -> Result<Status> {
    Ok(Status {
        code: read_u32(buf)?,
        msg: read_string_u32(buf, "status_msg")?,
    })
}

pub fn encode_status(status: &Status) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_status(&mut out, status);
    out.to_vec()
}

pub fn decode_status(mut buf: &[u8]) -> Result<Status> {
    read_status(&mut buf)
}

pub fn encode_get_response(resp: &GetResponse) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_status(&mut out, &resp.status);
    write_bytes_u32(&mut out, &resp.value);
    out.put_u64_le(resp.expires_at);
    out.put_u8(resp.tag);
    out.to_vec()
}

pub fn decode_get_response(mut buf: &[u8]) -> Result<GetResponse> {
    Ok(GetResponse {
        status: read_status(&mut buf)?,
        value: read_bytes_u32(&mut buf)?,
        expires_at: read_u64(&mut buf)?,
        tag: read_u8(&mut buf)?,
    })
}

pub fn encode_exists_response(resp: &ExistsResponse) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_status(&mut out, &resp.status);
    out.put_u8(resp.exists as u8);
    out.to_vec()
}

pub fn decode_exists_response(mut buf: &[u8]) -> Result<ExistsResponse> {
    Ok(ExistsResponse {
        status: read_status(&mut buf)?,
        exists: read_bool(&mut buf)?,
    })
}

pub fn encode_scan_response(resp: &ScanResponse) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_status(&mut out, &resp.status);
    out.put_u32_le(resp.entries.len() as u32);
    for entry in &resp.entries {
        write_bytes_u32(&mut out, &entry.key);
        write_bytes_u32(&mut out, &entry.value);
        out.put_u64_le(entry.expires_at);
        out.put_u8(entry.tag);
    }
    out.to_vec()
}

pub fn decode_scan_response(mut buf: &[u8]) -> Result<ScanResponse> {
    let status = read_status(&mut buf)?;
    let count = read_u32(&mut buf)? as usize;
    let mut entries = Vec::with_capacity(count.min(MAX_SCAN_ENTRIES as usize));
    for _ in 0..count {
        entries.push(WireEntry {
            key: read_bytes_u32(&mut buf)?,
            value: read_bytes_u32(&mut buf)?,
            expires_at: read_u64(&mut buf)?,
            tag: read_u8(&mut buf)?,
        });
    }
    Ok(ScanResponse { status, entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_common::error::KvError;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame {
            opcode: OP_SET,
            flags: FLAG_RW,
            stream_id: 42,
            payload: b"payload".to_vec(),
        };
        let encoded = encode_frame(&frame);
        let (decoded, consumed) = decode_frame(&encoded).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_frame_decode_needs_more_data() {
        let frame = Frame {
            opcode: OP_GET,
            flags: 0,
            stream_id: 1,
            payload: vec![0u8; 100],
        };
        let encoded = encode_frame(&frame);
        for cut in [0, 1, FRAME_HEADER_SIZE - 1, FRAME_HEADER_SIZE + 10] {
            assert!(matches!(
                decode_frame(&encoded[..cut]),
                Err(ProtocolError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn test_frame_rejects_unknown_opcode() {
        let mut encoded = encode_frame(&Frame {
            opcode: OP_SET,
            flags: 0,
            stream_id: 0,
            payload: vec![],
        });
        encoded[0] = 0xEE;
        assert!(matches!(
            decode_frame(&encoded),
            Err(ProtocolError::UnknownOpcode(0xEE))
        ));
    }

    #[test]
    fn test_frame_rejects_oversized_payload() {
        let mut encoded = encode_frame(&Frame {
            opcode: OP_SET,
            flags: 0,
            stream_id: 0,
            payload: vec![],
        });
        let bad_len = (MAX_FRAME_SIZE + 1).to_le_bytes();
        encoded[10..14].copy_from_slice(&bad_len);
        assert!(matches!(
            decode_frame(&encoded),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let a = encode_frame(&Frame {
            opcode: OP_COMMIT,
            flags: FLAG_END,
            stream_id: 7,
            payload: vec![],
        });
        let b = encode_frame(&Frame {
            opcode: OP_GET,
            flags: 0,
            stream_id: 8,
            payload: b"x".to_vec(),
        });
        let mut joined = a.to_vec();
        joined.extend_from_slice(&b);

        let (first, consumed) = decode_frame(&joined).unwrap();
        assert_eq!(first.stream_id, 7);
        let (second, _) = decode_frame(&joined[consumed..]).unwrap();
        assert_eq!(second.stream_id, 8);
    }

    #[test]
    fn test_set_request_roundtrip() {
        for meta in [
            None,
            Some(ValueMeta {
                ttl_ms: 5000,
                tag: 9,
            }),
        ] {
            let req = SetRequest {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
                meta,
            };
            assert_eq!(
                decode_set_request(&encode_set_request(&req)).unwrap(),
                req
            );
        }
    }

    #[test]
    fn test_key_request_roundtrip() {
        let req = KeyRequest {
            key: b"some-key".to_vec(),
        };
        assert_eq!(decode_key_request(&encode_key_request(&req)).unwrap(), req);
    }

    #[test]
    fn test_scan_request_roundtrip() {
        let req = ScanRequest {
            prefix: b"pre".to_vec(),
            offset: Some(b"pre:5".to_vec()),
            reverse: true,
            key_only: true,
            limit: 33,
        };
        assert_eq!(
            decode_scan_request(&encode_scan_request(&req)).unwrap(),
            req
        );
    }

    #[test]
    fn test_responses_roundtrip() {
        let status = Status {
            code: CODE_CONFLICT,
            msg: "conflict".into(),
        };
        assert_eq!(decode_status(&encode_status(&status)).unwrap(), status);

        let get = GetResponse {
            status: Status::ok(),
            value: b"v".to_vec(),
            expires_at: 12345,
            tag: 1,
        };
        assert_eq!(decode_get_response(&encode_get_response(&get)).unwrap(), get);

        let exists = ExistsResponse {
            status: Status::ok(),
            exists: true,
        };
        assert_eq!(
            decode_exists_response(&encode_exists_response(&exists)).unwrap(),
            exists
        );

        let scan = ScanResponse {
            status: Status::ok(),
            entries: vec![
                WireEntry {
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                    expires_at: 0,
                    tag: 0,
                },
                WireEntry {
                    key: b"b".to_vec(),
                    value: vec![],
                    expires_at: 9,
                    tag: 2,
                },
            ],
        };
        assert_eq!(
            decode_scan_response(&encode_scan_response(&scan)).unwrap(),
            scan
        );
    }

    #[test]
    fn test_status_kv_error_mapping() {
        for err in [
            KvError::KeyNotFound,
            KvError::TxnTooBig,
            KvError::Conflict,
            KvError::MutateForRoTxn,
        ] {
            let status = Status::from_kv_error(&err);
            assert!(!status.is_ok());
            assert_eq!(status.to_kv_error(), Some(err));
        }
        let internal = Status::from_kv_error(&KvError::Internal("x".into()));
        assert_eq!(internal.code, CODE_INTERNAL);
        assert_eq!(internal.to_kv_error(), None);
    }
}
