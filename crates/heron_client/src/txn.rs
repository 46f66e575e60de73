//! Client-side transaction: translates calls into frames on one stream.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use heron_common::error::{ClientError, KvError};
use heron_kv::{Entry, ScanOptions, VMetaReq, VMetaResp};
use heron_protocol::codec::{
    decode_exists_response, decode_get_response, decode_scan_response, decode_status,
    encode_frame, encode_key_request, encode_scan_request, encode_set_request,
};
use heron_protocol::types::{
    Frame, KeyRequest, ScanRequest, SetRequest, Status, ValueMeta, FLAG_END, FLAG_RW,
    MAX_SCAN_ENTRIES, OP_COMMIT, OP_DELETE, OP_DISCARD, OP_EXISTS, OP_GET, OP_SCAN, OP_SET,
};

use crate::client::ClientInner;

/// One transaction riding one stream. Ended by exactly one of `commit` or
/// `discard`; both are local no-ops when no frame was ever sent.
pub struct Txn {
    inner: Arc<ClientInner>,
    stream_id: u64,
    rx: mpsc::UnboundedReceiver<Frame>,
    update: bool,
    started: bool,
    finished: bool,
}

impl Txn {
    pub(crate) fn new(
        inner: Arc<ClientInner>,
        stream_id: u64,
        rx: mpsc::UnboundedReceiver<Frame>,
        update: bool,
    ) -> Self {
        Self {
            inner,
            stream_id,
            rx,
            update,
            started: false,
            finished: false,
        }
    }

    async fn request(
        &mut self,
        opcode: u8,
        payload: Vec<u8>,
        end: bool,
    ) -> Result<Frame, ClientError> {
        if self.finished {
            return Err(ClientError::Kv(KvError::Internal(
                "transaction already finished".into(),
            )));
        }
        let mut flags = 0;
        if !self.started && self.update {
            flags |= FLAG_RW;
        }
        if end {
            flags |= FLAG_END;
        }
        self.started = true;

        let frame = Frame {
            opcode,
            flags,
            stream_id: self.stream_id,
            payload,
        };
        {
            let mut writer = self.inner.writer.lock().await;
            writer.write_all(&encode_frame(&frame)).await?;
        }
        self.rx.recv().await.ok_or(ClientError::NetworkClosed)
    }

    fn finish(&mut self) {
        self.finished = true;
        self.inner.streams.remove(&self.stream_id);
    }

    // ── Operations ───────────────────────────────────────────────────────

    pub async fn set(
        &mut self,
        key: &[u8],
        value: &[u8],
        meta: Option<VMetaReq>,
    ) -> Result<(), ClientError> {
        if !self.update {
            return Err(ClientError::Kv(KvError::MutateForRoTxn));
        }
        let payload = encode_set_request(&SetRequest {
            key: key.to_vec(),
            value: value.to_vec(),
            meta: meta.map(|m| ValueMeta {
                ttl_ms: m.ttl.as_millis() as u64,
                tag: m.tag,
            }),
        });
        let resp = self.request(OP_SET, payload, false).await?;
        status_to_result(decode_status(&resp.payload)?)
    }

    pub async fn delete(&mut self, key: &[u8]) -> Result<(), ClientError> {
        if !self.update {
            return Err(ClientError::Kv(KvError::MutateForRoTxn));
        }
        let payload = encode_key_request(&KeyRequest { key: key.to_vec() });
        let resp = self.request(OP_DELETE, payload, false).await?;
        status_to_result(decode_status(&resp.payload)?)
    }

    pub async fn get(&mut self, key: &[u8]) -> Result<(Vec<u8>, VMetaResp), ClientError> {
        self.get_inner(key, false).await
    }

    pub(crate) async fn get_oneshot(
        mut self,
        key: &[u8],
    ) -> Result<(Vec<u8>, VMetaResp), ClientError> {
        let result = self.get_inner(key, true).await;
        self.finish();
        result
    }

    async fn get_inner(
        &mut self,
        key: &[u8],
        end: bool,
    ) -> Result<(Vec<u8>, VMetaResp), ClientError> {
        let payload = encode_key_request(&KeyRequest { key: key.to_vec() });
        let resp = self.request(OP_GET, payload, end).await?;
        let resp = decode_get_response(&resp.payload)?;
        status_to_result(resp.status)?;
        Ok((
            resp.value,
            VMetaResp {
                expires_at: resp.expires_at,
                tag: resp.tag,
            },
        ))
    }

    pub async fn exists(&mut self, key: &[u8]) -> Result<bool, ClientError> {
        self.exists_inner(key, false).await
    }

    pub(crate) async fn exists_oneshot(mut self, key: &[u8]) -> Result<bool, ClientError> {
        let result = self.exists_inner(key, true).await;
        self.finish();
        result
    }

    async fn exists_inner(&mut self, key: &[u8], end: bool) -> Result<bool, ClientError> {
        let payload = encode_key_request(&KeyRequest { key: key.to_vec() });
        let resp = self.request(OP_EXISTS, payload, end).await?;
        let resp = decode_exists_response(&resp.payload)?;
        status_to_result(resp.status)?;
        Ok(resp.exists)
    }

    pub async fn scan(&mut self, opts: ScanOptions) -> Result<Vec<Entry>, ClientError> {
        self.scan_inner(opts, false).await
    }

    pub(crate) async fn scan_oneshot(mut self, opts: ScanOptions) -> Result<Vec<Entry>, ClientError> {
        let result = self.scan_inner(opts, true).await;
        self.finish();
        result
    }

    async fn scan_inner(
        &mut self,
        opts: ScanOptions,
        end: bool,
    ) -> Result<Vec<Entry>, ClientError> {
        if opts.limit == 0 {
            return Ok(Vec::new());
        }
        // The server enforces the same cap.
        let limit = (opts.limit as u32).min(MAX_SCAN_ENTRIES);
        let payload = encode_scan_request(&ScanRequest {
            prefix: opts.prefix,
            offset: opts.offset,
            reverse: opts.reverse,
            key_only: opts.key_only,
            limit,
        });
        let resp = self.request(OP_SCAN, payload, end).await?;
        let resp = decode_scan_response(&resp.payload)?;
        status_to_result(resp.status)?;
        Ok(resp
            .entries
            .into_iter()
            .map(|e| Entry {
                key: e.key,
                value: e.value,
                meta: VMetaResp {
                    expires_at: e.expires_at,
                    tag: e.tag,
                },
            })
            .collect())
    }

    /// Commit the transaction. A no-op when no frame was ever sent.
    pub async fn commit(&mut self) -> Result<(), ClientError> {
        if self.finished {
            return Ok(());
        }
        if !self.started {
            self.finish();
            return Ok(());
        }
        let resp = self.request(OP_COMMIT, Vec::new(), true).await;
        self.finish();
        status_to_result(decode_status(&resp?.payload)?)
    }

    /// Discard the transaction. A no-op when no frame was ever sent.
    pub async fn discard(&mut self) -> Result<(), ClientError> {
        if self.finished {
            return Ok(());
        }
        if !self.started {
            self.finish();
            return Ok(());
        }
        let resp = self.request(OP_DISCARD, Vec::new(), true).await;
        self.finish();
        let _ack = resp?;
        Ok(())
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        // Stop routing responses to this stream. A started-but-unfinished
        // transaction is discarded server-side when the connection closes.
        self.inner.streams.remove(&self.stream_id);
    }
}

fn status_to_result(status: Status) -> Result<(), ClientError> {
    if status.is_ok() {
        return Ok(());
    }
    match status.to_kv_error() {
        Some(kv) => Err(ClientError::Kv(kv)),
        None => Err(ClientError::Remote {
            code: status.code,
            msg: status.msg,
        }),
    }
}
