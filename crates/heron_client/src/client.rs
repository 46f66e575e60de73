use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

use heron_common::error::{ClientError, ProtocolError};
use heron_kv::{Entry, ScanOptions, VMetaReq, VMetaResp};
use heron_protocol::codec::decode_frame;
use heron_protocol::types::Frame;

use crate::txn::Txn;

pub(crate) struct ClientInner {
    pub(crate) writer: tokio::sync::Mutex<OwnedWriteHalf>,
    /// Response routing: stream id → pending receiver.
    pub(crate) streams: DashMap<u64, mpsc::UnboundedSender<Frame>>,
    next_stream_id: AtomicU64,
}

/// Handle to one server connection. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        let (read_half, write_half) = socket.into_split();
        let inner = Arc::new(ClientInner {
            writer: tokio::sync::Mutex::new(write_half),
            streams: DashMap::new(),
            next_stream_id: AtomicU64::new(1),
        });
        // Connection driver: routes response frames to their streams until
        // the server goes away.
        tokio::spawn(read_loop(inner.clone(), read_half));
        Ok(Self { inner })
    }

    fn begin(&self, update: bool) -> Txn {
        let stream_id = self.inner.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.streams.insert(stream_id, tx);
        Txn::new(self.inner.clone(), stream_id, rx, update)
    }

    /// Start an interactive read-write transaction.
    pub fn begin_update(&self) -> Txn {
        self.begin(true)
    }

    /// Start an interactive read-only transaction.
    pub fn begin_view(&self) -> Txn {
        self.begin(false)
    }

    /// Run `f` in a read-write transaction: commit on success, discard on
    /// error.
    pub async fn update<F>(&self, f: F) -> Result<(), ClientError>
    where
        F: for<'t> FnOnce(&'t mut Txn) -> BoxFuture<'t, Result<(), ClientError>>,
    {
        let mut txn = self.begin_update();
        match f(&mut txn).await {
            Ok(()) => txn.commit().await,
            Err(e) => {
                let _ = txn.discard().await;
                Err(e)
            }
        }
    }

    /// Run `f` in a read-only transaction, always discarded afterwards.
    pub async fn view<F>(&self, f: F) -> Result<(), ClientError>
    where
        F: for<'t> FnOnce(&'t mut Txn) -> BoxFuture<'t, Result<(), ClientError>>,
    {
        let mut txn = self.begin_view();
        let result = f(&mut txn).await;
        let discard_result = txn.discard().await;
        result.and(discard_result)
    }

    // ── One-shot verbs ───────────────────────────────────────────────────

    pub async fn set(
        &self,
        key: &[u8],
        value: &[u8],
        meta: Option<VMetaReq>,
    ) -> Result<(), ClientError> {
        let mut txn = self.begin_update();
        txn.set(key, value, meta).await?;
        txn.commit().await
    }

    pub async fn delete(&self, key: &[u8]) -> Result<(), ClientError> {
        let mut txn = self.begin_update();
        txn.delete(key).await?;
        txn.commit().await
    }

    /// Read one key. A single end-flagged frame; no commit round trip.
    pub async fn get(&self, key: &[u8]) -> Result<(Vec<u8>, VMetaResp), ClientError> {
        self.begin_view().get_oneshot(key).await
    }

    pub async fn exists(&self, key: &[u8]) -> Result<bool, ClientError> {
        self.begin_view().exists_oneshot(key).await
    }

    pub async fn scan(&self, opts: ScanOptions) -> Result<Vec<Entry>, ClientError> {
        self.begin_view().scan_oneshot(opts).await
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut read_half: OwnedReadHalf) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        loop {
            match decode_frame(&buf) {
                Ok((frame, consumed)) => {
                    buf.advance(consumed);
                    if let Some(tx) = inner.streams.get(&frame.stream_id) {
                        let _ = tx.send(frame);
                    }
                }
                Err(ProtocolError::Truncated { .. }) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "protocol error from server");
                    inner.streams.clear();
                    return;
                }
            }
        }
        match read_half.read_buf(&mut buf).await {
            Ok(0) | Err(_) => {
                // Dropping the senders wakes every pending transaction with
                // a closed-channel error.
                inner.streams.clear();
                return;
            }
            Ok(_) => {}
        }
    }
}
