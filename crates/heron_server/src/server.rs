//! TCP accept loop and per-connection frame pump.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use heron_common::config::ServerConfig;
use heron_common::error::ProtocolError;
use heron_kv::KvEngine;
use heron_protocol::codec::{decode_frame, encode_frame};

use crate::dispatch::{dispatch, StreamTable};

pub struct Server {
    engine: Arc<dyn KvEngine>,
    config: ServerConfig,
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(engine: Arc<dyn KvEngine>, config: ServerConfig) -> Self {
        Self {
            engine,
            config,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run_with_shutdown(
        &self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        tracing::info!(addr = %self.config.listen_addr, "kv server listening");
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already-bound listener. On shutdown the
    /// engine is closed first, so in-flight transactions fail their commits
    /// and get discarded as connections drain.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> std::io::Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, addr) = result?;
                    if self.config.max_connections > 0
                        && self.active_connections.load(Ordering::Relaxed)
                            >= self.config.max_connections
                    {
                        tracing::warn!(%addr, "connection limit reached, rejecting");
                        continue;
                    }
                    tracing::debug!(%addr, "connection accepted");
                    self.spawn_connection(stream);
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, closing engine");
                    if let Err(e) = self.engine.close() {
                        tracing::error!(error = %e, "close engine");
                    }
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream) {
        let engine = self.engine.clone();
        let active = self.active_connections.clone();
        active.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(e) = run_connection(engine, stream).await {
                tracing::debug!(error = %e, "connection ended");
            }
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

/// Pump frames on one connection. Transactions left open when the peer goes
/// away are discarded with the stream table.
async fn run_connection(engine: Arc<dyn KvEngine>, mut socket: TcpStream) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let mut streams = StreamTable::new();

    loop {
        loop {
            match decode_frame(&buf) {
                Ok((frame, consumed)) => {
                    buf.advance(consumed);
                    let response = dispatch(&*engine, &mut streams, &frame);
                    socket.write_all(&encode_frame(&response)).await?;
                }
                Err(ProtocolError::Truncated { .. }) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "protocol error, dropping connection");
                    return Ok(());
                }
            }
        }

        if socket.read_buf(&mut buf).await? == 0 {
            // Peer closed; open transactions are discarded by the table.
            return Ok(());
        }
    }
}
