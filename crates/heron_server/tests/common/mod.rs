#![allow(dead_code)]

pub use std::sync::Arc;

use std::net::SocketAddr;

use tokio::net::TcpListener;

use heron_common::config::ServerConfig;
use heron_kv::provider::MemoryEngine;
use heron_kv::KvEngine;
use heron_server::Server;

/// Bind an ephemeral port, spawn the server on it, and hand back the
/// address plus the engine for direct inspection.
pub async fn start_server() -> (SocketAddr, Arc<dyn KvEngine>) {
    let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        listen_addr: addr.to_string(),
        max_connections: 0,
    };
    let server = Server::new(engine.clone(), config);
    tokio::spawn(async move {
        let _ = server.serve(listener, std::future::pending::<()>()).await;
    });
    (addr, engine)
}
