//! Wires an in-memory provider to the file manager, starts a loopback
//! remote-mount server in front of it, and drives a few operations
//! through a `ClientPool` — a manual sanity check for the whole stack
//! without a real object store or a real mount point.

use std::sync::Arc;
use std::time::Duration;

use repertory_core::config::{Config, RemoteMountConfig};
use repertory_core::db::{InMemoryFileMgrDb, InMemoryMetaDb};
use repertory_core::events::{EventBus, Level};
use repertory_core::file_manager::FileManager;
use repertory_core::path::ApiPath;
use repertory_core::provider::{MemoryProvider, Provider};
use repertory_core::remote::{ClientPool, Handlers, OpCode, Server};
use tokio::net::TcpListener;

struct NoopCounter;

#[async_trait::async_trait]
impl repertory_core::cache_size_mgr::CacheDirCounter for NoopCounter {
    async fn file_count(&self) -> u64 {
        0
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
    let events = Arc::new(EventBus::new(Level::Debug));
    let cache_size = Arc::new(repertory_core::cache_size_mgr::CacheSizeMgr::new(
        0,
        16 * 1024 * 1024,
        events.clone(),
        Arc::new(NoopCounter),
    ));
    let config = Arc::new(Config::new(std::env::temp_dir().join("repertory-in-memory-demo"), 16 * 1024 * 1024));
    let file_manager = FileManager::new(
        config,
        provider.clone(),
        Arc::new(InMemoryMetaDb::new()),
        Arc::new(InMemoryFileMgrDb::new()),
        cache_size,
        events.clone(),
    );
    file_manager.upload_manager().spawn();

    let handlers = Handlers::new(file_manager, provider);

    let remote_config = RemoteMountConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        token: "demo-token".to_string(),
        pool_size: 4,
        connect_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        recv_timeout: Duration::from_secs(2),
        idle_expiry: Duration::from_secs(30),
    };
    let listener = TcpListener::bind(remote_config.bind_addr).await.expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener has a local address");

    let server = Server::new(handlers, remote_config.clone(), events);
    let server_for_serve = server.clone();
    tokio::spawn(async move {
        if let Err(e) = server_for_serve.serve(listener).await {
            eprintln!("server stopped: {e}");
        }
    });

    let client_config = RemoteMountConfig { bind_addr: addr, ..remote_config };
    let pool = ClientPool::new(client_config);
    let path = ApiPath::normalize("/hello.txt").unwrap();

    let mut create = repertory_core::packet::Packet::new();
    create.encode_string(path.as_str());
    pool.call(1, 0, OpCode::FuseCreate, create).await.expect("create over the wire");

    let mut write = repertory_core::packet::Packet::new();
    write.encode_string(path.as_str()).encode_u64(0).encode_bytes(b"hello, repertory");
    pool.call(1, 0, OpCode::FuseWrite, write).await.expect("write over the wire");

    let mut read = repertory_core::packet::Packet::new();
    read.encode_string(path.as_str()).encode_u64(0).encode_u32(16);
    let mut resp = pool.call(1, 0, OpCode::FuseRead, read).await.expect("read over the wire");
    let data = resp.decode_bytes().expect("response carries the bytes we wrote");

    println!("read back: {:?}", String::from_utf8_lossy(&data));

    let mut attr = repertory_core::packet::Packet::new();
    attr.encode_string(path.as_str());
    let mut resp = pool.call(1, 0, OpCode::FuseGetattr, attr).await.expect("getattr over the wire");
    let directory = resp.decode_bool().unwrap();
    let size = resp.decode_u64().unwrap();
    println!("/hello.txt: directory={directory} size={size}");

    server.stop();
}
