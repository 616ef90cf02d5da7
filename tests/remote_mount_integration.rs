//! Exercises the remote-mount protocol over a real loopback TCP socket:
//! handshake/auth, request/response round-trips, and per-thread FIFO
//! response ordering under concurrent calls.

use std::net::SocketAddr;
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

struct AlwaysOne;

#[async_trait::async_trait]
impl repertory_core::cache_size_mgr::CacheDirCounter for AlwaysOne {
    async fn file_count(&self) -> u64 {
        1
    }
}

async fn start_server(token: &str) -> (SocketAddr, Arc<dyn Provider>, Arc<Server>) {
    let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
    let events = Arc::new(EventBus::new(Level::Debug));
    let cache_size = Arc::new(repertory_core::cache_size_mgr::CacheSizeMgr::new(
        0,
        1 << 20,
        events.clone(),
        Arc::new(AlwaysOne),
    ));
    let config = Arc::new(Config::new(std::path::PathBuf::from("/tmp/repertory-remote-it"), 1 << 20));
    let file_manager = FileManager::new(
        config,
        provider.clone(),
        Arc::new(InMemoryMetaDb::new()),
        Arc::new(InMemoryFileMgrDb::new()),
        cache_size,
        events.clone(),
    );
    let handlers = Handlers::new(file_manager, provider.clone());

    let remote_config = RemoteMountConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        token: token.to_string(),
        pool_size: 4,
        connect_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        recv_timeout: Duration::from_secs(2),
        idle_expiry: Duration::from_secs(30),
    };

    let listener = TcpListener::bind(remote_config.bind_addr).await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    let server = Server::new(handlers, remote_config, events);
    let server_for_serve = server.clone();
    tokio::spawn(async move {
        let _ = server_for_serve.serve(listener).await;
    });

    (local_addr, provider, server)
}

fn pool_for(addr: SocketAddr, token: &str) -> Arc<ClientPool> {
    let config = RemoteMountConfig {
        bind_addr: addr,
        token: token.to_string(),
        pool_size: 4,
        connect_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        recv_timeout: Duration::from_secs(2),
        idle_expiry: Duration::from_secs(30),
    };
    ClientPool::new(config)
}

#[tokio::test]
async fn create_write_read_round_trip_over_the_wire() {
    let (addr, _provider, _server) = start_server("s3cret").await;
    let pool = pool_for(addr, "s3cret");
    let path = ApiPath::normalize("/remote.txt").unwrap();

    let mut create_body = repertory_core::packet::Packet::new();
    create_body.encode_string(path.as_str());
    pool.call(1, 0, OpCode::FuseCreate, create_body).await.unwrap();

    let mut write_body = repertory_core::packet::Packet::new();
    write_body.encode_string(path.as_str()).encode_u64(0).encode_bytes(b"hello");
    pool.call(1, 0, OpCode::FuseWrite, write_body).await.unwrap();

    let mut read_body = repertory_core::packet::Packet::new();
    read_body.encode_string(path.as_str()).encode_u64(0).encode_u32(5);
    let mut resp = pool.call(1, 0, OpCode::FuseRead, read_body).await.unwrap();
    let data = resp.decode_bytes().unwrap();
    assert_eq!(data, b"hello");
}

#[tokio::test]
async fn wrong_token_is_rejected_during_handshake() {
    let (addr, _provider, _server) = start_server("right-token").await;
    let pool = pool_for(addr, "wrong-token");

    let mut body = repertory_core::packet::Packet::new();
    body.encode_string("/whatever");
    let result = pool.call(1, 0, OpCode::FuseCreate, body).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn check_version_returns_a_nonzero_minimum_compatible_version() {
    let (addr, _provider, _server) = start_server("cow_moose_doge_chicken").await;
    let pool = pool_for(addr, "cow_moose_doge_chicken");

    let mut body = repertory_core::packet::Packet::new();
    body.encode_u32(1);
    let mut resp = pool.call(1, 0, OpCode::CheckVersion, body).await.unwrap();
    assert_ne!(resp.decode_u32().unwrap(), 0);
}

#[tokio::test]
async fn responses_for_the_same_thread_arrive_in_request_order() {
    let (addr, provider, _server) = start_server("fifo-token").await;
    let pool = pool_for(addr, "fifo-token");

    for i in 0..5u64 {
        let path = ApiPath::normalize(&format!("/f{i}")).unwrap();
        provider.create_file(&path).await.unwrap();
        provider.write_file(&path, 0, &i.to_be_bytes()).await.unwrap();
    }

    // Same (client_id, thread_id) for every call: the client pool reuses
    // one connection, so responses must come back in call order even
    // though the server dispatches them concurrently.
    for i in 0..5u64 {
        let path = ApiPath::normalize(&format!("/f{i}")).unwrap();
        let mut body = repertory_core::packet::Packet::new();
        body.encode_string(path.as_str()).encode_u64(0).encode_u32(8);
        let mut resp = pool.call(7, 0, OpCode::FuseRead, body).await.unwrap();
        let data = resp.decode_bytes().unwrap();
        assert_eq!(u64::from_be_bytes(data.try_into().unwrap()), i);
    }
}
