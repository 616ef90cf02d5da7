//! The packet client connection pool (spec.md C10, §4.10): reuses TCP
//! connections per `(client_id, thread_id)` key, reclaiming idle ones so a
//! burst of activity doesn't leave stale sockets open forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::server::token_key;
use super::{OpCode, PROTOCOL_VERSION};
use crate::config::RemoteMountConfig;
use crate::error::ApiError;
use crate::packet::{self, Packet};

struct PooledConnection {
    stream: TcpStream,
    last_used: Instant,
}

/// Keyed by `(client_id, thread_id)` so requests from the same logical
/// caller thread reuse the same connection and therefore observe FIFO
/// ordering for free; different threads get independent connections so one
/// slow request cannot head-of-line block another thread's traffic.
pub struct ClientPool {
    config: RemoteMountConfig,
    connections: Mutex<HashMap<(u32, u32), PooledConnection>>,
}

impl ClientPool {
    pub fn new(config: RemoteMountConfig) -> Arc<Self> {
        Arc::new(Self { config, connections: Mutex::new(HashMap::new()) })
    }

    /// Drops any pooled connection idle longer than the configured expiry.
    pub async fn remove_expired(&self) {
        let expiry = self.config.idle_expiry_clamped();
        let mut connections = self.connections.lock().await;
        connections.retain(|_, conn| conn.last_used.elapsed() < expiry);
    }

    async fn connect(&self) -> Result<TcpStream, ApiError> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(self.config.bind_addr))
            .await
            .map_err(|_| ApiError::CommError)?
            .map_err(|_| ApiError::CommError)?;
        stream.set_nodelay(true).map_err(|_| ApiError::CommError)?;
        self.handshake(stream).await
    }

    async fn handshake(&self, mut stream: TcpStream) -> Result<TcpStream, ApiError> {
        let mut version_buf = [0u8; 4];
        BigEndian::write_u32(&mut version_buf, PROTOCOL_VERSION);
        stream.write_all(&version_buf).await.map_err(|_| ApiError::CommError)?;

        let token_sealed = packet::seal(&token_key(&self.config.token), self.config.token.as_bytes());
        let mut len_buf = [0u8; 4];
        BigEndian::write_u32(&mut len_buf, token_sealed.len() as u32);
        stream.write_all(&len_buf).await.map_err(|_| ApiError::CommError)?;
        stream.write_all(&token_sealed).await.map_err(|_| ApiError::CommError)?;

        let mut ack = [0u8; 1];
        stream.read_exact(&mut ack).await.map_err(|_| ApiError::CommError)?;
        if ack[0] != 1 {
            return Err(ApiError::IncompatibleVersion);
        }

        // spec.md §4.11: the first request on a connection must be
        // `check_version`, so every freshly handshaken connection sends one
        // here rather than leaving it to the first caller.
        let mut version_body = Packet::new();
        version_body.encode_u32(PROTOCOL_VERSION);
        self.call_on(&mut stream, 0, 0, OpCode::CheckVersion, version_body).await?;

        Ok(stream)
    }

    /// Sends `op`'s request body and returns the decoded response body,
    /// reusing a pooled connection for `(client_id, thread_id)` or opening
    /// a fresh one on first use or after a prior failure.
    pub async fn call(
        &self,
        client_id: u32,
        thread_id: u32,
        op: OpCode,
        body: Packet,
    ) -> Result<Packet, ApiError> {
        let key = (client_id, thread_id);
        let mut stream = {
            let mut connections = self.connections.lock().await;
            match connections.remove(&key) {
                Some(conn) => conn.stream,
                None => self.connect().await?,
            }
        };

        let result = self.call_on(&mut stream, client_id, thread_id, op, body).await;

        if result.is_ok() {
            let mut connections = self.connections.lock().await;
            connections.insert(key, PooledConnection { stream, last_used: Instant::now() });
        }
        result
    }

    async fn call_on(
        &self,
        stream: &mut TcpStream,
        client_id: u32,
        thread_id: u32,
        op: OpCode,
        body: Packet,
    ) -> Result<Packet, ApiError> {
        let mut frame = Packet::new();
        frame
            .encode_u32(client_id)
            .encode_u32(thread_id)
            .encode_u32(num_traits::ToPrimitive::to_u32(&op).unwrap_or_default());
        let body_bytes = body.into_bytes();
        // request bodies are appended raw (not length-prefixed twice) since
        // `encode_top` below prefixes the whole frame.
        let mut full = frame.into_bytes();
        full.extend_from_slice(&body_bytes);
        let mut frame = Packet::from_bytes(full);
        frame.encode_top();

        tokio::time::timeout(self.config.send_timeout, stream.write_all(frame.as_bytes()))
            .await
            .map_err(|_| ApiError::CommError)?
            .map_err(|_| ApiError::CommError)?;

        let mut len_buf = [0u8; 4];
        tokio::time::timeout(self.config.recv_timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| ApiError::CommError)?
            .map_err(|_| ApiError::CommError)?;
        let len = BigEndian::read_u32(&len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.map_err(|_| ApiError::CommError)?;

        let mut response = Packet::from_bytes(buf);
        let _thread_id = response.decode_u32().map_err(ApiError::from)?;
        let error = response.decode_i32().map_err(ApiError::from)?;
        let payload = response.decode_bytes().map_err(ApiError::from)?;

        if error == 0 {
            Ok(Packet::from_bytes(payload))
        } else {
            Err(ApiError::from_wire_code(error))
        }
    }

    /// Probes whether a pooled connection for `key` still looks alive, via a
    /// non-blocking read attempt rather than an elapsed-time guess (spec.md
    /// C10's liveness probe). The request/response protocol never has the
    /// server send unsolicited bytes on an idle connection, so `WouldBlock`
    /// (nothing to read, socket still open) is the only "alive" outcome;
    /// `Ok(0)` is an orderly peer close and any other read is treated as a
    /// corrupt connection, not a live one.
    pub async fn is_socket_still_alive(&self, client_id: u32, thread_id: u32) -> bool {
        let mut connections = self.connections.lock().await;
        let Some(conn) = connections.get_mut(&(client_id, thread_id)) else {
            return false;
        };
        let mut probe = [0u8; 1];
        match conn.stream.try_read(&mut probe) {
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
            _ => false,
        }
    }
}
