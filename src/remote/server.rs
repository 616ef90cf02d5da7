//! The packet server (spec.md C11, §4.11): accepts connections, verifies
//! the shared token, then splits each connection into a read task, a
//! bounded-concurrency dispatch task, and a write task connected by mpsc
//! channels, each task owning one direction of the connection so a slow
//! handler never blocks reads or writes on the same socket. Dispatch also
//! enforces `pool_size` concurrency and per-thread_id response order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, warn};

use super::handlers::Handlers;
use super::{OpCode, Request, Response, PROTOCOL_VERSION};
use crate::config::RemoteMountConfig;
use crate::events::{Event, EventBus};
use crate::packet::{self, Packet};

pub struct Server {
    handlers: Arc<Handlers>,
    config: RemoteMountConfig,
    events: Arc<EventBus>,
    stop: Arc<AtomicBool>,
}

impl Server {
    pub fn new(handlers: Arc<Handlers>, config: RemoteMountConfig, events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { handlers, config, events, stop: Arc::new(AtomicBool::new(false)) })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        while !self.stop.load(Ordering::SeqCst) {
            let (socket, peer) = listener.accept().await?;
            socket.set_nodelay(true)?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(socket).await {
                    debug!(%peer, error = %e, "remote-mount connection closed");
                }
            });
        }
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, mut socket: TcpStream) -> std::io::Result<()> {
        if !self.authenticate(&mut socket).await {
            self.events.raise(Event::PacketAuthFailure { peer: socket.peer_addr().map(|a| a.to_string()).unwrap_or_default() });
            return Ok(());
        }

        let (read_half, write_half) = socket.into_split();
        let (request_tx, request_rx) = mpsc::unbounded_channel::<Request>();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<Response>();

        let read_task = tokio::spawn(read_loop(read_half, request_tx));
        let dispatch_task = tokio::spawn(dispatch_loop(
            self.handlers.clone(),
            request_rx,
            response_tx,
            self.config.pool_size,
        ));
        let write_task = tokio::spawn(write_loop(write_half, response_rx));

        let _ = tokio::join!(read_task, dispatch_task, write_task);
        Ok(())
    }

    /// A minimal handshake: client sends `PROTOCOL_VERSION` (u32) then the
    /// token sealed under itself; server checks the version and that the
    /// token round-trips.
    async fn authenticate(&self, socket: &mut TcpStream) -> bool {
        let mut version_buf = [0u8; 4];
        if socket.read_exact(&mut version_buf).await.is_err() {
            return false;
        }
        if BigEndian::read_u32(&version_buf) != PROTOCOL_VERSION {
            return false;
        }

        let mut len_buf = [0u8; 4];
        if socket.read_exact(&mut len_buf).await.is_err() {
            return false;
        }
        let len = BigEndian::read_u32(&len_buf) as usize;
        if len > packet::MAX_STRING_LEN {
            return false;
        }
        let mut sealed = vec![0u8; len];
        if socket.read_exact(&mut sealed).await.is_err() {
            return false;
        }

        let token_key = token_key(&self.config.token);
        let ok = packet::open(&token_key, &sealed).map(|p| p == self.config.token.as_bytes()).unwrap_or(false);
        let ack: u8 = if ok { 1 } else { 0 };
        let _ = socket.write_all(&[ack]).await;
        ok
    }
}

pub(crate) fn token_key(token: &str) -> [u8; 32] {
    use blake2::digest::{Update, VariableOutput};
    use blake2::Blake2bVar;
    let mut hasher = Blake2bVar::new(32).expect("32 is a valid BLAKE2b output length");
    hasher.update(token.as_bytes());
    let mut out = [0u8; 32];
    hasher.finalize_variable(&mut out).expect("output buffer matches requested length");
    out
}

async fn read_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    request_tx: mpsc::UnboundedSender<Request>,
) {
    let mut first_request = true;
    loop {
        let mut len_buf = [0u8; 4];
        if read_half.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let len = BigEndian::read_u32(&len_buf) as usize;
        let mut buf = vec![0u8; len];
        if read_half.read_exact(&mut buf).await.is_err() {
            return;
        }

        let mut frame = Packet::from_bytes(buf);
        let Ok(client_id) = frame.decode_u32() else { return };
        let Ok(thread_id) = frame.decode_u32() else { return };
        let Ok(op_code) = frame.decode_u32() else { return };
        let Some(op) = num_traits::FromPrimitive::from_u32(op_code) else { return };

        // spec.md §4.11: the first request after authentication must be
        // `check_version`; any other opcode here means a client that skipped
        // the handshake, and the connection is dropped rather than served.
        if first_request && op != OpCode::CheckVersion {
            return;
        }
        first_request = false;

        if request_tx.send(Request { client_id, thread_id, op, body: frame }).is_err() {
            return;
        }
    }
}

/// Dispatches requests with at most `pool_size` handlers running at once,
/// while keeping responses for a given `thread_id` in the order their
/// requests arrived — the permit guards concurrency, a small ordering map
/// guards ordering (spec.md §5, §4.11).
async fn dispatch_loop(
    handlers: Arc<Handlers>,
    mut request_rx: mpsc::UnboundedReceiver<Request>,
    response_tx: mpsc::UnboundedSender<Response>,
    pool_size: usize,
) {
    let semaphore = Arc::new(Semaphore::new(pool_size.max(1)));
    // Per-thread_id queue of completed-but-not-yet-sent responses, drained
    // in order as the head of each thread's sequence completes.
    let pending: Arc<Mutex<HashMap<u32, u64>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut next_seq: HashMap<u32, u64> = HashMap::new();

    while let Some(request) = request_rx.recv().await {
        let seq = {
            let counter = next_seq.entry(request.thread_id).or_insert(0);
            let seq = *counter;
            *counter += 1;
            seq
        };
        {
            pending.lock().await.entry(request.thread_id).or_insert(0);
        }

        let handlers = handlers.clone();
        let response_tx = response_tx.clone();
        let semaphore = semaphore.clone();
        let pending = pending.clone();
        let thread_id = request.thread_id;

        tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore is never closed");
            let mut body = request.body;
            let op = request.op;
            let result = handlers.dispatch(op, &mut body).await;

            // Block this task until it's this request's turn to be
            // written, preserving per-thread_id FIFO order even though
            // handlers may finish out of order under concurrency.
            loop {
                let mut guard = pending.lock().await;
                if *guard.get(&thread_id).unwrap_or(&0) == seq {
                    break;
                }
                drop(guard);
                tokio::task::yield_now().await;
            }

            let response = match result {
                Ok(payload) => Response { thread_id, error: 0, body: payload },
                Err(e) => Response { thread_id, error: e.wire_code(), body: Packet::new() },
            };
            let _ = response_tx.send(response);

            let mut guard = pending.lock().await;
            guard.insert(thread_id, seq + 1);
        });
    }
}

async fn write_loop(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut response_rx: mpsc::UnboundedReceiver<Response>,
) {
    while let Some(response) = response_rx.recv().await {
        let mut frame = Packet::new();
        frame.encode_u32(response.thread_id).encode_i32(response.error);
        let body_bytes = response.body.into_bytes();
        frame.encode_bytes(&body_bytes);
        frame.encode_top();

        if write_half.write_all(frame.as_bytes()).await.is_err() {
            warn!("remote-mount write failed, dropping connection");
            return;
        }
    }
}
