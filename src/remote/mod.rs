//! The remote-mount packet protocol (spec.md C10/C11, §4.10-§4.11): a
//! length-prefixed, token-sealed request/response protocol a thin client
//! drive can speak to re-export a mount over TCP.

pub mod client_pool;
pub mod handlers;
pub mod server;

pub use client_pool::ClientPool;
pub use handlers::{Handlers, OpCode};
pub use server::Server;

use crate::packet::Packet;

/// One request frame: `client_id`/`thread_id` identify the caller and its
/// calling thread so responses can be matched back up and per-thread
/// ordering preserved (spec.md §5 "per-(client_id, thread_id) FIFO").
#[derive(Debug, Clone)]
pub struct Request {
    pub client_id: u32,
    pub thread_id: u32,
    pub op: OpCode,
    pub body: Packet,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub thread_id: u32,
    pub error: i32,
    pub body: Packet,
}

pub(crate) const PROTOCOL_VERSION: u32 = 1;

/// The oldest client `check_version` request this server still accepts
/// (spec.md §4.11 "returns the minimum compatible client version").
pub(crate) const MIN_COMPATIBLE_VERSION: u32 = 1;
