//! Datagram adapter implementations
//!
//! This module contains the transport seam between a capture session and the
//! device link. A session asks an [`AdapterFactory`] for a fresh
//! [`DatagramAdapter`] every time it starts, so stale datagrams from an earlier
//! capture can never land in a new buffer.

use crate::error::AppResult;
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::SocketAddr;

pub mod mock_adapter;
pub mod udp_adapter;

pub use mock_adapter::{MockAdapter, MockAdapterFactory};
pub use udp_adapter::{UdpAdapter, UdpAdapterFactory};

/// Control code that clears the device's capture state.
pub const RESET_COMMAND: &[u8] = b"r";

/// Control code that starts a capture on the device.
pub const TRIGGER_COMMAND: &[u8] = b"t";

/// Async datagram socket owned by exactly one capture session.
///
/// `recv_from` must be cancel safe: the session races it against the receive
/// deadline and drops the future when the deadline wins.
#[async_trait]
pub trait DatagramAdapter: Debug + Send {
    /// Send one datagram to `target`.
    async fn send_to(&mut self, payload: &[u8], target: SocketAddr) -> AppResult<()>;

    /// Wait for the next datagram from any sender.
    async fn recv_from(&mut self, buffer: &mut [u8]) -> AppResult<(usize, SocketAddr)>;

    /// Local address the adapter is bound to, when it has one.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Opens a new adapter per capture session.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Bind a fresh adapter.
    async fn open(&self) -> AppResult<Box<dyn DatagramAdapter>>;
}
