//! UDP adapter backed by `tokio::net::UdpSocket`.

use super::{AdapterFactory, DatagramAdapter};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

/// A UDP socket bound to an ephemeral local port.
#[derive(Debug)]
pub struct UdpAdapter {
    socket: UdpSocket,
}

impl UdpAdapter {
    /// Bind to `ip` on a port chosen by the OS.
    pub async fn bind_ephemeral(ip: IpAddr) -> AppResult<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(ip, 0))
            .await
            .map_err(DaqError::Bind)?;
        if let Ok(local) = socket.local_addr() {
            debug!("UDP adapter bound to {}", local);
        }
        Ok(Self { socket })
    }
}

#[async_trait]
impl DatagramAdapter for UdpAdapter {
    async fn send_to(&mut self, payload: &[u8], target: SocketAddr) -> AppResult<()> {
        self.socket
            .send_to(payload, target)
            .await
            .map_err(|source| DaqError::Send { target, source })?;
        Ok(())
    }

    async fn recv_from(&mut self, buffer: &mut [u8]) -> AppResult<(usize, SocketAddr)> {
        self.socket.recv_from(buffer).await.map_err(DaqError::Receive)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}

/// Opens one [`UdpAdapter`] per session.
#[derive(Debug, Clone)]
pub struct UdpAdapterFactory {
    bind_ip: IpAddr,
}

impl UdpAdapterFactory {
    /// Bind on the unspecified address of the device's address family.
    pub fn for_device(device: SocketAddr) -> Self {
        let bind_ip = match device {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self { bind_ip }
    }

    /// Bind on a specific local interface.
    pub fn with_bind_ip(bind_ip: IpAddr) -> Self {
        Self { bind_ip }
    }
}

#[async_trait]
impl AdapterFactory for UdpAdapterFactory {
    async fn open(&self) -> AppResult<Box<dyn DatagramAdapter>> {
        Ok(Box::new(UdpAdapter::bind_ephemeral(self.bind_ip).await?))
    }
}
