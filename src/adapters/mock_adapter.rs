//! Mock datagram adapter for testing
//!
//! Simulates the scope firmware without a network:
//! - Datagrams are only released after the trigger code arrives, and a reset
//!   code re-arms the device the same way the firmware does
//! - Scripted payloads are dripped out at a fixed interval on the tokio clock,
//!   so paused-time tests run instantly
//! - Stray datagrams from other hosts and receive failures can be injected
//! - Every control datagram is logged for test verification

use super::{AdapterFactory, DatagramAdapter, RESET_COMMAND, TRIGGER_COMMAND};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A datagram the mock device will emit once triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedDatagram {
    /// Sender override; `None` means the device itself.
    pub from: Option<SocketAddr>,
    /// Datagram payload.
    pub payload: Vec<u8>,
}

/// A control datagram sent by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    /// Address the session sent to.
    pub target: SocketAddr,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Build the firmware's test ramp: sample `i` carries code `i % 4096`.
pub fn ramp_payload(first_sample: usize, samples: usize) -> Vec<u8> {
    (first_sample..first_sample + samples)
        .flat_map(|i| ((i % 4096) as u16).to_le_bytes())
        .collect()
}

/// Local port reported by the `index`th adapter, cycling through the
/// dynamic range 49152-65535.
fn local_port(index: usize) -> u16 {
    49_152 + (index % 16_384) as u16
}

#[derive(Debug, Clone, Default)]
struct MockScript {
    datagrams: Vec<ScriptedDatagram>,
    interval: Duration,
    fail_bind: bool,
    fail_receive_after: Option<usize>,
}

/// Factory handing out [`MockAdapter`]s that all replay the same script.
///
/// Clones share the open counter and the sent-datagram log.
///
/// # Example
///
/// ```
/// use scope_daq::adapters::MockAdapterFactory;
/// use std::time::Duration;
///
/// let factory = MockAdapterFactory::new("192.168.4.1:4210".parse().unwrap())
///     .with_ramp(4, 1500)
///     .with_interval(Duration::from_millis(1));
/// assert_eq!(factory.opened(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct MockAdapterFactory {
    device: SocketAddr,
    script: MockScript,
    opened: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<SentDatagram>>>,
}

impl MockAdapterFactory {
    /// Create a factory for a device at `device` with an empty script.
    pub fn new(device: SocketAddr) -> Self {
        Self {
            device,
            script: MockScript::default(),
            opened: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append device datagrams to the script.
    pub fn with_datagrams<I>(mut self, payloads: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        self.script
            .datagrams
            .extend(payloads.into_iter().map(|payload| ScriptedDatagram {
                from: None,
                payload,
            }));
        self
    }

    /// Append `count` datagrams of `size` bytes carrying one continuous ramp.
    pub fn with_ramp(self, count: usize, size: usize) -> Self {
        let total = count * size;
        let mut bytes = ramp_payload(0, total.div_ceil(2));
        bytes.truncate(total);
        let chunks: Vec<Vec<u8>> = bytes.chunks(size.max(1)).map(<[u8]>::to_vec).collect();
        self.with_datagrams(chunks)
    }

    /// Append a datagram that appears to come from another host.
    pub fn with_stray(mut self, from: SocketAddr, payload: Vec<u8>) -> Self {
        self.script.datagrams.push(ScriptedDatagram {
            from: Some(from),
            payload,
        });
        self
    }

    /// Delay before each datagram is delivered.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.script.interval = interval;
        self
    }

    /// Make every `open` fail as if the port could not be bound.
    pub fn failing_bind(mut self) -> Self {
        self.script.fail_bind = true;
        self
    }

    /// Fail the receive call after `delivered` datagrams.
    pub fn failing_receive_after(mut self, delivered: usize) -> Self {
        self.script.fail_receive_after = Some(delivered);
        self
    }

    /// Number of adapters opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// All control datagrams sent by any adapter from this factory.
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.sent.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Total payload bytes the script will deliver from the device.
    pub fn scripted_bytes(&self) -> usize {
        self.script
            .datagrams
            .iter()
            .filter(|d| d.from.is_none())
            .map(|d| d.payload.len())
            .sum()
    }
}

#[async_trait]
impl AdapterFactory for MockAdapterFactory {
    async fn open(&self) -> AppResult<Box<dyn DatagramAdapter>> {
        if self.script.fail_bind {
            return Err(DaqError::Bind(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "Injected bind failure",
            )));
        }
        let index = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockAdapter {
            device: self.device,
            local: SocketAddr::from((Ipv4Addr::LOCALHOST, local_port(index))),
            pending: self.script.datagrams.iter().cloned().collect(),
            interval: self.script.interval,
            fail_receive_after: self.script.fail_receive_after,
            triggered: false,
            delivered: 0,
            sent: Arc::clone(&self.sent),
        }))
    }
}

/// Scripted stand-in for the scope device.
#[derive(Debug)]
pub struct MockAdapter {
    device: SocketAddr,
    local: SocketAddr,
    pending: VecDeque<ScriptedDatagram>,
    interval: Duration,
    fail_receive_after: Option<usize>,
    triggered: bool,
    delivered: usize,
    sent: Arc<Mutex<Vec<SentDatagram>>>,
}

#[async_trait]
impl DatagramAdapter for MockAdapter {
    async fn send_to(&mut self, payload: &[u8], target: SocketAddr) -> AppResult<()> {
        if let Ok(mut log) = self.sent.lock() {
            log.push(SentDatagram {
                target,
                payload: payload.to_vec(),
            });
        }
        if target == self.device {
            if payload == RESET_COMMAND {
                self.triggered = false;
            } else if payload == TRIGGER_COMMAND {
                self.triggered = true;
            }
        }
        Ok(())
    }

    async fn recv_from(&mut self, buffer: &mut [u8]) -> AppResult<(usize, SocketAddr)> {
        if !self.triggered {
            return std::future::pending().await;
        }
        if self.fail_receive_after == Some(self.delivered) {
            return Err(DaqError::Receive(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Injected receive failure",
            )));
        }
        if self.pending.is_empty() {
            return std::future::pending().await;
        }
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        let Some(datagram) = self.pending.pop_front() else {
            return std::future::pending().await;
        };
        let n = datagram.payload.len().min(buffer.len());
        buffer[..n].copy_from_slice(&datagram.payload[..n]);
        self.delivered += 1;
        Ok((n, datagram.from.unwrap_or(self.device)))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }
}
