//! One acquisition against the device.
//!
//! ```text
//! Idle -> [Resetting ->] Triggering -> Receiving -> Completed
//!                                               \-> TimedOut
//! any non-terminal state -- transport error --> Failed
//! ```
//!
//! The session owns its adapter for the whole run. The adapter is dropped when
//! `run` returns, whichever way it returns, which closes the socket.
//!
//! The device protocol has no end-of-stream marker. A capture ends when the
//! byte count reaches the target or when the single receive deadline passes,
//! so a lost final datagram always costs the full timeout.

use super::{CaptureOutcome, RawCapture, SessionState};
use crate::adapters::{AdapterFactory, DatagramAdapter, RESET_COMMAND, TRIGGER_COMMAND};
use crate::config::ScopeConfig;
use crate::error::AppResult;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Sink for datagram payloads forwarded while the capture is still running.
pub type LiveFeed = mpsc::UnboundedSender<Bytes>;

/// State machine for a single capture.
#[derive(Debug)]
pub struct CaptureSession {
    id: Uuid,
    config: Arc<ScopeConfig>,
    state: SessionState,
    history: Vec<SessionState>,
}

impl CaptureSession {
    /// Create an idle session with a random id.
    pub fn new(config: Arc<ScopeConfig>) -> Self {
        Self::with_id(Uuid::new_v4(), config)
    }

    /// Create an idle session with a caller-chosen id.
    pub fn with_id(id: Uuid, config: Arc<ScopeConfig>) -> Self {
        Self {
            id,
            config,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
        }
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Run the handshake and receive phase to a terminal state.
    ///
    /// `live`, when given, receives a copy of every accepted payload as it
    /// arrives. It is dropped when the session ends, which closes the feed.
    ///
    /// A timeout is not an error: the partial buffer comes back with
    /// [`CaptureOutcome::TimedOut`]. Transport errors move the session to
    /// [`SessionState::Failed`] and are returned.
    #[instrument(name = "capture_session", skip_all, fields(session = %self.id))]
    pub async fn run(
        &mut self,
        factory: &dyn AdapterFactory,
        live: Option<LiveFeed>,
    ) -> AppResult<RawCapture> {
        let result = self.acquire(factory, live).await;
        match &result {
            Ok(capture) => self.transition(capture.outcome().into()),
            Err(e) => {
                error!("Capture session failed: {}", e);
                self.transition(SessionState::Failed);
            }
        }
        result
    }

    async fn acquire(
        &mut self,
        factory: &dyn AdapterFactory,
        live: Option<LiveFeed>,
    ) -> AppResult<RawCapture> {
        let started_at = Utc::now();
        let device = self.config.device_socket_addr();
        let mut adapter = factory.open().await?;

        if self.config.reset_phase {
            self.transition(SessionState::Resetting);
            info!("Sending reset signal to {}", device);
            adapter.send_to(RESET_COMMAND, device).await?;
            tokio::time::sleep(self.config.reset_settle_delay()).await;
        }

        self.transition(SessionState::Triggering);
        info!("Sending trigger signal to {}", device);
        adapter.send_to(TRIGGER_COMMAND, device).await?;

        self.transition(SessionState::Receiving);
        let (data, datagrams, outcome) = self.receive(adapter.as_mut(), live.as_ref()).await?;

        info!(
            "Total received: {} bytes in {} datagrams ({:?})",
            data.len(),
            datagrams,
            outcome
        );

        Ok(RawCapture::new(
            self.id,
            data,
            outcome,
            datagrams,
            self.config.target_capture_bytes,
            started_at,
        ))
    }

    async fn receive(
        &self,
        adapter: &mut dyn DatagramAdapter,
        live: Option<&LiveFeed>,
    ) -> AppResult<(Bytes, usize, CaptureOutcome)> {
        let target = self.config.target_capture_bytes;
        let device = self.config.device_socket_addr();
        let deadline = Instant::now() + self.config.receive_timeout();

        let mut buffer = vec![0u8; self.config.max_datagram_size];
        let mut data = BytesMut::with_capacity(target + self.config.max_datagram_size);
        let mut datagrams = 0usize;
        let mut live = live;

        let outcome = loop {
            if data.len() >= target {
                break CaptureOutcome::Completed;
            }
            // checked here as well so a steady stream cannot outrun the deadline
            if Instant::now() >= deadline {
                break CaptureOutcome::TimedOut;
            }

            let Ok(received) = timeout_at(deadline, adapter.recv_from(&mut buffer)).await else {
                break CaptureOutcome::TimedOut;
            };
            let (n, from) = received?;

            if self.config.filter_device_source && from != device {
                warn!("Dropping {} byte datagram from unexpected sender {}", n, from);
                continue;
            }

            data.extend_from_slice(&buffer[..n]);
            datagrams += 1;
            debug!("Received {} bytes from {}, total: {}", n, from, data.len());

            if let Some(feed) = live {
                if feed.send(Bytes::copy_from_slice(&buffer[..n])).is_err() {
                    warn!("Live dispatcher went away; continuing capture without it");
                    live = None;
                }
            }
        };

        if outcome == CaptureOutcome::TimedOut {
            warn!(
                "UDP receive timeout after {:?} with {} of {} bytes",
                self.config.receive_timeout(),
                data.len(),
                target
            );
        }

        Ok((data.freeze(), datagrams, outcome))
    }
}
