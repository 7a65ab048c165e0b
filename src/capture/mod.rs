//! Capture data model.
//!
//! A [`RawCapture`] is the byte buffer produced by one trigger-and-receive cycle.
//! It is immutable once the session that filled it has ended, and cheap to clone
//! because the payload lives in a shared [`Bytes`] buffer.

use crate::decoder;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod session;

pub use session::CaptureSession;

/// How a capture session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// The buffer reached the target size.
    Completed,
    /// The receive deadline passed first. The buffer holds whatever arrived.
    TimedOut,
}

/// Phases of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no socket yet.
    Idle,
    /// Reset code sent, waiting for the device to settle.
    Resetting,
    /// Sending the trigger code.
    Triggering,
    /// Collecting datagrams until the target size or the deadline.
    Receiving,
    /// Terminal: target size reached.
    Completed,
    /// Terminal: deadline reached first.
    TimedOut,
    /// Terminal: the transport failed.
    Failed,
}

impl SessionState {
    /// True for states a session never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::TimedOut | SessionState::Failed
        )
    }
}

impl From<CaptureOutcome> for SessionState {
    fn from(outcome: CaptureOutcome) -> Self {
        match outcome {
            CaptureOutcome::Completed => SessionState::Completed,
            CaptureOutcome::TimedOut => SessionState::TimedOut,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Resetting => "resetting",
            SessionState::Triggering => "triggering",
            SessionState::Receiving => "receiving",
            SessionState::Completed => "completed",
            SessionState::TimedOut => "timed_out",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bytes received during one capture, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCapture {
    id: Uuid,
    data: Bytes,
    outcome: CaptureOutcome,
    datagrams: usize,
    target_bytes: usize,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl RawCapture {
    /// Assemble a finished capture.
    pub fn new(
        id: Uuid,
        data: Bytes,
        outcome: CaptureOutcome,
        datagrams: usize,
        target_bytes: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            data,
            outcome,
            datagrams,
            target_bytes,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Session id that produced this capture.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The raw payload.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Number of bytes received. May be odd and may exceed the target.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing was received.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Terminal outcome of the session.
    pub fn outcome(&self) -> CaptureOutcome {
        self.outcome
    }

    /// Datagrams appended to the buffer.
    pub fn datagrams(&self) -> usize {
        self.datagrams
    }

    /// Whole samples in the buffer; a trailing odd byte does not count.
    pub fn sample_count(&self) -> usize {
        decoder::sample_count(self.data.len())
    }

    /// Decoded samples in buffer order.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        decoder::samples(&self.data)
    }

    /// Serializable digest of this capture.
    pub fn summary(&self) -> CaptureSummary {
        CaptureSummary {
            id: self.id,
            outcome: self.outcome,
            bytes: self.data.len(),
            samples: self.sample_count(),
            datagrams: self.datagrams,
            target_bytes: self.target_bytes,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Metadata describing a finished capture, without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSummary {
    /// Session id.
    pub id: Uuid,
    /// Terminal outcome.
    pub outcome: CaptureOutcome,
    /// Bytes received.
    pub bytes: usize,
    /// Whole samples decoded from those bytes.
    pub samples: usize,
    /// Datagrams received.
    pub datagrams: usize,
    /// Configured target size.
    pub target_bytes: usize,
    /// When the session left idle.
    pub started_at: DateTime<Utc>,
    /// When the receive phase ended.
    pub finished_at: DateTime<Utc>,
}

impl CaptureSummary {
    /// Wall-clock duration of the session.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
