//! Message types for actor-based communication
//!
//! This module defines the command and response types used for message-passing
//! between control-surface callers and the `SessionRegistry` actor. Every
//! command carries a oneshot sender for its reply, so callers never touch the
//! registry state directly.

use crate::capture::{CaptureSummary, RawCapture};
use crate::dispatch::DispatchStats;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// What a finished session task hands back to the registry.
#[derive(Debug)]
pub struct SessionReport {
    /// The finished capture.
    pub capture: RawCapture,
    /// Counters from streaming it to viewers.
    pub dispatch: DispatchStats,
}

/// Snapshot of the registry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatus {
    /// Session currently running, if any.
    pub in_progress: Option<Uuid>,
    /// Summary of the stored capture, if any.
    pub last_capture: Option<CaptureSummary>,
}

/// Handle to an admitted capture session.
///
/// Dropping it does not cancel the session.
#[derive(Debug)]
pub struct CaptureHandle {
    id: Uuid,
    result: oneshot::Receiver<AppResult<CaptureSummary>>,
}

impl CaptureHandle {
    pub(crate) fn new(id: Uuid, result: oneshot::Receiver<AppResult<CaptureSummary>>) -> Self {
        Self { id, result }
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait until the registry has recorded the session's end.
    ///
    /// Resolves after the capture is stored and viewers have been told, so a
    /// bulk fetch issued afterwards sees this capture.
    pub async fn wait(self) -> AppResult<CaptureSummary> {
        self.result
            .await
            .map_err(|_| DaqError::RegistryUnavailable)?
    }
}

/// Reply to a start request.
#[derive(Debug)]
pub enum StartOutcome {
    /// A new session was launched.
    Admitted(CaptureHandle),
    /// A session is already running; nothing was started.
    AlreadyRunning {
        /// The running session.
        session: Uuid,
    },
}

impl StartOutcome {
    /// True when a new session was launched.
    pub fn is_admitted(&self) -> bool {
        matches!(self, StartOutcome::Admitted(_))
    }
}

/// Commands that can be sent to the SessionRegistry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Start a capture unless one is running
    StartCapture {
        /// Admission result
        response: oneshot::Sender<AppResult<StartOutcome>>,
    },

    /// Fetch the last stored capture
    FetchLastCapture {
        /// The stored capture, or not-found
        response: oneshot::Sender<AppResult<RawCapture>>,
    },

    /// Get in-progress and last-capture state
    GetStatus {
        /// Registry snapshot
        response: oneshot::Sender<RegistryStatus>,
    },

    /// Sent by a session supervisor when its session task has ended
    SessionFinished {
        /// Session that ended
        session: Uuid,
        /// Capture and dispatch counters, or the failure
        result: AppResult<SessionReport>,
        /// Resolves the session's `CaptureHandle`
        done: oneshot::Sender<AppResult<CaptureSummary>>,
    },

    /// Stop the actor
    Shutdown {
        /// Acknowledged before the actor exits
        response: oneshot::Sender<()>,
    },
}

impl RegistryCommand {
    /// Helper to create a StartCapture command
    pub fn start_capture() -> (Self, oneshot::Receiver<AppResult<StartOutcome>>) {
        let (tx, rx) = oneshot::channel();
        (Self::StartCapture { response: tx }, rx)
    }

    /// Helper to create a FetchLastCapture command
    pub fn fetch_last_capture() -> (Self, oneshot::Receiver<AppResult<RawCapture>>) {
        let (tx, rx) = oneshot::channel();
        (Self::FetchLastCapture { response: tx }, rx)
    }

    /// Helper to create a GetStatus command
    pub fn get_status() -> (Self, oneshot::Receiver<RegistryStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStatus { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
