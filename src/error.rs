//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, shared by the capture
//! session, the stream dispatcher and the session registry. Using the `thiserror`
//! crate, it gives every layer a consistent way to report failures with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the configuration sources.
//! - **`Configuration`**: Semantic errors in values that parsed fine but make no
//!   sense (an odd batch stride, a zero receive timeout).
//! - **`Bind`**, **`Send`**, **`Receive`**: Transport failures. These are fatal to
//!   the capture session that hit them, never to the registry.
//! - **`NoCaptureAvailable`**: Bulk retrieval was requested before any capture
//!   was stored.
//! - **`RegistryUnavailable`**: The registry actor is gone, so no command can be
//!   delivered to it.
//! - **`SessionAborted`**: The session task died without producing a result.
//!
//! A receive timeout is deliberately absent: running out of time ends a capture
//! normally with `CaptureOutcome::TimedOut`.

use std::net::SocketAddr;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors produced by the capture pipeline.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration sources could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The session could not open its datagram socket.
    #[error("Failed to bind datagram socket: {0}")]
    Bind(#[source] std::io::Error),

    /// A control datagram could not be sent to the device.
    #[error("Failed to send control datagram to {target}: {source}")]
    Send {
        /// Device address the datagram was meant for.
        target: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The socket failed while waiting for device data.
    #[error("Datagram receive failed: {0}")]
    Receive(#[source] std::io::Error),

    /// No capture has been stored since startup.
    #[error("No capture available yet")]
    NoCaptureAvailable,

    /// The registry actor is no longer accepting commands.
    #[error("Session registry is not running")]
    RegistryUnavailable,

    /// The session task ended without reporting a result.
    #[error("Capture session aborted: {0}")]
    SessionAborted(String),
}

impl DaqError {
    /// Returns true for errors raised by the datagram transport.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DaqError::Bind(_) | DaqError::Send { .. } | DaqError::Receive(_)
        )
    }
}
