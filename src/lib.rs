//! Core library for the scope_daq application.
//!
//! This library contains the capture pipeline for a UDP-attached ADC scope:
//! triggering the device, reassembling its datagram burst under a deadline,
//! decoding raw byte pairs into volts, and streaming the result to live viewers
//! while keeping the last capture available for bulk download.
//!
//! ```text
//! RegistryHandle::request_capture
//!   -> SessionRegistry (admits one session at a time)
//!     -> CaptureSession (reset/trigger, receive until target or deadline)
//!       -> StreamDispatcher (paced batches -> broadcast::Receiver<ScopeEvent>)
//!     <- last capture stored, CaptureComplete published
//! ```

pub mod adapters;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod messages;
pub mod registry;

pub use capture::{CaptureOutcome, CaptureSummary, RawCapture, SessionState};
pub use config::{DeliveryGranularity, ScopeConfig};
pub use dispatch::{ScopeEvent, StreamDispatcher};
pub use error::{AppResult, DaqError};
pub use messages::{CaptureHandle, RegistryStatus, StartOutcome};
pub use registry::{RegistryHandle, SessionRegistry};
