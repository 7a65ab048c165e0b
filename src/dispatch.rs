//! Paced delivery of decoded samples to live viewers.
//!
//! Viewers subscribe to a `tokio::sync::broadcast` channel of [`ScopeEvent`]s.
//! The dispatcher walks a capture forward in fixed strides, decodes each stride
//! and publishes it either as one batch event or as one event per sample. A
//! pause between strides keeps a 6 MB capture from reaching the viewers as a
//! single burst.
//!
//! Delivery is best effort. With no subscribers the decoded data is dropped,
//! and a viewer that falls more than the channel capacity behind sees
//! `RecvError::Lagged` and misses events. Nothing is replayed for late joiners;
//! the full capture is available through the registry's bulk retrieval.
//!
//! Data events and the completion event travel on the same channel, so a viewer
//! always receives `CaptureComplete` after the last batch of that capture.

use crate::capture::CaptureSummary;
use crate::config::{DeliveryGranularity, ScopeConfig};
use crate::decoder;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

/// Events published to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ScopeEvent {
    /// One decoded value, in volts.
    Sample(f64),
    /// An ordered batch of decoded values, in volts.
    Batch(Vec<f64>),
    /// The capture has ended and no more data will follow for it.
    CaptureComplete(CaptureSummary),
    /// The capture ended in failure; no data will follow for it.
    CaptureFailed {
        /// Session id.
        session: Uuid,
        /// Human-readable cause.
        reason: String,
    },
}

/// Counters for one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Full strides decoded and published.
    pub batches: usize,
    /// Samples contained in those strides.
    pub samples: usize,
    /// Events published while nobody was subscribed.
    pub undelivered: usize,
}

/// Publishes decoded strides of a capture to subscribed viewers.
#[derive(Debug, Clone)]
pub struct StreamDispatcher {
    events: broadcast::Sender<ScopeEvent>,
    stride: usize,
    pacing: Duration,
    granularity: DeliveryGranularity,
}

impl StreamDispatcher {
    /// Create a dispatcher publishing on `events` with the configured batching.
    pub fn new(events: broadcast::Sender<ScopeEvent>, config: &ScopeConfig) -> Self {
        Self {
            events,
            stride: config.batch_stride_bytes.max(decoder::BYTES_PER_SAMPLE),
            pacing: config.batch_pacing_delay(),
            granularity: config.delivery_granularity,
        }
    }

    /// Register a new viewer. It only sees events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ScopeEvent> {
        self.events.subscribe()
    }

    /// Number of currently subscribed viewers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Publish every full stride of `data`, in order.
    ///
    /// A trailing partial stride is skipped. Does not publish the completion
    /// event; see [`StreamDispatcher::complete`].
    pub async fn dispatch(&self, data: &[u8]) -> DispatchStats {
        let mut stats = DispatchStats::default();
        for region in data.chunks_exact(self.stride) {
            self.emit_batch(region, &mut stats).await;
        }
        debug!(
            "Dispatched {} batches ({} samples), skipped {} trailing bytes",
            stats.batches,
            stats.samples,
            data.len() % self.stride
        );
        stats
    }

    /// Publish strides as payloads arrive on `feed`, until the feed closes.
    ///
    /// Payloads are concatenated in arrival order, so strides may span
    /// datagram boundaries. Bytes left over when the feed closes form a
    /// partial stride and are skipped.
    pub async fn dispatch_live(&self, mut feed: mpsc::UnboundedReceiver<Bytes>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let mut pending = BytesMut::new();

        while let Some(chunk) = feed.recv().await {
            pending.extend_from_slice(&chunk);
            while pending.len() >= self.stride {
                let region = pending.split_to(self.stride);
                self.emit_batch(&region, &mut stats).await;
            }
        }

        debug!(
            "Live dispatch finished: {} batches, skipped {} trailing bytes",
            stats.batches,
            pending.len()
        );
        stats
    }

    /// Tell viewers the capture is finished and stored.
    pub fn complete(&self, summary: CaptureSummary) {
        info!(
            "Capture {} complete: {} bytes, {} samples",
            summary.id, summary.bytes, summary.samples
        );
        let _ = self.events.send(ScopeEvent::CaptureComplete(summary));
    }

    /// Tell viewers the capture failed.
    pub fn fail(&self, session: Uuid, reason: String) {
        let _ = self
            .events
            .send(ScopeEvent::CaptureFailed { session, reason });
    }

    async fn emit_batch(&self, region: &[u8], stats: &mut DispatchStats) {
        if stats.batches > 0 && !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }

        let values = decoder::decode_all(region);
        stats.batches += 1;
        stats.samples += values.len();

        match self.granularity {
            DeliveryGranularity::PerBatch => {
                if self.events.send(ScopeEvent::Batch(values)).is_err() {
                    stats.undelivered += 1;
                }
            }
            DeliveryGranularity::PerSample => {
                for value in values {
                    if self.events.send(ScopeEvent::Sample(value)).is_err() {
                        stats.undelivered += 1;
                    }
                    // let waiting viewers drain before the ring wraps
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}
