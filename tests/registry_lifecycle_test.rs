//! Registry behaviour across several captures, driven by the mock device.

use async_trait::async_trait;
use scope_daq::adapters::{AdapterFactory, DatagramAdapter, MockAdapterFactory};
use scope_daq::{
    AppResult, CaptureOutcome, CaptureSummary, DeliveryGranularity, RegistryHandle, ScopeConfig,
    ScopeEvent, SessionRegistry, StartOutcome,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn device() -> SocketAddr {
    "192.168.4.1:4210".parse().unwrap()
}

/// Helper to create a registry over a mock device.
fn create_registry(config: ScopeConfig, factory: &MockAdapterFactory) -> RegistryHandle {
    SessionRegistry::spawn(Arc::new(config), Arc::new(factory.clone()))
}

async fn run_one(registry: &RegistryHandle) -> AppResult<CaptureSummary> {
    match registry.request_capture().await? {
        StartOutcome::Admitted(handle) => handle.wait().await,
        StartOutcome::AlreadyRunning { session } => panic!("session {session} still running"),
    }
}

#[tokio::test(start_paused = true)]
async fn rapid_double_start_creates_one_session() {
    let factory = MockAdapterFactory::new(device())
        .with_ramp(40, 1500)
        .with_interval(Duration::from_millis(1));
    let registry = create_registry(
        ScopeConfig {
            target_capture_bytes: 60_000,
            ..Default::default()
        },
        &factory,
    );

    let (a, b) = tokio::join!(registry.request_capture(), registry.request_capture());
    let outcomes = [a.unwrap(), b.unwrap()];
    let admitted: Vec<_> = outcomes.iter().filter(|o| o.is_admitted()).collect();
    assert_eq!(admitted.len(), 1);
    assert_eq!(factory.opened(), 1);

    for outcome in outcomes {
        if let StartOutcome::Admitted(handle) = outcome {
            assert_eq!(handle.wait().await.unwrap().outcome, CaptureOutcome::Completed);
        }
    }
    // one reset and one trigger in total
    assert_eq!(factory.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn newer_capture_supersedes_older() {
    let factory = MockAdapterFactory::new(device()).with_ramp(2, 500);
    let registry = create_registry(
        ScopeConfig {
            target_capture_bytes: 1000,
            ..Default::default()
        },
        &factory,
    );

    let first = run_one(&registry).await.unwrap();
    let second = run_one(&registry).await.unwrap();
    assert_ne!(first.id, second.id);

    let stored = registry.last_capture().await.unwrap();
    assert_eq!(stored.id(), second.id);
}

/// Hands each session the next device in line.
struct DeviceSequence {
    devices: Mutex<VecDeque<MockAdapterFactory>>,
}

impl DeviceSequence {
    fn new(devices: impl IntoIterator<Item = MockAdapterFactory>) -> Self {
        Self {
            devices: Mutex::new(devices.into_iter().collect()),
        }
    }
}

#[async_trait]
impl AdapterFactory for DeviceSequence {
    async fn open(&self) -> AppResult<Box<dyn DatagramAdapter>> {
        let next = self.devices.lock().unwrap().pop_front();
        next.expect("more sessions than scripted devices").open().await
    }
}

#[tokio::test(start_paused = true)]
async fn empty_capture_keeps_previous_one() {
    let talkative = MockAdapterFactory::new(device()).with_ramp(2, 500);
    let silent = MockAdapterFactory::new(device());
    let registry = SessionRegistry::spawn(
        Arc::new(ScopeConfig {
            target_capture_bytes: 1000,
            ..Default::default()
        }),
        Arc::new(DeviceSequence::new([talkative, silent])),
    );

    let kept = run_one(&registry).await.unwrap();
    assert_eq!(kept.outcome, CaptureOutcome::Completed);

    let empty = run_one(&registry).await.unwrap();
    assert_eq!(empty.outcome, CaptureOutcome::TimedOut);
    assert_eq!(empty.bytes, 0);

    let stored = registry.last_capture().await.unwrap();
    assert_eq!(stored.id(), kept.id);
    assert_eq!(stored.len(), 1000);
}

#[tokio::test(start_paused = true)]
async fn short_capture_is_still_delivered() {
    // 3 datagrams of 333 bytes, far below target: odd length, partial stride
    let factory = MockAdapterFactory::new(device())
        .with_ramp(3, 333)
        .with_interval(Duration::from_millis(1));
    let registry = create_registry(
        ScopeConfig {
            target_capture_bytes: 6_000_000,
            ..Default::default()
        },
        &factory,
    );
    let mut events = registry.subscribe();

    let summary = run_one(&registry).await.unwrap();

    assert_eq!(summary.outcome, CaptureOutcome::TimedOut);
    assert_eq!(summary.bytes, 999);
    assert_eq!(summary.samples, 499);
    assert_eq!(registry.last_capture().await.unwrap().len(), 999);

    let mut batches = 0;
    while let Ok(event) = events.try_recv() {
        if let ScopeEvent::Batch(_) = event {
            batches += 1;
        }
    }
    // 999 bytes hold four full 200-byte strides
    assert_eq!(batches, 4);
}

#[tokio::test(start_paused = true)]
async fn per_sample_granularity_reaches_viewers() {
    let factory = MockAdapterFactory::new(device()).with_ramp(1, 400);
    let registry = create_registry(
        ScopeConfig {
            target_capture_bytes: 400,
            delivery_granularity: DeliveryGranularity::PerSample,
            ..Default::default()
        },
        &factory,
    );
    let mut events = registry.subscribe();

    run_one(&registry).await.unwrap();

    let capture = registry.last_capture().await.unwrap();
    let mut values = Vec::new();
    loop {
        match events.try_recv().unwrap() {
            ScopeEvent::Sample(v) => values.push(v),
            ScopeEvent::CaptureComplete(_) => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(values, capture.samples().collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn receive_failure_is_reported_and_retry_allowed() {
    let factory = MockAdapterFactory::new(device())
        .with_ramp(5, 200)
        .failing_receive_after(2);
    let registry = create_registry(
        ScopeConfig {
            target_capture_bytes: 1000,
            ..Default::default()
        },
        &factory,
    );

    let err = run_one(&registry).await.unwrap_err();
    assert!(err.is_transport());

    let status = registry.status().await.unwrap();
    assert_eq!(status.in_progress, None);
    assert_eq!(status.last_capture, None);

    assert!(registry.request_capture().await.unwrap().is_admitted());
    assert_eq!(factory.opened(), 2);
}
