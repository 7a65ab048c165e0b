//! Actor-based session registry
//!
//! The registry owns the only state shared between requests: which session is
//! in progress, and the last stored capture. All of it lives inside a single
//! async task that processes [`RegistryCommand`]s one at a time, so admission
//! and completion can never race each other.
//!
//! A start request spawns two tasks: the session worker, which runs the capture
//! and streams it to viewers, and a supervisor that awaits the worker and
//! reports back through the mailbox. The supervisor reports even if the worker
//! panics, so the in-progress flag is always cleared.

use crate::adapters::AdapterFactory;
use crate::capture::{CaptureSession, CaptureSummary, RawCapture};
use crate::config::ScopeConfig;
use crate::dispatch::{ScopeEvent, StreamDispatcher};
use crate::error::{AppResult, DaqError};
use crate::messages::{CaptureHandle, RegistryCommand, RegistryStatus, SessionReport, StartOutcome};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

const MAILBOX_CAPACITY: usize = 32;

/// Actor that manages capture admission and the last stored capture
pub struct SessionRegistry {
    config: Arc<ScopeConfig>,
    factory: Arc<dyn AdapterFactory>,
    dispatcher: StreamDispatcher,
    mailbox: mpsc::WeakSender<RegistryCommand>,
    in_progress: Option<Uuid>,
    last_capture: Option<RawCapture>,
}

impl SessionRegistry {
    /// Start the actor on the current tokio runtime and return a handle to it.
    pub fn spawn(config: Arc<ScopeConfig>, factory: Arc<dyn AdapterFactory>) -> RegistryHandle {
        let (commands, command_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let dispatcher = StreamDispatcher::new(events.clone(), &config);

        let actor = Self {
            config,
            factory,
            dispatcher,
            mailbox: commands.downgrade(),
            in_progress: None,
            last_capture: None,
        };
        tokio::spawn(actor.run(command_rx));

        RegistryHandle { commands, events }
    }

    /// Runs the actor event loop, processing commands until shutdown
    async fn run(mut self, mut command_rx: mpsc::Receiver<RegistryCommand>) {
        info!("SessionRegistry started");

        while let Some(command) = command_rx.recv().await {
            match command {
                RegistryCommand::StartCapture { response } => {
                    let result = self.start_capture();
                    let _ = response.send(result);
                }

                RegistryCommand::FetchLastCapture { response } => {
                    let result = self
                        .last_capture
                        .clone()
                        .ok_or(DaqError::NoCaptureAvailable);
                    let _ = response.send(result);
                }

                RegistryCommand::GetStatus { response } => {
                    let _ = response.send(RegistryStatus {
                        in_progress: self.in_progress,
                        last_capture: self.last_capture.as_ref().map(RawCapture::summary),
                    });
                }

                RegistryCommand::SessionFinished {
                    session,
                    result,
                    done,
                } => {
                    let reply = self.finish_session(session, result);
                    let _ = done.send(reply);
                }

                RegistryCommand::Shutdown { response } => {
                    info!("Shutdown command received");
                    let _ = response.send(());
                    break; // Exit event loop
                }
            }
        }

        if let Some(session) = self.in_progress {
            warn!("SessionRegistry stopping while session {} is still running", session);
        }
        info!("SessionRegistry shutting down");
    }

    /// Admits a new session unless one is already running
    fn start_capture(&mut self) -> AppResult<StartOutcome> {
        if let Some(session) = self.in_progress {
            info!("Capture {} already in progress; ignoring start request", session);
            return Ok(StartOutcome::AlreadyRunning { session });
        }
        let mailbox = self.mailbox.upgrade().ok_or(DaqError::RegistryUnavailable)?;

        let session = Uuid::new_v4();
        self.in_progress = Some(session);
        info!("Trigger requested; starting capture session {}", session);

        let worker = tokio::spawn(run_session(
            session,
            Arc::clone(&self.config),
            Arc::clone(&self.factory),
            self.dispatcher.clone(),
        ));

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = match worker.await {
                Ok(result) => result,
                Err(e) => Err(DaqError::SessionAborted(e.to_string())),
            };
            let report = RegistryCommand::SessionFinished {
                session,
                result,
                done: done_tx,
            };
            if mailbox.send(report).await.is_err() {
                warn!("Registry stopped before session {} could report", session);
            }
        });

        Ok(StartOutcome::Admitted(CaptureHandle::new(session, done_rx)))
    }

    /// Records a finished session and tells viewers about it
    fn finish_session(
        &mut self,
        session: Uuid,
        result: AppResult<SessionReport>,
    ) -> AppResult<CaptureSummary> {
        if self.in_progress == Some(session) {
            self.in_progress = None;
        } else {
            warn!("Finished session {} was not the one in progress", session);
        }

        match result {
            Ok(SessionReport { capture, dispatch }) => {
                let summary = capture.summary();
                info!(
                    "Session {} ended {:?}: {} bytes, {} batches streamed",
                    session, summary.outcome, summary.bytes, dispatch.batches
                );
                if capture.is_empty() && !self.config.store_empty_captures {
                    info!("Session {} received no data; keeping previous capture", session);
                } else {
                    self.last_capture = Some(capture);
                }
                self.dispatcher.complete(summary.clone());
                Ok(summary)
            }
            Err(e) => {
                error!("Session {} failed: {}", session, e);
                self.dispatcher.fail(session, e.to_string());
                Err(e)
            }
        }
    }
}

/// Capture, then stream, one session's data.
async fn run_session(
    id: Uuid,
    config: Arc<ScopeConfig>,
    factory: Arc<dyn AdapterFactory>,
    dispatcher: StreamDispatcher,
) -> AppResult<SessionReport> {
    let mut session = CaptureSession::with_id(id, Arc::clone(&config));

    if config.live_dispatch {
        let (feed, feed_rx) = mpsc::unbounded_channel();
        let live = tokio::spawn(async move { dispatcher.dispatch_live(feed_rx).await });
        let capture = session.run(factory.as_ref(), Some(feed)).await;
        let dispatch = live
            .await
            .map_err(|e| DaqError::SessionAborted(e.to_string()));
        Ok(SessionReport {
            capture: capture?,
            dispatch: dispatch?,
        })
    } else {
        let capture = session.run(factory.as_ref(), None).await?;
        let dispatch = dispatcher.dispatch(capture.bytes()).await;
        Ok(SessionReport { capture, dispatch })
    }
}

/// Cloneable handle for talking to a [`SessionRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    commands: mpsc::Sender<RegistryCommand>,
    events: broadcast::Sender<ScopeEvent>,
}

impl RegistryHandle {
    async fn request<T>(
        &self,
        (command, reply): (RegistryCommand, oneshot::Receiver<T>),
    ) -> AppResult<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DaqError::RegistryUnavailable)?;
        reply.await.map_err(|_| DaqError::RegistryUnavailable)
    }

    /// Ask for a new capture. Returns immediately; the capture runs in the background.
    pub async fn request_capture(&self) -> AppResult<StartOutcome> {
        self.request(RegistryCommand::start_capture()).await?
    }

    /// The last stored capture, or [`DaqError::NoCaptureAvailable`].
    pub async fn last_capture(&self) -> AppResult<RawCapture> {
        self.request(RegistryCommand::fetch_last_capture()).await?
    }

    /// Current registry state.
    pub async fn status(&self) -> AppResult<RegistryStatus> {
        self.request(RegistryCommand::get_status()).await
    }

    /// Subscribe to live events from every future capture.
    pub fn subscribe(&self) -> broadcast::Receiver<ScopeEvent> {
        self.events.subscribe()
    }

    /// Stop the actor. Sessions already running finish on their own.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(RegistryCommand::shutdown()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapterFactory;
    use crate::capture::CaptureOutcome;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn device() -> SocketAddr {
        "192.168.4.1:4210".parse().unwrap()
    }

    fn small_config() -> ScopeConfig {
        ScopeConfig {
            target_capture_bytes: 1000,
            ..Default::default()
        }
    }

    fn admitted(outcome: StartOutcome) -> CaptureHandle {
        match outcome {
            StartOutcome::Admitted(handle) => handle,
            other => panic!("expected admission, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_before_any_capture_is_not_found() {
        let factory = MockAdapterFactory::new(device());
        let registry = SessionRegistry::spawn(Arc::new(small_config()), Arc::new(factory));

        let err = registry.last_capture().await.unwrap_err();
        assert!(matches!(err, DaqError::NoCaptureAvailable));
        assert_eq!(registry.status().await.unwrap().in_progress, None);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_while_running_is_a_no_op() {
        let factory = MockAdapterFactory::new(device())
            .with_ramp(10, 100)
            .with_interval(Duration::from_millis(1));
        let registry = SessionRegistry::spawn(Arc::new(small_config()), Arc::new(factory.clone()));

        let first = admitted(registry.request_capture().await.unwrap());
        let second = registry.request_capture().await.unwrap();

        match second {
            StartOutcome::AlreadyRunning { session } => assert_eq!(session, first.id()),
            other => panic!("expected no-op, got {other:?}"),
        }
        assert_eq!(
            registry.status().await.unwrap().in_progress,
            Some(first.id())
        );

        let summary = first.wait().await.unwrap();
        assert_eq!(summary.outcome, CaptureOutcome::Completed);
        assert_eq!(factory.opened(), 1);
        // only the admitted session talked to the device
        let codes: Vec<Vec<u8>> = factory.sent().into_iter().map(|s| s.payload).collect();
        assert_eq!(codes, vec![b"r".to_vec(), b"t".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_capture_is_stored_and_registry_returns_to_idle() {
        let factory = MockAdapterFactory::new(device()).with_ramp(10, 100);
        let registry = SessionRegistry::spawn(Arc::new(small_config()), Arc::new(factory.clone()));

        let handle = admitted(registry.request_capture().await.unwrap());
        let id = handle.id();
        handle.wait().await.unwrap();

        let capture = registry.last_capture().await.unwrap();
        assert_eq!(capture.id(), id);
        assert_eq!(capture.len(), 1000);

        let status = registry.status().await.unwrap();
        assert_eq!(status.in_progress, None);
        assert_eq!(status.last_capture.map(|s| s.id), Some(id));

        // the next request is admitted with a fresh adapter
        let next = admitted(registry.request_capture().await.unwrap());
        next.wait().await.unwrap();
        assert_eq!(factory.opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_timeout_is_not_stored_by_default() {
        let factory = MockAdapterFactory::new(device());
        let registry = SessionRegistry::spawn(Arc::new(small_config()), Arc::new(factory));

        let summary = admitted(registry.request_capture().await.unwrap())
            .wait()
            .await
            .unwrap();

        assert_eq!(summary.outcome, CaptureOutcome::TimedOut);
        assert_eq!(summary.bytes, 0);
        assert!(matches!(
            registry.last_capture().await,
            Err(DaqError::NoCaptureAvailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_timeout_is_stored_when_configured() {
        let factory = MockAdapterFactory::new(device());
        let config = ScopeConfig {
            store_empty_captures: true,
            ..small_config()
        };
        let registry = SessionRegistry::spawn(Arc::new(config), Arc::new(factory));

        let handle = admitted(registry.request_capture().await.unwrap());
        let id = handle.id();
        handle.wait().await.unwrap();

        let capture = registry.last_capture().await.unwrap();
        assert_eq!(capture.id(), id);
        assert!(capture.is_empty());
        assert_eq!(capture.outcome(), CaptureOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn bind_failure_leaves_registry_idle() {
        let factory = MockAdapterFactory::new(device()).failing_bind();
        let registry = SessionRegistry::spawn(Arc::new(small_config()), Arc::new(factory));
        let mut events = registry.subscribe();

        let handle = admitted(registry.request_capture().await.unwrap());
        let id = handle.id();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, DaqError::Bind(_)));

        assert_eq!(registry.status().await.unwrap().in_progress, None);
        assert!(matches!(
            events.try_recv(),
            Ok(ScopeEvent::CaptureFailed { session, .. }) if session == id
        ));
        // a retry is admitted
        assert!(registry.request_capture().await.unwrap().is_admitted());
    }

    #[tokio::test(start_paused = true)]
    async fn viewer_sees_batches_then_completion() {
        let factory = MockAdapterFactory::new(device())
            .with_ramp(10, 100)
            .with_interval(Duration::from_millis(1));
        let registry = SessionRegistry::spawn(Arc::new(small_config()), Arc::new(factory));
        let mut events = registry.subscribe();

        let handle = admitted(registry.request_capture().await.unwrap());

        let mut batches = 0;
        loop {
            match events.recv().await.unwrap() {
                ScopeEvent::Batch(values) => {
                    assert_eq!(values.len(), 100);
                    batches += 1;
                }
                ScopeEvent::CaptureComplete(summary) => {
                    assert_eq!(summary.id, handle.id());
                    // stored before completion is announced
                    assert_eq!(registry.last_capture().await.unwrap().id(), handle.id());
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(batches, 5);
        handle.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn live_dispatch_streams_the_same_batches() {
        let factory = MockAdapterFactory::new(device())
            .with_ramp(7, 150)
            .with_interval(Duration::from_millis(1));
        let config = ScopeConfig {
            live_dispatch: true,
            target_capture_bytes: 1050,
            ..Default::default()
        };
        let registry = SessionRegistry::spawn(Arc::new(config), Arc::new(factory));
        let mut events = registry.subscribe();

        let handle = admitted(registry.request_capture().await.unwrap());
        handle.wait().await.unwrap();

        let capture = registry.last_capture().await.unwrap();
        let mut streamed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ScopeEvent::Batch(values) = event {
                streamed.extend(values);
            }
        }
        let expected: Vec<f64> = capture.samples().take(500).collect();
        assert_eq!(streamed, expected);
    }

    #[tokio::test]
    async fn commands_fail_after_shutdown() {
        let factory = MockAdapterFactory::new(device());
        let registry = SessionRegistry::spawn(Arc::new(small_config()), Arc::new(factory));

        registry.shutdown().await.unwrap();

        assert!(matches!(
            registry.request_capture().await,
            Err(DaqError::RegistryUnavailable)
        ));
    }
}
