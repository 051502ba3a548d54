//! Recording state mediator
//!
//! Single authority over the recording indicator line. Reconciles the
//! operator's `is_recording` intent with the storage layer's write
//! acknowledgements, riding out short write pauses with a grace timer.
//!
//! Every handler runs under one async lock, so the timer alive-check,
//! start and cancel are serialized against each other and against the
//! timer's own fire path.

use super::state::{
    flag_value, parse_flag, RecordingSession, RecordingState, StopReason, IS_RECORDING, IS_WRITING,
    IS_WRITING_BUF,
};
use super::timer::{StopTimer, TimerTicket};
use crate::config::FrameKeeperConfig;
use crate::output::RecordingIndicator;
use crate::shutdown::Shutdown;
use crate::storage::StorageEvent;
use crate::store::{ParameterChange, ParameterStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Events emitted on mediator transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MediatorEvent {
    /// A new recording session began
    Started { session_id: Uuid },
    /// Recording re-asserted during the grace period
    Resumed,
    /// Storage paused; grace timer running
    WritePaused,
    /// Storage resumed within the grace period
    WriteResumed,
    /// Recording stopped
    Stopped { reason: StopReason },
}

struct MediatorShared {
    store: Arc<dyn ParameterStore>,
    indicator: Arc<dyn RecordingIndicator>,
    events: broadcast::Sender<MediatorEvent>,
    fps_actual_key: String,
    base_timeout: Duration,
}

struct MediatorInner {
    state: RecordingState,
    timer: StopTimer,
    stop_timeout: Duration,
    session: Option<RecordingSession>,
    last_session: Option<RecordingSession>,
}

/// Recording state mediator. Clones share the same state.
#[derive(Clone)]
pub struct RecordingMediator {
    shared: Arc<MediatorShared>,
    inner: Arc<Mutex<MediatorInner>>,
}

impl RecordingMediator {
    pub fn new(
        config: &FrameKeeperConfig,
        store: Arc<dyn ParameterStore>,
        indicator: Arc<dyn RecordingIndicator>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let base_timeout = config.mediator.stop_recording_timeout();

        Self {
            shared: Arc::new(MediatorShared {
                store,
                indicator,
                events,
                fps_actual_key: config.keys.fps_actual.clone(),
                base_timeout,
            }),
            inner: Arc::new(Mutex::new(MediatorInner {
                state: RecordingState::Idle,
                timer: StopTimer::new(),
                stop_timeout: base_timeout,
                session: None,
                last_session: None,
            })),
        }
    }

    pub async fn state(&self) -> RecordingState {
        self.inner.lock().await.state
    }

    pub async fn stop_timeout(&self) -> Duration {
        self.inner.lock().await.stop_timeout
    }

    pub async fn timer_alive(&self) -> bool {
        self.inner.lock().await.timer.is_alive()
    }

    pub async fn current_session(&self) -> Option<RecordingSession> {
        self.inner.lock().await.session.clone()
    }

    pub async fn last_session(&self) -> Option<RecordingSession> {
        self.inner.lock().await.last_session.clone()
    }

    /// Subscribe to transition events
    pub fn subscribe(&self) -> broadcast::Receiver<MediatorEvent> {
        self.shared.events.subscribe()
    }

    /// Dispatch a store change to the matching handler
    pub async fn handle_parameter_change(&self, change: &ParameterChange) {
        match change.key.as_str() {
            IS_RECORDING => match parse_flag(&change.value) {
                Some(on) => self.handle_is_recording(on).await,
                None => tracing::warn!("Ignoring malformed {}={:?}", IS_RECORDING, change.value),
            },
            IS_WRITING => match parse_flag(&change.value) {
                Some(on) => self.handle_is_writing(on).await,
                None => tracing::warn!("Ignoring malformed {}={:?}", IS_WRITING, change.value),
            },
            key if key == self.shared.fps_actual_key => self.handle_fps_actual(&change.value).await,
            _ => {}
        }
    }

    /// Operator intent to record changed
    pub async fn handle_is_recording(&self, on: bool) {
        let mut inner = self.inner.lock().await;

        if on {
            if inner.timer.cancel() {
                tracing::debug!("Grace timer cancelled by record command");
            }
            self.set_line(true).await;
            self.set_flag(IS_WRITING_BUF, true).await;

            let previous = inner.state;
            inner.state = RecordingState::Recording;

            if inner.session.is_none() {
                let session = RecordingSession::new();
                tracing::info!("Recording started (session {})", session.id);
                self.emit(MediatorEvent::Started {
                    session_id: session.id,
                });
                inner.session = Some(session);
            } else if previous == RecordingState::Stopping {
                tracing::info!("Recording re-asserted during grace period");
                self.emit(MediatorEvent::Resumed);
            }
        } else {
            // Our own is_writing=0 echo is skipped by the run loop, so the
            // line follows it here directly.
            self.set_flag(IS_WRITING, false).await;
            self.set_line(false).await;
            inner.state = RecordingState::Idle;

            if Self::end_session(&mut inner, StopReason::Command) {
                self.emit(MediatorEvent::Stopped {
                    reason: StopReason::Command,
                });
            }
        }
    }

    /// `is_writing` changed in the store (written by someone else)
    pub async fn handle_is_writing(&self, on: bool) {
        // Held only to order the line write against the other handlers
        let _inner = self.inner.lock().await;
        if !on {
            self.set_line(false).await;
        }
    }

    /// Storage write acknowledgement
    pub async fn handle_write_status(&self, writing: bool) {
        let mut inner = self.inner.lock().await;
        self.set_flag(IS_WRITING, writing).await;

        if writing {
            if inner.state == RecordingState::Stopping {
                inner.timer.cancel();
                inner.state = RecordingState::Recording;
                tracing::info!("Storage writing resumed within grace period");
                self.emit(MediatorEvent::WriteResumed);
            }
            return;
        }

        match inner.state {
            RecordingState::Recording | RecordingState::Stopping => {
                let timeout = inner.stop_timeout;
                let mediator = self.clone();
                let started = inner.timer.start(timeout, move |ticket| async move {
                    mediator.fire_stop_timer(ticket).await;
                });

                if started {
                    tracing::debug!("Storage write paused, grace timer {:?}", timeout);
                }

                if inner.state == RecordingState::Recording {
                    inner.state = RecordingState::Stopping;
                    if let Some(session) = inner.session.as_mut() {
                        session.write_pauses += 1;
                    }
                    self.emit(MediatorEvent::WritePaused);
                }
            }
            RecordingState::Idle => {
                tracing::debug!("Write stop while idle, ignoring");
            }
        }
    }

    /// Storage device disappeared: stop immediately, no grace period
    pub async fn handle_storage_removed(&self) {
        let mut inner = self.inner.lock().await;
        tracing::info!("Storage removed, stopping recording");

        inner.timer.cancel();
        self.full_stop(&mut inner, StopReason::StorageRemoved).await;
    }

    pub async fn handle_storage_event(&self, event: StorageEvent) {
        match event {
            StorageEvent::WriteStatus(writing) => self.handle_write_status(writing).await,
            StorageEvent::Removed => self.handle_storage_removed().await,
        }
    }

    /// Recompute the grace period from the reported frame rate.
    ///
    /// Any positive rate maps to the configured timeout.
    pub async fn handle_fps_actual(&self, value: &str) {
        let fps_actual = match value.trim().parse::<f64>() {
            Ok(fps) => fps,
            Err(_) => {
                tracing::warn!(
                    "Invalid value for {}: {:?}. Could not update stop timeout.",
                    self.shared.fps_actual_key,
                    value
                );
                return;
            }
        };

        if fps_actual > 0.0 {
            let mut inner = self.inner.lock().await;
            inner.stop_timeout = self.shared.base_timeout;
            tracing::debug!(
                "{} changed to {}, stop timeout {:?}",
                self.shared.fps_actual_key,
                fps_actual,
                inner.stop_timeout
            );
        }
    }

    async fn fire_stop_timer(&self, ticket: TimerTicket) {
        let mut inner = self.inner.lock().await;
        if !ticket.claim() {
            tracing::debug!("Grace timer cancelled before firing");
            return;
        }

        tracing::info!("Stop recording timeout reached. Stopping recording...");
        self.full_stop(&mut inner, StopReason::TimerExpired).await;
    }

    async fn full_stop(&self, inner: &mut MediatorInner, reason: StopReason) {
        self.set_flag(IS_WRITING_BUF, false).await;
        self.set_flag(IS_RECORDING, false).await;
        self.set_flag(IS_WRITING, false).await;
        self.set_line(false).await;

        inner.state = RecordingState::Idle;
        Self::end_session(inner, reason);
        self.emit(MediatorEvent::Stopped { reason });
    }

    fn end_session(inner: &mut MediatorInner, reason: StopReason) -> bool {
        let Some(mut session) = inner.session.take() else {
            return false;
        };

        session.end(reason);
        tracing::info!(
            "Recording session {} ended ({:?}) after {}ms, {} write pause(s)",
            session.id,
            reason,
            session.duration_ms().unwrap_or(0),
            session.write_pauses
        );
        inner.last_session = Some(session);
        true
    }

    async fn set_flag(&self, key: &str, on: bool) {
        if let Err(e) = self.shared.store.set(key, flag_value(on)).await {
            tracing::warn!("Failed to set {}={}: {}", key, flag_value(on), e);
        }
    }

    async fn set_line(&self, on: bool) {
        if let Err(e) = self.shared.indicator.set_recording(on).await {
            tracing::warn!("Failed to set recording indicator {}: {}", on, e);
        }
    }

    fn emit(&self, event: MediatorEvent) {
        let _ = self.shared.events.send(event);
    }

    /// Spawn the event loop.
    ///
    /// The store subscription is taken before returning.
    pub fn spawn(&self, storage: mpsc::Receiver<StorageEvent>, shutdown: Shutdown) -> JoinHandle<()> {
        let changes = self.shared.store.watch_parameters();
        tokio::spawn(self.clone().run(changes, storage, shutdown))
    }

    /// Consume store changes and storage events until shutdown.
    ///
    /// Changes written by this mediator's own store client are skipped.
    pub async fn run(
        self,
        mut changes: broadcast::Receiver<ParameterChange>,
        mut storage: mpsc::Receiver<StorageEvent>,
        mut shutdown: Shutdown,
    ) {
        let own_client = self.shared.store.client_name().to_string();
        let mut storage_open = true;
        tracing::info!("Recording mediator running");

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                change = changes.recv() => match change {
                    Ok(change) if change.writer == own_client => {}
                    Ok(change) => self.handle_parameter_change(&change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Mediator missed {} parameter changes", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Parameter change feed closed, mediator exiting");
                        break;
                    }
                },
                event = storage.recv(), if storage_open => match event {
                    Some(event) => self.handle_storage_event(event).await,
                    None => {
                        tracing::warn!("Storage monitor channel closed");
                        storage_open = false;
                    }
                },
            }
        }

        self.inner.lock().await.timer.cancel();
        tracing::info!("Recording mediator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputError;
    use crate::shutdown::shutdown_channel;
    use crate::storage::storage_channel;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    #[derive(Default)]
    struct FakeLine {
        calls: parking_lot::Mutex<Vec<bool>>,
    }

    impl FakeLine {
        fn calls(&self) -> Vec<bool> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl RecordingIndicator for FakeLine {
        async fn set_recording(&self, on: bool) -> Result<(), OutputError> {
            self.calls.lock().push(on);
            Ok(())
        }
    }

    struct Harness {
        store: MemoryStore,
        line: Arc<FakeLine>,
        mediator: RecordingMediator,
    }

    fn harness() -> Harness {
        let config = FrameKeeperConfig::default();
        let store = MemoryStore::new(config.channels.controls.clone());
        let line = Arc::new(FakeLine::default());
        let mediator = RecordingMediator::new(&config, Arc::new(store.client("mediator")), line.clone());
        Harness {
            store,
            line,
            mediator,
        }
    }

    async fn flag(store: &MemoryStore, key: &str) -> Option<String> {
        store.get(key).await.unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_resume_within_grace_keeps_recording() {
        let h = harness();
        let operator = h.store.client("operator");
        let (storage_tx, storage_rx) = storage_channel(8);
        let (trigger, shutdown) = shutdown_channel();
        let task = h.mediator.spawn(storage_rx, shutdown);

        operator.set(IS_RECORDING, "1").await.unwrap();
        settle().await;
        assert_eq!(h.mediator.state().await, RecordingState::Recording);
        assert_eq!(flag(&h.store, IS_WRITING_BUF).await.as_deref(), Some("1"));

        storage_tx.write_status_changed(false).await;
        settle().await;
        assert_eq!(h.mediator.state().await, RecordingState::Stopping);
        assert!(h.mediator.timer_alive().await);
        assert_eq!(flag(&h.store, IS_WRITING).await.as_deref(), Some("0"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        storage_tx.write_status_changed(true).await;
        settle().await;
        assert_eq!(h.mediator.state().await, RecordingState::Recording);
        assert!(!h.mediator.timer_alive().await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        // The mediator's own is_writing=0 write never deasserted the line
        assert_eq!(h.line.calls(), vec![true]);
        assert_eq!(flag(&h.store, IS_RECORDING).await.as_deref(), Some("1"));
        assert_eq!(flag(&h.store, IS_WRITING).await.as_deref(), Some("1"));
        assert_eq!(h.mediator.current_session().await.unwrap().write_pauses, 1);

        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_timeout_stops_recording_once() {
        let h = harness();
        let operator = h.store.client("operator");
        let mut events = h.mediator.subscribe();
        let (storage_tx, storage_rx) = storage_channel(8);
        let (trigger, shutdown) = shutdown_channel();
        let task = h.mediator.spawn(storage_rx, shutdown);

        operator.set(IS_RECORDING, "1").await.unwrap();
        settle().await;
        storage_tx.write_status_changed(false).await;
        settle().await;
        // Restarting while the timer is alive does nothing
        tokio::time::sleep(Duration::from_millis(500)).await;
        storage_tx.write_status_changed(false).await;

        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(h.mediator.state().await, RecordingState::Idle);
        assert_eq!(flag(&h.store, IS_RECORDING).await.as_deref(), Some("0"));
        assert_eq!(flag(&h.store, IS_WRITING).await.as_deref(), Some("0"));
        assert_eq!(flag(&h.store, IS_WRITING_BUF).await.as_deref(), Some("0"));
        assert_eq!(h.line.calls(), vec![true, false]);

        let session = h.mediator.last_session().await.unwrap();
        assert_eq!(session.stop_reason, Some(StopReason::TimerExpired));

        assert!(matches!(events.recv().await.unwrap(), MediatorEvent::Started { .. }));
        assert_eq!(events.recv().await.unwrap(), MediatorEvent::WritePaused);
        assert_eq!(
            events.recv().await.unwrap(),
            MediatorEvent::Stopped {
                reason: StopReason::TimerExpired
            }
        );
        assert!(events.try_recv().is_err());

        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_removal_bypasses_grace() {
        let h = harness();

        h.mediator.handle_is_recording(true).await;
        h.mediator.handle_write_status(false).await;
        assert!(h.mediator.timer_alive().await);

        h.mediator.handle_storage_event(StorageEvent::Removed).await;
        assert_eq!(h.mediator.state().await, RecordingState::Idle);
        assert!(!h.mediator.timer_alive().await);
        assert_eq!(flag(&h.store, IS_RECORDING).await.as_deref(), Some("0"));
        assert_eq!(flag(&h.store, IS_WRITING_BUF).await.as_deref(), Some("0"));

        // The cancelled grace timer never fires a second stop
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.line.calls(), vec![true, false]);
        assert_eq!(
            h.mediator.last_session().await.unwrap().stop_reason,
            Some(StopReason::StorageRemoved)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_off_clears_writing_and_line() {
        let h = harness();

        h.mediator.handle_is_recording(true).await;
        h.mediator.handle_is_recording(false).await;

        assert_eq!(h.mediator.state().await, RecordingState::Idle);
        assert_eq!(flag(&h.store, IS_WRITING).await.as_deref(), Some("0"));
        assert_eq!(h.line.calls(), vec![true, false]);
        assert_eq!(
            h.mediator.last_session().await.unwrap().stop_reason,
            Some(StopReason::Command)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_command_turns_line_off_through_run_loop() {
        let h = harness();
        let operator = h.store.client("operator");
        let (storage_tx, storage_rx) = storage_channel(8);
        let (trigger, shutdown) = shutdown_channel();
        let task = h.mediator.spawn(storage_rx, shutdown);

        operator.set(IS_RECORDING, "1").await.unwrap();
        settle().await;
        storage_tx.write_status_changed(true).await;
        settle().await;
        operator.set(IS_RECORDING, "0").await.unwrap();
        settle().await;
        storage_tx.write_status_changed(false).await;

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.mediator.state().await, RecordingState::Idle);
        assert_eq!(flag(&h.store, IS_WRITING).await.as_deref(), Some("0"));
        assert_eq!(h.line.calls(), vec![true, false]);
        assert!(!h.mediator.timer_alive().await);

        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_is_writing_drives_line() {
        let h = harness();
        h.mediator.handle_is_recording(true).await;

        let change = |value: &str| ParameterChange {
            key: IS_WRITING.to_string(),
            value: value.to_string(),
            writer: "pipeline".to_string(),
        };

        h.mediator.handle_parameter_change(&change("1")).await;
        assert_eq!(h.line.calls(), vec![true]);

        h.mediator.handle_parameter_change(&change("0")).await;
        assert_eq!(h.line.calls(), vec![true, false]);

        h.mediator.handle_parameter_change(&change("maybe")).await;
        assert_eq!(h.line.calls(), vec![true, false]);
        // State is not touched by the observation path
        assert_eq!(h.mediator.state().await, RecordingState::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_stop_while_idle_is_ignored() {
        let h = harness();

        h.mediator.handle_write_status(false).await;
        assert!(!h.mediator.timer_alive().await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.mediator.state().await, RecordingState::Idle);
        assert!(h.line.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_command_cancels_grace_timer() {
        let h = harness();
        let mut events = h.mediator.subscribe();

        h.mediator.handle_is_recording(true).await;
        h.mediator.handle_write_status(false).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.mediator.handle_is_recording(true).await;

        assert!(!h.mediator.timer_alive().await);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.mediator.state().await, RecordingState::Recording);
        assert_eq!(h.line.calls(), vec![true, true]);

        assert!(matches!(events.recv().await.unwrap(), MediatorEvent::Started { .. }));
        assert_eq!(events.recv().await.unwrap(), MediatorEvent::WritePaused);
        assert_eq!(events.recv().await.unwrap(), MediatorEvent::Resumed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_command_at_deadline_ends_recording() {
        let h = harness();

        h.mediator.handle_is_recording(true).await;
        h.mediator.handle_write_status(false).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        h.mediator.handle_is_recording(true).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Whichever of fire/record won, the later record command holds
        assert_eq!(h.mediator.state().await, RecordingState::Recording);
        assert_eq!(h.line.calls().last(), Some(&true));
        assert!(!h.mediator.timer_alive().await);
    }

    #[tokio::test]
    async fn test_fps_actual_recompute() {
        let h = harness();

        h.mediator.handle_fps_actual("23.976").await;
        assert_eq!(h.mediator.stop_timeout().await, Duration::from_secs(2));

        h.mediator.handle_fps_actual("fast").await;
        h.mediator.handle_fps_actual("-1").await;
        assert_eq!(h.mediator.stop_timeout().await, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_store_faults_do_not_block_line() {
        let h = harness();
        h.store.close();

        h.mediator.handle_is_recording(true).await;
        h.mediator.handle_storage_removed().await;

        assert_eq!(h.line.calls(), vec![true, false]);
        assert_eq!(h.mediator.state().await, RecordingState::Idle);
    }
}
