//! Arbiter runtime
//!
//! Owns the [`CycleMachine`] inside a single tokio task. Callers, lookup tasks and
//! persistence tasks only ever talk to it through channels, so every transition
//! happens on that one task in the order it is received.

use super::{Completion, CycleMachine, CycleToken, LookupRequest};
use crate::metrics::ScanMetrics;
use crate::models::{DetectionEvent, IngredientRecord, RestrictionSet, ScanOutcome, ScannerSettings};
use crate::services::{LookupClient, LookupError, PersistError, RecordSink};
use crate::state::{StateChange, StateManager};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Arbiter construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Time from lock to re-arm
    pub cooldown: Duration,

    /// Capacity of the inbound command queue
    pub command_buffer: usize,

    /// Capacity of the state change broadcast channel
    pub event_buffer: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        ScannerSettings::default().into()
    }
}

impl From<&ScannerSettings> for ArbiterConfig {
    fn from(settings: &ScannerSettings) -> Self {
        Self {
            cooldown: settings.cooldown(),
            command_buffer: settings.command_buffer,
            event_buffer: settings.event_buffer,
        }
    }
}

impl From<ScannerSettings> for ArbiterConfig {
    fn from(settings: ScannerSettings) -> Self {
        Self::from(&settings)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterError {
    #[error("Scan arbiter has shut down")]
    Closed,

    #[error("Scan arbiter task panicked")]
    Panicked,
}

#[derive(Debug)]
enum ArbiterCommand {
    Detect(DetectionEvent),
    Reset,
    SetRestrictions(RestrictionSet),
    Shutdown,
}

/// Results reported back by tasks the arbiter spawned
#[derive(Debug)]
enum TaskEvent {
    LookupCompleted {
        token: CycleToken,
        result: Result<IngredientRecord, LookupError>,
    },
    PersistCompleted {
        outcome_id: Uuid,
        result: Result<(), PersistError>,
    },
}

/// Cheap, cloneable sender side of a running arbiter
#[derive(Debug, Clone)]
pub struct ArbiterHandle {
    commands: mpsc::Sender<ArbiterCommand>,
}

impl ArbiterHandle {
    /// Push a detection into the arbiter
    pub async fn detect(&self, event: DetectionEvent) -> Result<(), ArbiterError> {
        self.send(ArbiterCommand::Detect(event)).await
    }

    /// Push a detection from a plain OS thread, such as a decoder callback.
    ///
    /// Blocks while the command queue is full. Must not be called from async code.
    pub fn blocking_detect(&self, event: DetectionEvent) -> Result<(), ArbiterError> {
        self.commands
            .blocking_send(ArbiterCommand::Detect(event))
            .map_err(|_| ArbiterError::Closed)
    }

    /// Return to scanning immediately, discarding the current cycle's pending result
    pub async fn reset(&self) -> Result<(), ArbiterError> {
        self.send(ArbiterCommand::Reset).await
    }

    /// Replace the restrictions used from the next cycle on
    pub async fn set_restrictions(&self, restrictions: RestrictionSet) -> Result<(), ArbiterError> {
        self.send(ArbiterCommand::SetRestrictions(restrictions)).await
    }

    async fn send(&self, command: ArbiterCommand) -> Result<(), ArbiterError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ArbiterError::Closed)
    }
}

/// A running scan arbiter
///
/// Spawns one task that owns the [`CycleMachine`](super::CycleMachine). Detections,
/// resets and restriction updates go in through an [`ArbiterHandle`]; presentational
/// state comes out through the [`StateManager`].
///
/// # Example
/// ```ignore
/// let arbiter = ScanArbiter::spawn(
///     ArbiterConfig::default(),
///     Arc::new(CatalogLookupClient::new("catalog")),
///     Arc::new(JsonlRecordSink::new("activity.jsonl")),
///     RestrictionSet::from_names(["milk"]),
/// );
/// let mut changes = arbiter.subscribe();
/// arbiter.handle().detect(DetectionEvent::new("0123456789012")).await?;
/// ```
pub struct ScanArbiter {
    handle: ArbiterHandle,
    state: StateManager,
    metrics: Arc<ScanMetrics>,
    task: JoinHandle<()>,
}

impl ScanArbiter {
    /// Start the arbiter task on the current tokio runtime
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        config: ArbiterConfig,
        lookup: Arc<dyn LookupClient>,
        sink: Arc<dyn RecordSink>,
        restrictions: RestrictionSet,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let state = StateManager::with_capacity(config.event_buffer);
        state.set_restriction_count(restrictions.len());
        let metrics = Arc::new(ScanMetrics::new());

        let task = ArbiterTask {
            machine: CycleMachine::new(config.cooldown),
            lookup,
            sink,
            restrictions: Arc::new(restrictions),
            state: state.clone(),
            metrics: Arc::clone(&metrics),
            events_tx,
        };

        tracing::info!(
            "Scan arbiter started (cooldown: {:?}, command buffer: {})",
            config.cooldown,
            config.command_buffer
        );

        Self {
            handle: ArbiterHandle {
                commands: command_tx,
            },
            state,
            metrics,
            task: tokio::spawn(task.run(command_rx, events_rx)),
        }
    }

    pub fn handle(&self) -> ArbiterHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> Arc<ScanMetrics> {
        Arc::clone(&self.metrics)
    }

    pub async fn detect(&self, event: DetectionEvent) -> Result<(), ArbiterError> {
        self.handle.detect(event).await
    }

    pub async fn reset(&self) -> Result<(), ArbiterError> {
        self.handle.reset().await
    }

    pub async fn set_restrictions(&self, restrictions: RestrictionSet) -> Result<(), ArbiterError> {
        self.handle.set_restrictions(restrictions).await
    }

    /// Stop the arbiter and wait for its task to finish.
    ///
    /// Outstanding lookups and saves are left to complete on their own; their results
    /// are discarded.
    pub async fn shutdown(self) -> Result<(), ArbiterError> {
        // The task may already be gone; joining below reports how it ended
        let _ = self.handle.send(ArbiterCommand::Shutdown).await;

        let result = self.task.await.map_err(|e| {
            tracing::error!("Scan arbiter task failed: {}", e);
            ArbiterError::Panicked
        });
        self.metrics.log_summary();
        result
    }
}

impl std::fmt::Debug for ScanArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanArbiter")
            .field("state", &self.state)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

struct ArbiterTask {
    machine: CycleMachine,
    lookup: Arc<dyn LookupClient>,
    sink: Arc<dyn RecordSink>,
    /// Restrictions handed to the next cycle that locks
    restrictions: Arc<RestrictionSet>,
    state: StateManager,
    metrics: Arc<ScanMetrics>,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ArbiterTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ArbiterCommand>,
        mut events: mpsc::UnboundedReceiver<TaskEvent>,
    ) {
        loop {
            let deadline = self.machine.rearm_deadline();

            // Biased: an expired cooldown re-arms before any queued detection is looked at
            tokio::select! {
                biased;

                _ = sleep_until(deadline) => self.handle_cooldown(),

                Some(event) = events.recv() => self.handle_task_event(event),

                command = commands.recv() => match command {
                    Some(ArbiterCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }

        tracing::info!("Scan arbiter stopped");
    }

    fn handle_command(&mut self, command: ArbiterCommand) {
        match command {
            ArbiterCommand::Detect(event) => self.handle_detection(event),
            ArbiterCommand::Reset => {
                self.metrics.record_reset();
                match self.machine.reset() {
                    Some(token) => tracing::info!("Reset abandoned cycle {}", token),
                    None => tracing::debug!("Reset while armed"),
                }
                self.state.reset_scan();
            }
            ArbiterCommand::SetRestrictions(restrictions) => {
                tracing::info!("Restrictions updated: {} entries", restrictions.len());
                self.state.set_restriction_count(restrictions.len());
                self.restrictions = Arc::new(restrictions);
            }
            // Handled by the run loop
            ArbiterCommand::Shutdown => {}
        }
    }

    fn handle_detection(&mut self, event: DetectionEvent) {
        self.metrics.record_detection();

        let code = event.code.clone();
        let restrictions = Arc::clone(&self.restrictions);
        match self.machine.on_detection(event, restrictions, Instant::now()) {
            Some(request) => {
                tracing::info!("Cycle {} locked on barcode {}", request.token, request.code);
                self.state
                    .barcode_detected(request.token.value(), request.code.clone());
                self.dispatch_lookup(request);
            }
            None => {
                self.metrics.record_debounced();
                tracing::debug!("Ignoring detection of {} while busy", code);
            }
        }
    }

    fn dispatch_lookup(&mut self, request: LookupRequest) {
        let LookupRequest { token, code } = request;
        let lookup = Arc::clone(&self.lookup);
        let events = self.events_tx.clone();

        self.metrics.record_lookup_started();
        tokio::spawn(async move {
            // A panicking client must still complete the cycle
            let fetch = tokio::spawn(async move { lookup.fetch(&code).await });
            let result = fetch.await.unwrap_or_else(|e| {
                tracing::error!("Lookup task for cycle {} failed: {}", token, e);
                Err(LookupError::NetworkFailure(e.to_string()))
            });
            // The arbiter may have shut down meanwhile
            let _ = events.send(TaskEvent::LookupCompleted { token, result });
        });

        self.machine.on_lookup_dispatched(token);
    }

    fn handle_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::LookupCompleted { token, result } => {
                match self.machine.on_lookup_completed(token, result) {
                    Completion::Resolved {
                        code,
                        verdict,
                        outcome,
                    } => {
                        self.metrics.record_lookup_succeeded();
                        tracing::info!(
                            "Cycle {} resolved {} ({}): safe={}, flagged={:?}",
                            token,
                            code,
                            outcome.product_name,
                            verdict.is_safe,
                            verdict.flagged_ingredients
                        );
                        self.state
                            .scan_resolved(code, outcome.product_name.clone(), verdict);
                        self.persist(outcome);
                    }
                    Completion::Failed { code, error } => {
                        self.metrics.record_lookup_failed();
                        tracing::warn!("Cycle {} lookup for {} failed: {}", token, code, error);
                        self.state.lookup_failed(code, error);
                    }
                    Completion::Stale => {
                        self.metrics.record_stale_result();
                        tracing::debug!("Dropped stale lookup result for cycle {}", token);
                    }
                }
            }
            TaskEvent::PersistCompleted { outcome_id, result } => match result {
                Ok(()) => {
                    self.metrics.record_outcome_recorded();
                    tracing::debug!("Scan {} saved", outcome_id);
                    self.state.record_persisted(outcome_id);
                }
                Err(e) => {
                    self.metrics.record_persist_failure();
                    tracing::error!("Scan {} could not be saved: {}", outcome_id, e);
                    self.state.persist_failed(e.to_string());
                }
            },
        }
    }

    /// Hand an outcome to the sink without waiting for it
    fn persist(&self, outcome: ScanOutcome) {
        let sink = Arc::clone(&self.sink);
        let events = self.events_tx.clone();
        let outcome_id = outcome.id;

        tokio::spawn(async move {
            let result = sink.record(outcome).await;
            let _ = events.send(TaskEvent::PersistCompleted { outcome_id, result });
        });
    }

    fn handle_cooldown(&mut self) {
        if self.machine.on_cooldown_elapsed(Instant::now()) {
            self.metrics.record_rearm();
            tracing::debug!("Cooldown elapsed, scanner re-armed");
            self.state.rearm();
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::lookup::MockLookupClient;
    use crate::services::records::MockRecordSink;
    use std::sync::atomic::Ordering;
    use tokio::time::timeout;

    fn config() -> ArbiterConfig {
        ArbiterConfig {
            cooldown: Duration::from_secs(3),
            ..ArbiterConfig::default()
        }
    }

    async fn next_change(rx: &mut broadcast::Receiver<StateChange>) -> StateChange {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("Timeout waiting for event")
            .expect("Channel closed")
    }

    #[test]
    fn test_config_from_settings() {
        let settings = ScannerSettings {
            cooldown_ms: 1500,
            command_buffer: 8,
            event_buffer: 16,
        };
        let config = ArbiterConfig::from(&settings);
        assert_eq!(config.cooldown, Duration::from_millis(1500));
        assert_eq!(config.command_buffer, 8);
        assert_eq!(config.event_buffer, 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_cycle_records_once() {
        let mut lookup = MockLookupClient::new();
        lookup
            .expect_fetch()
            .withf(|code| code.to_string() == "0123456789012")
            .times(1)
            .returning(|_| Ok(IngredientRecord::new("Pancakes", "Wheat flour, Milk, Egg")));

        let mut sink = MockRecordSink::new();
        sink.expect_record()
            .withf(|outcome| outcome.product_name == "Pancakes" && !outcome.is_safe)
            .times(1)
            .returning(|_| Ok(()));

        let arbiter = ScanArbiter::spawn(
            config(),
            Arc::new(lookup),
            Arc::new(sink),
            RestrictionSet::from_names(["egg"]),
        );
        let mut rx = arbiter.subscribe();

        arbiter.detect(DetectionEvent::new("0123456789012")).await.unwrap();

        assert!(matches!(next_change(&mut rx).await, StateChange::BarcodeDetected { .. }));
        match next_change(&mut rx).await {
            StateChange::ScanResolved { verdict, .. } => {
                assert_eq!(verdict.flagged_ingredients, vec!["Egg"]);
            }
            other => panic!("Expected ScanResolved, got: {:?}", other),
        }
        assert!(matches!(next_change(&mut rx).await, StateChange::RecordPersisted { .. }));

        let metrics = arbiter.metrics();
        arbiter.shutdown().await.unwrap();
        assert_eq!(metrics.outcomes_recorded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_never_records() {
        let mut lookup = MockLookupClient::new();
        lookup
            .expect_fetch()
            .times(1)
            .returning(|_| Err(LookupError::InvalidCode));

        let mut sink = MockRecordSink::new();
        sink.expect_record().times(0);

        let arbiter = ScanArbiter::spawn(
            config(),
            Arc::new(lookup),
            Arc::new(sink),
            RestrictionSet::new(),
        );
        let mut rx = arbiter.subscribe();

        arbiter.detect(DetectionEvent::new("bad code")).await.unwrap();

        assert!(matches!(next_change(&mut rx).await, StateChange::BarcodeDetected { .. }));
        assert_eq!(
            next_change(&mut rx).await,
            StateChange::LookupFailed {
                code: "bad code".to_string(),
                error: LookupError::InvalidCode,
            }
        );
        assert_eq!(next_change(&mut rx).await, StateChange::Scanning);

        arbiter.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_is_surfaced_without_affecting_cycle() {
        let mut lookup = MockLookupClient::new();
        lookup
            .expect_fetch()
            .returning(|_| Ok(IngredientRecord::new("Rice", "Rice")));

        let mut sink = MockRecordSink::new();
        sink.expect_record()
            .times(1)
            .returning(|_| Err(PersistError::new("database offline")));

        let arbiter = ScanArbiter::spawn(
            config(),
            Arc::new(lookup),
            Arc::new(sink),
            RestrictionSet::new(),
        );
        let mut rx = arbiter.subscribe();
        let started = Instant::now();

        arbiter.detect(DetectionEvent::new("111")).await.unwrap();

        let mut saw_failure = false;
        loop {
            match next_change(&mut rx).await {
                StateChange::PersistFailed { message } => {
                    assert!(message.contains("database offline"));
                    saw_failure = true;
                }
                StateChange::Scanning => break,
                _ => {}
            }
        }

        assert!(saw_failure);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(arbiter.state().snapshot().last_persist_error.is_some());

        arbiter.shutdown().await.unwrap();
    }

    struct PanickingLookup;

    #[async_trait::async_trait]
    impl LookupClient for PanickingLookup {
        async fn fetch(&self, code: &str) -> Result<IngredientRecord, LookupError> {
            panic!("decoder backend crashed on {}", code);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_lookup_fails_cycle_and_rearms() {
        let mut sink = MockRecordSink::new();
        sink.expect_record().times(0);

        let arbiter = ScanArbiter::spawn(
            config(),
            Arc::new(PanickingLookup),
            Arc::new(sink),
            RestrictionSet::new(),
        );
        let mut rx = arbiter.subscribe();
        let started = Instant::now();

        arbiter.detect(DetectionEvent::new("111")).await.unwrap();

        assert!(matches!(next_change(&mut rx).await, StateChange::BarcodeDetected { .. }));
        match next_change(&mut rx).await {
            StateChange::LookupFailed { code, error } => {
                assert_eq!(code, "111");
                assert!(matches!(error, LookupError::NetworkFailure(_)));
            }
            other => panic!("Expected LookupFailed, got: {:?}", other),
        }
        assert_eq!(next_change(&mut rx).await, StateChange::Scanning);
        assert!(started.elapsed() >= Duration::from_secs(3));

        // The scanner accepts the next barcode instead of debouncing it
        arbiter.detect(DetectionEvent::new("222")).await.unwrap();
        assert_eq!(
            next_change(&mut rx).await,
            StateChange::BarcodeDetected {
                code: "222".to_string()
            }
        );

        assert!(matches!(next_change(&mut rx).await, StateChange::LookupFailed { .. }));

        let metrics = arbiter.metrics();
        assert_eq!(metrics.detections_debounced.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.lookups_failed.load(Ordering::Relaxed), 2);

        arbiter.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_reports_closed_after_shutdown() {
        let arbiter = ScanArbiter::spawn(
            config(),
            Arc::new(MockLookupClient::new()),
            Arc::new(MockRecordSink::new()),
            RestrictionSet::new(),
        );
        let handle = arbiter.handle();

        arbiter.shutdown().await.unwrap();

        assert_eq!(
            handle.detect(DetectionEvent::new("1")).await,
            Err(ArbiterError::Closed)
        );
    }
}
