//! Runner state machine
//!
//! The [`Runner`] owns the run state of one test case at a time and the task
//! that drives it. State moves `Idle -> Preparing -> Running -> Finished ->
//! Idle`; the move to `Running` waits until the [`Environment`] has a live
//! host. Readers get snapshots through a watch channel; only the runner
//! writes.
//!
//! Every driving task carries the generation it was started for. Starting a
//! new case or resetting bumps the generation, so a task that is still
//! winding down can never write state that belongs to a newer run.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::case::{CaseEnd, CaseObserver, CaseReport, TestCase};
use super::executor::StepOutcome;
use super::frames::CancelToken;
use super::step::{Step, StepContext};
use super::waiter::Waiter;
use crate::common::config::EngineConfig;
use crate::common::{Error, Result};
use crate::host::Host;

/// Failure message recorded when the environment goes away mid-run
pub const TORN_DOWN_MESSAGE: &str = "environment torn down";

// === Environment ===

/// Readiness signal from the embedding environment
#[derive(Clone)]
pub enum EnvEvent {
    /// A host became available
    Ready(Arc<dyn Host>),
    /// The host went away
    TornDown,
}

impl fmt::Debug for EnvEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(_) => write!(f, "Ready"),
            Self::TornDown => write!(f, "TornDown"),
        }
    }
}

enum Readiness {
    Ready(Arc<dyn Host>, broadcast::Receiver<EnvEvent>),
    Pending(broadcast::Receiver<EnvEvent>),
}

/// The execution environment the engine runs in
///
/// Holds at most one live host. The embedding program calls
/// [`Environment::ready`] when its UI is up and [`Environment::tear_down`]
/// when it goes away (scene reload, play mode stopped, window closed).
pub struct Environment {
    tx: broadcast::Sender<EnvEvent>,
    host: Mutex<Option<Arc<dyn Host>>>,
}

impl Environment {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            host: Mutex::new(None),
        }
    }

    /// Environment that already has a live host
    pub fn with_host(host: Arc<dyn Host>) -> Self {
        let env = Self::new();
        *env.lock() = Some(host);
        env
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn Host>>> {
        self.host.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Signal that a host is live
    ///
    /// A second host while one is live is discarded.
    pub fn ready(&self, host: Arc<dyn Host>) -> Result<()> {
        let mut current = self.lock();
        if current.is_some() {
            tracing::warn!("Environment already has a live host, discarding the new one");
            return Err(Error::DuplicateInstance("host"));
        }
        *current = Some(host.clone());
        tracing::info!(listeners = self.tx.receiver_count(), "Environment ready");
        // No listeners is fine: nobody is waiting
        let _ = self.tx.send(EnvEvent::Ready(host));
        Ok(())
    }

    /// Signal that the environment is going away
    ///
    /// Drops the live host, if any, and notifies every listener so pending
    /// starts are abandoned and running cases fail.
    pub fn tear_down(&self) {
        let mut current = self.lock();
        let had_host = current.take().is_some();
        tracing::info!(had_host, listeners = self.tx.receiver_count(), "Environment torn down");
        let _ = self.tx.send(EnvEvent::TornDown);
    }

    /// The live host, if any
    pub fn host(&self) -> Option<Arc<dyn Host>> {
        self.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.lock().is_some()
    }

    /// Number of registered readiness listeners
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribe and read the host under the same lock, so no event is missed
    fn subscribe(&self) -> Readiness {
        let current = self.lock();
        let rx = self.tx.subscribe();
        match current.as_ref() {
            Some(host) => Readiness::Ready(host.clone(), rx),
            None => Readiness::Pending(rx),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("ready", &self.is_ready())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// === Run state ===

/// Lifecycle phase of the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    /// Nothing to run
    #[default]
    Idle,
    /// A case is set and waits for the environment
    Preparing,
    /// A case is being driven
    Running,
    /// The case ended
    Finished { success: bool },
}

impl RunPhase {
    /// Idle or finished: nothing will change without a new request
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Idle | Self::Finished { .. })
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Preparing => write!(f, "preparing"),
            Self::Running => write!(f, "running"),
            Self::Finished { success: true } => write!(f, "finished (passed)"),
            Self::Finished { success: false } => write!(f, "finished (failed)"),
        }
    }
}

/// Observable state of the runner
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub phase: RunPhase,
    /// Case being prepared, run or last finished
    pub case: Option<Arc<TestCase>>,
    /// Step currently executing; `None` at run start, between runs and at the end
    pub current_step: Option<usize>,
    pub is_running: bool,
    pub has_failed: bool,
    /// Message of the first failing step
    pub failure_message: Option<String>,
    /// One slot per step of the case; `None` until the step has run
    pub step_results: Vec<Option<bool>>,
    pub outcomes: Vec<StepOutcome>,
}

impl RunState {
    fn preparing(case: Arc<TestCase>) -> Self {
        Self {
            phase: RunPhase::Preparing,
            step_results: vec![None; case.steps.len()],
            case: Some(case),
            ..Self::default()
        }
    }

    /// Name of the current case, if any
    pub fn case_name(&self) -> Option<&str> {
        self.case.as_deref().map(|c| c.name.as_str())
    }
}

// === Runner ===

#[derive(Default)]
struct Inner {
    generation: u64,
    cancel: Option<CancelToken>,
    driver: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

struct Shared {
    env: Arc<Environment>,
    config: EngineConfig,
    state: watch::Sender<RunState>,
    inner: Mutex<Inner>,
    runtime: Handle,
}

/// Drives one test case at a time against the environment's host
pub struct Runner {
    shared: Arc<Shared>,
}

impl Runner {
    /// Create a runner; must be called from within a tokio runtime
    pub fn new(env: Arc<Environment>, config: EngineConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("runner needs a tokio runtime: {}", e)))?;
        let (state, _) = watch::channel(RunState::default());
        Ok(Self {
            shared: Arc::new(Shared {
                env,
                config,
                state,
                inner: Mutex::new(Inner::default()),
                runtime,
            }),
        })
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.shared.env
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Set the case to run, abandoning any case still preparing or running
    ///
    /// The case starts right away when the environment has a live host and
    /// as soon as it gets one otherwise.
    pub fn set_test_case(&self, case: TestCase) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.lock();
        let previous = shared.state.borrow().phase;
        if matches!(previous, RunPhase::Preparing | RunPhase::Running) {
            tracing::info!(phase = %previous, "Abandoning current test case");
        }
        shared.abandon(&mut inner);

        let generation = inner.generation;
        let case = Arc::new(case);
        tracing::info!(case = %case.name, steps = case.steps.len(), generation, "Test case set");
        shared.state.send_replace(RunState::preparing(case.clone()));

        match shared.env.subscribe() {
            Readiness::Ready(host, events) => {
                shared.start_driving(&mut inner, generation, case, host, events)
            }
            Readiness::Pending(events) => {
                tracing::debug!("Environment not ready, deferring start");
                let task = Shared::listen(shared.clone(), generation, case, events);
                inner.listener = Some(shared.runtime.spawn(task));
                Ok(())
            }
        }
    }

    /// Start driving the pending case now
    ///
    /// Only valid while preparing with a ready environment. A request while
    /// a driver is live is discarded with [`Error::DuplicateInstance`].
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.lock();
        let state = shared.state.borrow().clone();
        match state.phase {
            RunPhase::Running => {
                tracing::warn!("Duplicate start request, keeping the live driver");
                return Err(Error::DuplicateInstance("driver"));
            }
            RunPhase::Preparing => {}
            phase => return Err(Error::invalid_state("start", phase)),
        }
        let Some(case) = state.case else {
            return Err(Error::invalid_state("start", "preparing without a case"));
        };
        match shared.env.subscribe() {
            Readiness::Ready(host, events) => {
                if let Some(listener) = inner.listener.take() {
                    listener.abort();
                }
                let generation = inner.generation;
                shared.start_driving(&mut inner, generation, case, host, events)
            }
            Readiness::Pending(_) => Err(Error::invalid_state("start", "waiting for environment")),
        }
    }

    /// Clear all state and return to idle; safe to call at any time
    pub fn reset(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        shared.abandon(&mut inner);
        shared.state.send_replace(RunState::default());
        tracing::debug!(generation = inner.generation, "Runner reset");
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.shared.state.subscribe()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> RunState {
        self.shared.state.borrow().clone()
    }

    /// Wait until the runner is idle or finished and return that state
    pub async fn wait_until_settled(&self) -> Result<RunState> {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(|s| s.phase.is_settled())
            .await
            .map_err(|e| Error::Internal(format!("run state channel closed: {}", e)))?;
        Ok(state.clone())
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        self.shared.abandon(&mut inner);
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("phase", &self.shared.state.borrow().phase)
            .field("env", &self.shared.env)
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop whatever belongs to the current generation and start a new one
    ///
    /// The driver is only cancelled; it notices at its next poll and exits
    /// without writing state.
    fn abandon(&self, inner: &mut Inner) {
        inner.generation += 1;
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }
        inner.driver = None;
        if let Some(listener) = inner.listener.take() {
            listener.abort();
        }
    }

    /// Apply `f` to the state if `generation` is still current
    fn write(&self, generation: u64, f: impl FnOnce(&mut Inner, &mut RunState)) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        self.state.send_modify(|state| f(&mut *inner, state));
        true
    }

    fn start_driving(
        self: &Arc<Self>,
        inner: &mut Inner,
        generation: u64,
        case: Arc<TestCase>,
        host: Arc<dyn Host>,
        events: broadcast::Receiver<EnvEvent>,
    ) -> Result<()> {
        if inner.driver.as_ref().is_some_and(|d| !d.is_finished()) {
            tracing::warn!(case = %case.name, "A driver is already live, discarding the new one");
            return Err(Error::DuplicateInstance("driver"));
        }

        let cancel = CancelToken::new();
        inner.cancel = Some(cancel.clone());
        self.state.send_modify(|state| {
            state.phase = RunPhase::Running;
            state.is_running = true;
            state.current_step = None;
        });
        tracing::info!(case = %case.name, generation, "Driving test case");

        let task = Self::drive(self.clone(), generation, case, host, cancel, events);
        inner.driver = Some(self.runtime.spawn(task));
        Ok(())
    }

    /// Wait for readiness on behalf of a pending case
    async fn listen(
        self: Arc<Self>,
        generation: u64,
        case: Arc<TestCase>,
        mut events: broadcast::Receiver<EnvEvent>,
    ) {
        let host = loop {
            match events.recv().await {
                Ok(EnvEvent::Ready(host)) => break host,
                Ok(EnvEvent::TornDown) => {
                    // Unregister before anyone can observe the idle state
                    drop(events);
                    self.write(generation, |inner, state| {
                        inner.listener = None;
                        *state = RunState::default();
                    });
                    tracing::info!(case = %case.name, "Environment torn down before start, pending case dropped");
                    return;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Readiness listener lagged");
                    if let Some(host) = self.env.host() {
                        break host;
                    }
                }
                Err(RecvError::Closed) => return,
            }
        };

        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.listener = None;
        if let Err(e) = self.start_driving(&mut inner, generation, case, host, events) {
            tracing::warn!("Could not start pending case: {}", e);
        }
    }

    /// Drive a case until it ends, is cancelled or the host goes away
    async fn drive(
        self: Arc<Self>,
        generation: u64,
        case: Arc<TestCase>,
        host: Arc<dyn Host>,
        cancel: CancelToken,
        mut events: broadcast::Receiver<EnvEvent>,
    ) {
        let ctx = StepContext::new(host, Waiter::from_config(&self.config));
        let mut observer = StateWriter {
            shared: self.clone(),
            generation,
        };
        let ambient = self.config.step_timeout;

        tokio::select! {
            report = case.run(&ctx, ambient, &cancel, &mut observer) => self.finish(generation, report),
            () = Self::torn_down(&self.env, &mut events) => {
                tracing::warn!(case = %case.name, "Environment torn down while running");
                self.write(generation, |inner, state| {
                    inner.driver = None;
                    inner.cancel = None;
                    state.phase = RunPhase::Finished { success: false };
                    state.is_running = false;
                    state.current_step = None;
                    state.has_failed = true;
                    state
                        .failure_message
                        .get_or_insert_with(|| TORN_DOWN_MESSAGE.to_string());
                });
            }
        }
    }

    async fn torn_down(env: &Environment, events: &mut broadcast::Receiver<EnvEvent>) {
        loop {
            match events.recv().await {
                Ok(EnvEvent::TornDown) => return,
                Ok(EnvEvent::Ready(_)) => {}
                Err(RecvError::Lagged(_)) => {
                    if !env.is_ready() {
                        return;
                    }
                }
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }

    fn finish(&self, generation: u64, report: CaseReport) {
        if report.end == CaseEnd::Cancelled {
            return;
        }
        let success = report.success();
        let written = self.write(generation, |inner, state| {
            inner.driver = None;
            inner.cancel = None;
            state.phase = RunPhase::Finished { success };
            state.is_running = false;
            state.current_step = None;
        });
        if written {
            tracing::info!(
                case = %report.name,
                success,
                passed = report.passed(),
                failed = report.failed(),
                "Run finished"
            );
        }
    }
}

/// Publishes case progress into the run state
struct StateWriter {
    shared: Arc<Shared>,
    generation: u64,
}

impl CaseObserver for StateWriter {
    fn step_started(&mut self, index: usize, _step: &Step) {
        self.shared.write(self.generation, |_, state| {
            state.current_step = Some(index);
        });
    }

    fn step_finished(&mut self, outcome: &StepOutcome) {
        self.shared.write(self.generation, |_, state| {
            if let Some(slot) = state.step_results.get_mut(outcome.index) {
                *slot = Some(outcome.success);
            }
            if !outcome.success && !state.has_failed {
                state.has_failed = true;
                state.failure_message = outcome.error_message.clone();
            }
            state.outcomes.push(outcome.clone());
        });
    }
}
