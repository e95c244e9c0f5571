//! Source controller: drives the generation lifecycle of one source.
//!
//! State machine: `Idle -> Starting -> Running | Failed -> ... -> Stopped`.
//!
//! Every create or update is a reconfiguration attempt. It clears readiness,
//! cancels the active generation and waits (bounded) for its subscription to
//! be shut down, then starts a new generation from the new definition. At
//! most one generation is ever consuming. A delete or a process shutdown
//! cancels the active generation and stops the controller.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use streaming_runner_core::{ObjectKey, SourceDefinition};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::broker::BrokerRegistry;
use crate::config::ControllerConfig;
use crate::registration::Registrar;
use crate::resolver::FeatureResolver;
use crate::session::{Generation, SessionFactory};
use crate::traits::{FeatureStore, RuntimeClient};
use crate::watch::SourceEvent;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// No generation; either nothing observed yet or a non-streaming kind.
    Idle,
    /// A reconfiguration attempt is in progress.
    Starting,
    /// Subscription and worker pool are established.
    Running,
    /// The last attempt failed to start a generation.
    Failed,
    /// The source was deleted or the process is shutting down.
    Stopped,
}

impl SourceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// Point-in-time view of a controller, served by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub source: String,
    pub state: SourceState,
    pub ready: bool,
    pub generation: Option<u64>,
    pub live_workers: usize,
    /// Every worker of the active generation has exited.
    pub intake_stopped: bool,
    /// FQNs of the resolved features, in dispatch order.
    pub features: Vec<String>,
}

#[derive(Clone)]
struct GenerationSummary {
    id: u64,
    features: Vec<String>,
    live: watch::Receiver<usize>,
}

impl GenerationSummary {
    fn of(generation: &Generation) -> Self {
        Self {
            id: generation.id(),
            features: generation.features().iter().map(|f| f.fqn.clone()).collect(),
            live: generation.watch_live_workers(),
        }
    }
}

struct Snapshot {
    state: SourceState,
    generation: Option<GenerationSummary>,
}

/// Cloneable, lock-free read handle on a controller's status.
#[derive(Clone)]
pub struct StatusHandle {
    source: ObjectKey,
    snapshot: Arc<ArcSwap<Snapshot>>,
}

impl StatusHandle {
    fn new(source: ObjectKey) -> Self {
        Self {
            source,
            snapshot: Arc::new(ArcSwap::from_pointee(Snapshot {
                state: SourceState::Idle,
                generation: None,
            })),
        }
    }

    fn set(&self, state: SourceState, generation: Option<GenerationSummary>) {
        debug!(source = %self.source, state = state.as_str(), "source state changed");
        self.snapshot.store(Arc::new(Snapshot { state, generation }));
    }

    #[must_use]
    pub fn state(&self) -> SourceState {
        self.snapshot.load().state
    }

    /// True only while a generation is running.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == SourceState::Running
    }

    #[must_use]
    pub fn status(&self) -> ControllerStatus {
        let snapshot = self.snapshot.load();
        let (generation, live_workers, features) = match &snapshot.generation {
            Some(g) => (Some(g.id), *g.live.borrow(), g.features.clone()),
            None => (None, 0, Vec::new()),
        };
        ControllerStatus {
            source: self.source.to_string(),
            state: snapshot.state,
            ready: snapshot.state == SourceState::Running,
            generation,
            live_workers,
            intake_stopped: generation.is_some() && live_workers == 0,
            features,
        }
    }
}

impl std::fmt::Debug for StatusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusHandle")
            .field("source", &self.source)
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SourceController
// ---------------------------------------------------------------------------

/// Owns the generations of a single source.
pub struct SourceController {
    key: ObjectKey,
    sessions: SessionFactory,
    config: ControllerConfig,
    root: CancellationToken,
    current: Option<Generation>,
    next_generation: u64,
    status: StatusHandle,
    stopped: bool,
}

impl SourceController {
    #[must_use]
    pub fn new(
        key: ObjectKey,
        brokers: Arc<BrokerRegistry>,
        runtime: Arc<dyn RuntimeClient>,
        store: Arc<dyn FeatureStore>,
        config: ControllerConfig,
    ) -> Self {
        let registrar = Registrar::new(runtime);
        let resolver = FeatureResolver::new(store, registrar.clone());
        Self {
            status: StatusHandle::new(key.clone()),
            key,
            sessions: SessionFactory::new(brokers, registrar, resolver),
            config,
            root: CancellationToken::new(),
            current: None,
            next_generation: 0,
            stopped: false,
        }
    }

    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Handle for readiness probes and status reporting.
    #[must_use]
    pub fn readiness_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    #[must_use]
    pub fn status(&self) -> ControllerStatus {
        self.status.status()
    }

    /// The active generation, if any.
    #[must_use]
    pub fn generation(&self) -> Option<&Generation> {
        self.current.as_ref()
    }

    /// True after a delete or shutdown; later events are ignored.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Apply one notification.
    pub async fn handle(&mut self, event: SourceEvent) {
        let found = event.definition().key();
        if found != self.key {
            debug!(source = %self.key, other = %found, "ignoring event for another source");
            return;
        }
        if self.stopped {
            debug!(source = %self.key, event = event.kind(), "controller stopped, ignoring event");
            return;
        }

        info!(source = %self.key, event = event.kind(), "source definition changed");
        match event {
            SourceEvent::Created(def) | SourceEvent::Updated { new: def, .. } => {
                self.reconcile(&def).await;
            }
            SourceEvent::Deleted(_) => self.shutdown().await,
        }
    }

    /// Consume events until a delete, channel close or `shutdown`.
    ///
    /// `shutdown` also interrupts an in-progress reconfiguration; whatever it
    /// had started is cancelled through the controller's root scope.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<SourceEvent>,
        shutdown: CancellationToken,
    ) {
        while !self.stopped {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!(source = %self.key, "shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        let interrupted = tokio::select! {
                            biased;
                            () = shutdown.cancelled() => true,
                            () = self.handle(event) => false,
                        };
                        if interrupted {
                            info!(source = %self.key, "shutdown requested during reconfiguration");
                            break;
                        }
                    }
                    None => {
                        debug!(source = %self.key, "event channel closed");
                        break;
                    }
                },
            }
        }
        self.shutdown().await;
    }

    /// Cancel the active generation and stop observing. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.status.set(SourceState::Stopped, None);
        self.retire_current().await;
        self.root.cancel();
        self.stopped = true;
        info!(source = %self.key, "source controller stopped");
    }

    async fn reconcile(&mut self, source: &SourceDefinition) {
        self.status.set(SourceState::Starting, None);
        self.retire_current().await;

        if !source.is_streaming() {
            warn!(source = %self.key, kind = %source.kind, "source kind is not streaming, ignoring");
            self.status.set(SourceState::Idle, None);
            return;
        }

        self.next_generation += 1;
        let id = self.next_generation;
        let span = info_span!("generation", source = %self.key, generation = id);
        match self
            .sessions
            .start(id, source, &self.root)
            .instrument(span)
            .await
        {
            Ok(generation) => {
                metrics::counter!("streaming_generations_total", "outcome" => "started").increment(1);
                self.status
                    .set(SourceState::Running, Some(GenerationSummary::of(&generation)));
                info!(source = %self.key, generation = id, "listening for streaming events");
                self.current = Some(generation);
            }
            Err(err) => {
                metrics::counter!("streaming_generations_total", "outcome" => "failed").increment(1);
                error!(source = %self.key, generation = id, error = %err, "failed to start generation");
                self.status.set(SourceState::Failed, None);
            }
        }
    }

    /// Cancel the active generation and wait for its teardown, bounded by
    /// the configured timeout.
    async fn retire_current(&mut self) {
        let Some(generation) = self.current.take() else {
            return;
        };
        let timeout = self.config.teardown_timeout;
        if generation.stop(timeout).await {
            debug!(source = %self.key, generation = generation.id(), "previous generation torn down");
        } else {
            warn!(
                source = %self.key,
                generation = generation.id(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "previous generation teardown timed out, continuing"
            );
        }
    }
}
