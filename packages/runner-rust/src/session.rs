//! Subscription sessions: one generation of a source's worker pool.
//!
//! Starting a generation parses the source config, registers the source
//! schema, subscribes through the configured broker, resolves features and
//! spawns the workers. The generation owns a cancellation scope; cancelling
//! it stops intake, and a single teardown task then shuts the subscription
//! down exactly once and acknowledges completion.

use std::sync::Arc;
use std::time::Duration;

use streaming_runner_core::{ObjectKey, SourceDefinition, StreamingConfig};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::broker::{Broker, BrokerRegistry, Subscription};
use crate::error::{ConfigurationError, GenerationError};
use crate::feature::Feature;
use crate::pipeline::ExecutionPipeline;
use crate::registration::Registrar;
use crate::resolver::FeatureResolver;

// ---------------------------------------------------------------------------
// SessionFactory
// ---------------------------------------------------------------------------

/// Starts generations from source definitions.
pub struct SessionFactory {
    brokers: Arc<BrokerRegistry>,
    registrar: Registrar,
    resolver: FeatureResolver,
}

impl SessionFactory {
    #[must_use]
    pub fn new(
        brokers: Arc<BrokerRegistry>,
        registrar: Registrar,
        resolver: FeatureResolver,
    ) -> Self {
        Self {
            brokers,
            registrar,
            resolver,
        }
    }

    /// Start generation `id` of `source` under `parent`.
    ///
    /// Nothing is left running when this fails.
    ///
    /// # Errors
    ///
    /// - [`GenerationError::Configuration`] for a non-streaming kind, an
    ///   unparsable config or an unregistered broker kind.
    /// - [`GenerationError::Registration`] when the source schema is rejected.
    /// - [`GenerationError::Subscribe`] when the broker cannot subscribe.
    pub async fn start(
        &self,
        id: u64,
        source: &SourceDefinition,
        parent: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        if !source.is_streaming() {
            return Err(ConfigurationError::UnsupportedSourceKind {
                kind: source.kind.clone(),
            }
            .into());
        }
        let config = StreamingConfig::parse(&source.config)?;

        if let Some(schema) = &config.schema {
            self.registrar.register_schema(schema.as_str()).await?;
        }

        let broker = self.brokers.get(&config.broker_kind)?;
        let scope = parent.child_token();
        let (intake, subscription) = match broker.subscribe(&scope, source, &config).await {
            Ok(pair) => pair,
            Err(err) => {
                scope.cancel();
                return Err(GenerationError::Subscribe(err));
            }
        };
        let teardown = spawn_teardown(id, source.key(), scope.clone(), Arc::clone(&subscription));

        let features = self.resolver.resolve(source, config.schema.as_ref()).await;
        let pipeline = Arc::new(ExecutionPipeline::new(
            source.source_id(),
            self.registrar.clone(),
            features,
        ));

        let (live_tx, live_rx) = watch::channel(0_usize);
        let live_tx = Arc::new(live_tx);
        for worker in 0..config.workers {
            let guard = LiveWorker::enter(Arc::clone(&live_tx), source.key(), scope.clone());
            let ctx = WorkerContext {
                worker,
                generation: id,
                source: source.key(),
                intake: intake.clone(),
                broker: Arc::clone(&broker),
                subscription: Arc::clone(&subscription),
                pipeline: Arc::clone(&pipeline),
            };
            let span = info_span!("worker", source = %source.key(), generation = id, worker);
            tokio::spawn(run_worker(ctx, guard).instrument(span));
        }

        info!(
            source = %source.key(),
            generation = id,
            broker = %config.broker_kind,
            workers = config.workers,
            features = pipeline.features().len(),
            "generation started"
        );

        Ok(Generation {
            id,
            source: source.key(),
            scope,
            pipeline,
            live: live_rx,
            teardown,
        })
    }
}

fn spawn_teardown(
    generation: u64,
    source: ObjectKey,
    scope: CancellationToken,
    subscription: Arc<dyn Subscription>,
) -> watch::Receiver<bool> {
    let (done_tx, done_rx) = watch::channel(false);
    tokio::spawn(async move {
        scope.cancelled().await;
        if let Err(err) = subscription.shutdown().await {
            warn!(source = %source, generation, error = %err, "subscription shutdown failed");
        }
        debug!(source = %source, generation, "generation torn down");
        let _ = done_tx.send(true);
    });
    done_rx
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Handle to a running generation.
pub struct Generation {
    id: u64,
    source: ObjectKey,
    scope: CancellationToken,
    pipeline: Arc<ExecutionPipeline>,
    live: watch::Receiver<usize>,
    teardown: watch::Receiver<bool>,
}

impl Generation {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn features(&self) -> &[Arc<Feature>] {
        self.pipeline.features()
    }

    /// Number of workers still consuming.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        *self.live.borrow()
    }

    /// Receiver tracking the live-worker count.
    #[must_use]
    pub fn watch_live_workers(&self) -> watch::Receiver<usize> {
        self.live.clone()
    }

    /// True once every worker has exited, whether by cancellation or by
    /// subscription failure.
    #[must_use]
    pub fn intake_stopped(&self) -> bool {
        self.live_workers() == 0
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Cancel the generation's scope. Idempotent.
    pub fn cancel(&self) {
        if !self.scope.is_cancelled() {
            debug!(source = %self.source, generation = self.id, "cancelling generation");
        }
        self.scope.cancel();
    }

    /// Wait until the subscription has been shut down.
    pub async fn torn_down(&self) {
        let mut rx = self.teardown.clone();
        // A dropped sender means the teardown task is gone; nothing left to wait for.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Wait until every worker has exited.
    pub async fn workers_stopped(&self) {
        let mut rx = self.live.clone();
        let _ = rx.wait_for(|live| *live == 0).await;
    }

    /// Cancel and wait for teardown, at most `timeout`.
    ///
    /// Returns `false` when the deadline passed first; teardown then keeps
    /// running in the background.
    pub async fn stop(&self, timeout: Duration) -> bool {
        self.cancel();
        tokio::time::timeout(timeout, self.torn_down()).await.is_ok()
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("cancelled", &self.is_cancelled())
            .field("live_workers", &self.live_workers())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// RAII registration of one live worker.
///
/// Incremented on creation, decremented on drop even if the worker panics.
struct LiveWorker {
    live: Arc<watch::Sender<usize>>,
    source: ObjectKey,
    scope: CancellationToken,
}

impl LiveWorker {
    fn enter(live: Arc<watch::Sender<usize>>, source: ObjectKey, scope: CancellationToken) -> Self {
        live.send_modify(|n| *n += 1);
        metrics::gauge!("streaming_live_workers").increment(1.0);
        Self {
            live,
            source,
            scope,
        }
    }
}

impl Drop for LiveWorker {
    fn drop(&mut self) {
        let mut remaining = 0;
        self.live.send_modify(|n| {
            *n = n.saturating_sub(1);
            remaining = *n;
        });
        metrics::gauge!("streaming_live_workers").decrement(1.0);
        if remaining == 0 {
            if self.scope.is_cancelled() {
                debug!(source = %self.source, "all workers stopped");
            } else {
                warn!(source = %self.source, "all workers exited, source no longer consuming");
            }
        }
    }
}

struct WorkerContext {
    worker: usize,
    generation: u64,
    source: ObjectKey,
    intake: CancellationToken,
    broker: Arc<dyn Broker>,
    subscription: Arc<dyn Subscription>,
    pipeline: Arc<ExecutionPipeline>,
}

async fn run_worker(ctx: WorkerContext, _guard: LiveWorker) {
    debug!(source = %ctx.source, generation = ctx.generation, worker = ctx.worker, "worker started");
    loop {
        let message = match ctx.subscription.receive(&ctx.intake).await {
            Ok(message) => message,
            Err(err) => {
                if ctx.intake.is_cancelled() {
                    debug!(source = %ctx.source, worker = ctx.worker, "worker stopping");
                } else {
                    warn!(source = %ctx.source, worker = ctx.worker, error = %err, "receive failed, worker exiting");
                }
                return;
            }
        };

        let metadata = ctx.broker.extract_metadata(&message);
        match ctx
            .pipeline
            .process(&metadata, &message.metadata, &message.body)
            .await
        {
            Ok(()) => {
                message.ack();
                metrics::counter!("streaming_messages_total", "outcome" => "ack").increment(1);
                debug!(source = %ctx.source, message_id = %metadata.id, "message acknowledged");
            }
            Err(err) if message.nackable() => {
                message.nack();
                metrics::counter!("streaming_messages_total", "outcome" => "nack").increment(1);
                warn!(source = %ctx.source, message_id = %metadata.id, error = %err, "message rejected");
            }
            Err(err) => {
                drop(message);
                metrics::counter!("streaming_messages_total", "outcome" => "drop").increment(1);
                warn!(source = %ctx.source, message_id = %metadata.id, error = %err, "message dropped");
            }
        }
    }
}
