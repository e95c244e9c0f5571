//! Fakes shared by unit tests across the crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use streaming_runner_core::{MessageMetadata, SourceDefinition, StreamingConfig};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, MemoryBroker, Message, Subscription};
use crate::error::RuntimeError;
use crate::traits::{ExecuteRequest, ExecuteResponse, LoadProgramResponse, RuntimeClient};

/// Scripted result of one `execute_program` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    NotFound,
    Fail(u16),
    WrongEcho,
}

/// Runtime fake recording every call.
///
/// Execution outcomes are scripted per FQN; an empty script means success.
/// Program fingerprints are `fp-<n>` with `n` counting registrations.
#[derive(Default)]
pub struct ScriptedRuntime {
    schemas: Mutex<Vec<String>>,
    schema_failure: Mutex<Option<u16>>,
    corrupt_schema_echo: AtomicBool,
    loads: AtomicU32,
    started: AtomicU32,
    program_failure: Mutex<Option<u16>>,
    corrupt_program_echo: AtomicBool,
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    executions: Mutex<Vec<ExecuteRequest>>,
    exec_delay: Mutex<Option<Duration>>,
    schema_delay: Mutex<Option<Duration>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_schemas(&self, code: u16) {
        *self.schema_failure.lock() = Some(code);
    }

    pub fn corrupt_schema_echo(&self) {
        self.corrupt_schema_echo.store(true, Ordering::SeqCst);
    }

    pub fn fail_programs(&self, code: Option<u16>) {
        *self.program_failure.lock() = code;
    }

    pub fn corrupt_program_echo(&self) {
        self.corrupt_program_echo.store(true, Ordering::SeqCst);
    }

    pub fn script(&self, fqn: &str, outcomes: &[Outcome]) {
        self.scripts
            .lock()
            .insert(fqn.to_string(), outcomes.iter().copied().collect());
    }

    pub fn delay_executions(&self, delay: Duration) {
        *self.exec_delay.lock() = Some(delay);
    }

    pub fn delay_schemas(&self, delay: Duration) {
        *self.schema_delay.lock() = Some(delay);
    }

    pub fn schemas(&self) -> Vec<String> {
        self.schemas.lock().clone()
    }

    pub fn load_calls(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Executions that have begun, including ones still waiting out a delay.
    pub fn started_executions(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> Vec<ExecuteRequest> {
        self.executions.lock().clone()
    }

    pub fn executed_fqns(&self) -> Vec<String> {
        self.executions.lock().iter().map(|r| r.fqn.clone()).collect()
    }
}

#[async_trait]
impl RuntimeClient for ScriptedRuntime {
    async fn register_schema(&self, uuid: &str, schema: &str) -> Result<String, RuntimeError> {
        let delay = *self.schema_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(code) = *self.schema_failure.lock() {
            return Err(RuntimeError::Status {
                code,
                message: "schema rejected".into(),
            });
        }
        self.schemas.lock().push(schema.to_string());
        if self.corrupt_schema_echo.load(Ordering::SeqCst) {
            return Ok("bogus".into());
        }
        Ok(uuid.to_string())
    }

    async fn load_program(
        &self,
        uuid: &str,
        _program: &str,
    ) -> Result<LoadProgramResponse, RuntimeError> {
        if let Some(code) = *self.program_failure.lock() {
            return Err(RuntimeError::Status {
                code,
                message: "program rejected".into(),
            });
        }
        let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        let uuid = if self.corrupt_program_echo.load(Ordering::SeqCst) {
            "bogus".to_string()
        } else {
            uuid.to_string()
        };
        Ok(LoadProgramResponse {
            uuid,
            fingerprint: format!("fp-{n}"),
        })
    }

    async fn execute_program(
        &self,
        request: ExecuteRequest,
    ) -> Result<ExecuteResponse, RuntimeError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let delay = *self.exec_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = self
            .scripts
            .lock()
            .get_mut(&request.fqn)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Outcome::Ok);
        let uuid = request.uuid.clone();
        let fingerprint = request.fingerprint.clone();
        self.executions.lock().push(request);
        match outcome {
            Outcome::Ok => Ok(ExecuteResponse { uuid }),
            Outcome::NotFound => Err(RuntimeError::NotFound(fingerprint)),
            Outcome::Fail(code) => Err(RuntimeError::Status {
                code,
                message: "execution failed".into(),
            }),
            Outcome::WrongEcho => Ok(ExecuteResponse {
                uuid: "bogus".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingBroker
// ---------------------------------------------------------------------------

/// Memory broker that logs `subscribe:<topic>` and `shutdown:<topic>` events
/// in call order.
pub struct RecordingBroker {
    pub inner: Arc<MemoryBroker>,
    events: Arc<Mutex<Vec<String>>>,
    shutdown_delay: Arc<Mutex<Option<Duration>>>,
}

impl RecordingBroker {
    pub fn new(inner: Arc<MemoryBroker>) -> Self {
        Self {
            inner,
            events: Arc::new(Mutex::new(Vec::new())),
            shutdown_delay: Arc::new(Mutex::new(None)),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Make every later subscription shutdown stall for `delay` before
    /// recording itself.
    pub fn delay_shutdown(&self, delay: Duration) {
        *self.shutdown_delay.lock() = Some(delay);
    }
}

struct RecordingSubscription {
    topic: String,
    inner: Arc<dyn Subscription>,
    events: Arc<Mutex<Vec<String>>>,
    shutdown_delay: Arc<Mutex<Option<Duration>>>,
}

#[async_trait]
impl Subscription for RecordingSubscription {
    async fn receive(&self, scope: &CancellationToken) -> anyhow::Result<Message> {
        self.inner.receive(scope).await
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        let delay = *self.shutdown_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().push(format!("shutdown:{}", self.topic));
        self.inner.shutdown().await
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    async fn subscribe(
        &self,
        scope: &CancellationToken,
        source: &SourceDefinition,
        config: &StreamingConfig,
    ) -> anyhow::Result<(CancellationToken, Arc<dyn Subscription>)> {
        let topic = config
            .broker_config
            .get("topic")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.events.lock().push(format!("subscribe:{topic}"));
        let (child, inner) = self.inner.subscribe(scope, source, config).await?;
        let sub = RecordingSubscription {
            topic,
            inner,
            events: Arc::clone(&self.events),
            shutdown_delay: Arc::clone(&self.shutdown_delay),
        };
        Ok((child, Arc::new(sub)))
    }

    fn extract_metadata(&self, message: &Message) -> MessageMetadata {
        self.inner.extract_metadata(message)
    }
}

/// Poll `cond` until it holds or one second passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
