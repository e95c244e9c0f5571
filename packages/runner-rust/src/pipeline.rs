//! Per-message execution pipeline.
//!
//! Every message is dispatched to the generation's features one at a time,
//! in declaration order. The first failing feature aborts the message; the
//! features after it are not executed.

use std::collections::HashMap;
use std::sync::Arc;

use streaming_runner_core::{Envelope, MessageMetadata, TypedPayload};
use tracing::{debug, warn};

use crate::error::{ExecutionError, ProtocolViolation};
use crate::feature::Feature;
use crate::registration::{new_correlation_id, Registrar};
use crate::traits::ExecuteRequest;

/// Upper bound on `execute_program` calls per feature and message.
pub const MAX_EXECUTION_ATTEMPTS: u32 = 3;

/// Dispatches messages to the resolved features of one generation.
pub struct ExecutionPipeline {
    source_id: String,
    registrar: Registrar,
    features: Vec<Arc<Feature>>,
}

impl ExecutionPipeline {
    #[must_use]
    pub fn new(source_id: String, registrar: Registrar, features: Vec<Arc<Feature>>) -> Self {
        Self {
            source_id,
            registrar,
            features,
        }
    }

    #[must_use]
    pub fn features(&self) -> &[Arc<Feature>] {
        &self.features
    }

    /// Run every feature against one message.
    ///
    /// A message with no features is trivially successful.
    ///
    /// # Errors
    ///
    /// Returns the first feature's [`ExecutionError`]; later features are skipped.
    pub async fn process(
        &self,
        metadata: &MessageMetadata,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<(), ExecutionError> {
        for feature in &self.features {
            let envelope = Envelope::new(&self.source_id, &feature.schema, metadata, headers, body);
            let payload = envelope
                .to_payload()
                .map_err(|source| ExecutionError::Envelope {
                    fqn: feature.fqn.clone(),
                    source,
                })?;
            self.execute(feature, &payload).await?;
        }
        Ok(())
    }

    /// Execute one feature, re-registering its program when the runtime has
    /// forgotten it.
    ///
    /// Every attempt carries a fresh correlation id and the fingerprint that
    /// is current at that moment. A `NotFound` on the final attempt is not
    /// followed by another registration.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::Exhausted`] after [`MAX_EXECUTION_ATTEMPTS`] `NotFound`s.
    /// - [`ExecutionError::Runtime`] on any other RPC failure, without retry.
    /// - [`ExecutionError::Registration`] when re-registration fails.
    /// - [`ExecutionError::Protocol`] when the correlation id is not echoed.
    pub async fn execute(
        &self,
        feature: &Feature,
        payload: &TypedPayload,
    ) -> Result<(), ExecutionError> {
        for attempt in 1..=MAX_EXECUTION_ATTEMPTS {
            let fingerprint = match feature.fingerprint() {
                Some(fp) => fp,
                None => self.registrar.register_program(feature).await?,
            };

            let uuid = new_correlation_id();
            let request = ExecuteRequest {
                uuid: uuid.clone(),
                fqn: feature.fqn.clone(),
                fingerprint: fingerprint.to_string(),
                payload: payload.clone(),
            };

            match self.registrar.runtime().execute_program(request).await {
                Ok(resp) => {
                    ProtocolViolation::check("execute_program", &uuid, &resp.uuid)?;
                    metrics::counter!("streaming_executions_total", "outcome" => "ok").increment(1);
                    debug!(fqn = %feature.fqn, attempt, "feature executed");
                    return Ok(());
                }
                Err(err) if err.is_not_found() => {
                    metrics::counter!("streaming_executions_total", "outcome" => "not_found")
                        .increment(1);
                    if attempt == MAX_EXECUTION_ATTEMPTS {
                        break;
                    }
                    warn!(
                        fqn = %feature.fqn,
                        fingerprint = %fingerprint,
                        attempt,
                        "program unknown to runtime, re-registering"
                    );
                    metrics::counter!("streaming_program_reloads_total").increment(1);
                    self.registrar.register_program(feature).await?;
                }
                Err(source) => {
                    metrics::counter!("streaming_executions_total", "outcome" => "error")
                        .increment(1);
                    return Err(ExecutionError::Runtime {
                        fqn: feature.fqn.clone(),
                        source,
                    });
                }
            }
        }

        Err(ExecutionError::Exhausted {
            fqn: feature.fqn.clone(),
            attempts: MAX_EXECUTION_ATTEMPTS,
        })
    }
}
