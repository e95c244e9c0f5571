//! Schema and program registration against the remote runtime.

use std::sync::Arc;

use tracing::debug;

use crate::error::{ProtocolViolation, RegistrationError};
use crate::feature::Feature;
use crate::traits::RuntimeClient;

/// Fresh correlation id for one runtime exchange.
#[must_use]
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Performs registrations and verifies correlation ids.
#[derive(Clone)]
pub struct Registrar {
    runtime: Arc<dyn RuntimeClient>,
}

impl Registrar {
    #[must_use]
    pub fn new(runtime: Arc<dyn RuntimeClient>) -> Self {
        Self { runtime }
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn RuntimeClient> {
        &self.runtime
    }

    /// Register a schema URI with the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Schema`] on RPC failure and
    /// [`RegistrationError::Protocol`] when the correlation id is not echoed.
    pub async fn register_schema(&self, schema: &str) -> Result<(), RegistrationError> {
        let uuid = new_correlation_id();
        let echoed = self
            .runtime
            .register_schema(&uuid, schema)
            .await
            .map_err(|source| RegistrationError::Schema {
                schema: schema.to_string(),
                source,
            })?;
        ProtocolViolation::check("register_schema", &uuid, &echoed)?;
        debug!(schema, correlation_id = %uuid, "schema registered");
        Ok(())
    }

    /// Register the feature's program and publish the returned fingerprint
    /// on the feature.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Program`] on RPC failure and
    /// [`RegistrationError::Protocol`] when the correlation id is not echoed.
    /// The feature's fingerprint is left untouched on error.
    pub async fn register_program(&self, feature: &Feature) -> Result<Arc<String>, RegistrationError> {
        let uuid = new_correlation_id();
        let resp = self
            .runtime
            .load_program(&uuid, &feature.expression)
            .await
            .map_err(|source| RegistrationError::Program {
                fqn: feature.fqn.clone(),
                source,
            })?;
        ProtocolViolation::check("load_program", &uuid, &resp.uuid)?;
        debug!(fqn = %feature.fqn, fingerprint = %resp.fingerprint, "program registered");
        Ok(feature.publish_fingerprint(resp.fingerprint))
    }
}
