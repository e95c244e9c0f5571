use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use streaming_runner_core::{ObjectKey, TypedPayload};

use crate::error::{FetchError, RuntimeError};

/// Response to a program registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadProgramResponse {
    /// Echo of the request's correlation id.
    pub uuid: String,
    /// Content fingerprint of the registered program.
    pub fingerprint: String,
}

/// One program execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Correlation id, echoed by the runtime.
    pub uuid: String,
    pub fqn: String,
    pub fingerprint: String,
    pub payload: TypedPayload,
}

/// Response to a program execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub uuid: String,
}

/// Remote feature runtime. Every exchange carries a correlation id that the
/// runtime echoes back.
/// Implementations: HTTP/JSON, scripted fakes (tests).
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Register a schema URI. Returns the echoed correlation id.
    async fn register_schema(&self, uuid: &str, schema: &str) -> Result<String, RuntimeError>;

    /// Register program text and obtain its fingerprint.
    async fn load_program(
        &self,
        uuid: &str,
        program: &str,
    ) -> Result<LoadProgramResponse, RuntimeError>;

    /// Execute a registered program. Fails with [`RuntimeError::NotFound`]
    /// when the fingerprint is unknown to the runtime.
    async fn execute_program(&self, request: ExecuteRequest)
        -> Result<ExecuteResponse, RuntimeError>;
}

/// Metadata store holding feature definitions.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Fetch the raw builder configuration of a feature.
    async fn get_feature(&self, key: &ObjectKey) -> Result<Vec<u8>, FetchError>;
}
