//! Error kinds of the streaming runner.
//!
//! None of these crash the process. They are logged with structured context
//! and scoped to the generation, feature or message that produced them.

use streaming_runner_core::{BuilderError, ConfigError, ObjectKey, SchemaError};

/// Bad or unsupported configuration. Aborts a generation start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unsupported source kind {kind:?}")]
    UnsupportedSourceKind { kind: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("broker {kind:?} not found")]
    UnknownBroker { kind: String },
}

/// Failure to fetch or accept one feature definition. Only that feature is skipped.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("feature {key} not found")]
    NotFound { key: ObjectKey },
    #[error("feature key {key} is not a valid store path")]
    InvalidKey { key: ObjectKey },
    #[error("failed to fetch feature {key}: {source}")]
    Store {
        key: ObjectKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid feature {key}: {source}")]
    Builder {
        key: ObjectKey,
        #[source]
        source: BuilderError,
    },
    #[error("feature {key}: {source}")]
    Schema {
        key: ObjectKey,
        #[source]
        source: SchemaError,
    },
    #[error("feature {key}: {source}")]
    SchemaRegistration {
        key: ObjectKey,
        #[source]
        source: RegistrationError,
    },
}

/// The runtime answered with a correlation id other than the one sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{call}: unexpected correlation id {actual:?}, expected {expected:?}")]
pub struct ProtocolViolation {
    pub call: &'static str,
    pub expected: String,
    pub actual: String,
}

impl ProtocolViolation {
    /// Checks that `actual` echoes `expected`.
    ///
    /// # Errors
    ///
    /// Returns the violation when the ids differ.
    pub fn check(call: &'static str, expected: &str, actual: &str) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self {
                call,
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

/// Status surface of the remote runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime does not know the program (e.g. it restarted).
    #[error("not found: {0}")]
    NotFound(String),
    #[error("runtime returned status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("runtime transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

impl RuntimeError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Schema or program registration failed.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("failed to register schema {schema}: {source}")]
    Schema {
        schema: String,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to register program for {fqn}: {source}")]
    Program {
        fqn: String,
        #[source]
        source: RuntimeError,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

/// Processing of one message failed. The message is negatively acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to build envelope for {fqn}: {source}")]
    Envelope {
        fqn: String,
        #[source]
        source: streaming_runner_core::EnvelopeError,
    },
    #[error("failed to execute program {fqn}: {source}")]
    Runtime {
        fqn: String,
        #[source]
        source: RuntimeError,
    },
    #[error("program {fqn} still unknown to the runtime after {attempts} attempts")]
    Exhausted { fqn: String, attempts: u32 },
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

/// Why a generation could not be started. The source stays not-ready.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error("failed to create subscription: {0}")]
    Subscribe(#[source] anyhow::Error),
}

impl From<ConfigError> for GenerationError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(ConfigurationError::Config(err))
    }
}
