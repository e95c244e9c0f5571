//! Streaming configuration parsed from a source definition's config blob.
//!
//! The blob is opaque to the source owner; this module only extracts the keys
//! the runner itself needs (`kind`, `workers`, `schema`). The full blob is kept
//! so brokers can read their own settings (topic, brokers, group id, ...).

use serde::Deserialize;
use url::Url;

use crate::schema::fully_qualified;

/// Worker count used when the config omits `workers` or sets it to zero.
pub const DEFAULT_WORKERS: usize = 1;

/// Errors produced while parsing a [`StreamingConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("streaming config must be a JSON object")]
    NotAnObject,
    #[error("invalid streaming config: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("streaming config does not name a broker kind")]
    MissingBrokerKind,
    #[error("invalid worker count {value:?}")]
    InvalidWorkers { value: String },
    #[error("invalid source schema {value:?}: {source}")]
    InvalidSchema {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("source schema {value:?} must carry scheme, host and fragment")]
    SchemaNotFullyQualified { value: String },
}

/// Parsed per-generation streaming configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingConfig {
    /// Broker kind used to look up the broker implementation.
    pub broker_kind: String,
    /// Number of concurrent consumer tasks. Always at least 1.
    pub workers: usize,
    /// Source-level schema URI, registered with the runtime before subscribing.
    pub schema: Option<Url>,
    /// The complete config blob, handed to the broker on subscribe.
    pub broker_config: serde_json::Value,
}

/// Accepts `workers: 3` as well as `workers: "3"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WorkerCount {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
struct RawStreamingConfig {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    workers: Option<WorkerCount>,
    #[serde(default)]
    schema: Option<String>,
}

impl StreamingConfig {
    /// Parses the config blob of a source definition.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the blob is not an object, names no broker
    /// kind, carries a non-numeric worker count, or a schema URI that is
    /// unparsable or lacks scheme, host or fragment.
    pub fn parse(blob: &serde_json::Value) -> Result<Self, ConfigError> {
        if !blob.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        let raw: RawStreamingConfig = serde_json::from_value(blob.clone())?;

        let broker_kind = raw.kind.trim().to_string();
        if broker_kind.is_empty() {
            return Err(ConfigError::MissingBrokerKind);
        }

        let workers = match raw.workers {
            None => 0,
            Some(WorkerCount::Number(n)) => usize::try_from(n).map_err(|_| {
                ConfigError::InvalidWorkers {
                    value: n.to_string(),
                }
            })?,
            Some(WorkerCount::Text(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0
                } else {
                    trimmed
                        .parse::<usize>()
                        .map_err(|_| ConfigError::InvalidWorkers { value: s.clone() })?
                }
            }
        };

        let schema = match raw.schema.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => {
                Url::parse(value).map_err(|source| ConfigError::InvalidSchema {
                    value: value.to_string(),
                    source,
                })?;
                Some(fully_qualified(value).ok_or_else(|| {
                    ConfigError::SchemaNotFullyQualified {
                        value: value.to_string(),
                    }
                })?)
            }
        };

        Ok(Self {
            broker_kind,
            workers: if workers == 0 { DEFAULT_WORKERS } else { workers },
            schema,
            broker_config: blob.clone(),
        })
    }
}
