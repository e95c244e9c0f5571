//! Feature builder configuration as stored in the metadata store.

use serde::{Deserialize, Serialize};

use crate::source::STREAMING_KIND;

/// Errors produced while decoding a feature builder.
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("failed to decode feature builder: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported feature builder kind {kind:?}")]
    UnsupportedKind { kind: String },
    #[error("feature builder has an empty expression")]
    EmptyExpression,
}

/// The `builder` section of a feature definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBuilder {
    pub kind: String,
    /// Empty, a bare fragment, or a fully-qualified schema URI.
    #[serde(default)]
    pub schema: String,
    /// Program text executed by the runtime.
    pub expression: String,
}

impl FeatureBuilder {
    /// Decodes raw builder JSON and checks it is a streaming builder.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError`] for malformed JSON, a non-streaming kind or
    /// a blank expression.
    pub fn decode(raw: &[u8]) -> Result<Self, BuilderError> {
        let builder: Self = serde_json::from_slice(raw)?;
        if builder.kind != STREAMING_KIND {
            return Err(BuilderError::UnsupportedKind { kind: builder.kind });
        }
        if builder.expression.trim().is_empty() {
            return Err(BuilderError::EmptyExpression);
        }
        Ok(builder)
    }
}
