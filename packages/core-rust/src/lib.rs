//! Streaming runner core: source definitions, streaming config, schema
//! resolution and the event envelope sent to the feature runtime.

pub mod config;
pub mod envelope;
pub mod feature;
pub mod metadata;
pub mod schema;
pub mod source;

pub use config::{ConfigError, StreamingConfig, DEFAULT_WORKERS};
pub use envelope::{
    decode_headers, encode_headers, Envelope, EnvelopeError, TypedPayload, ENVELOPE_TYPE_URL,
};
pub use feature::{BuilderError, FeatureBuilder};
pub use metadata::{content_type, now_millis, MessageMetadata};
pub use schema::{resolve_feature_schema, ResolvedSchema, SchemaError};
pub use source::{feature_fqn, FeatureReference, ObjectKey, SourceDefinition, STREAMING_KIND};

pub use url::Url;
