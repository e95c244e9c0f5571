//! Normalized event envelope dispatched to the feature runtime.
//!
//! The envelope follows the `CloudEvents` 1.0 attribute set. Broker headers
//! travel in a single `headers` extension, encoded as a
//! `application/x-www-form-urlencoded` query string.
//!
//! # Wire format
//!
//! An envelope is serialized to named `MsgPack` (`rmp_serde::to_vec_named`) and
//! wrapped in a [`TypedPayload`] whose `type_url` identifies the encoding, so
//! the runtime can unpack it without out-of-band knowledge.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::metadata::{content_type, MessageMetadata};

/// `CloudEvents` spec version stamped on every envelope.
pub const SPEC_VERSION: &str = "1.0";

/// Type URL identifying a `MsgPack`-encoded [`Envelope`] inside a [`TypedPayload`].
pub const ENVELOPE_TYPE_URL: &str = "type.raptor.ml/io.cloudevents.v1.CloudEvent+msgpack";

/// Errors produced while packing or unpacking envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("unexpected payload type {actual:?}, expected {expected:?}")]
    UnexpectedType {
        expected: &'static str,
        actual: String,
    },
}

/// One inbound message prepared for a single feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub spec_version: String,
    /// Message id from broker metadata.
    pub id: String,
    /// Stable identifier of the originating source.
    pub source: String,
    /// Message timestamp, milliseconds since Unix epoch.
    pub time_millis: u64,
    /// Fully-qualified schema URI of the feature.
    pub data_schema: String,
    /// Topic the message arrived on.
    pub subject: String,
    /// Broker headers as a query string; see [`encode_headers`].
    pub headers: String,
    /// Payload media type, empty when the broker did not report one.
    pub content_type: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Envelope {
    /// Builds the envelope for one message and one feature schema.
    #[must_use]
    pub fn new(
        source: &str,
        schema: &Url,
        metadata: &MessageMetadata,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            id: metadata.id.clone(),
            source: source.to_string(),
            time_millis: metadata.timestamp_millis,
            data_schema: schema.to_string(),
            subject: metadata.topic.clone(),
            headers: encode_headers(headers),
            content_type: content_type(headers),
            data: body.to_vec(),
        }
    }

    /// Decodes the `headers` extension back into a key/value map.
    #[must_use]
    pub fn header_map(&self) -> HashMap<String, String> {
        decode_headers(&self.headers)
    }

    /// Serializes the envelope into its self-describing wire container.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if `MsgPack` serialization fails.
    pub fn to_payload(&self) -> Result<TypedPayload, EnvelopeError> {
        Ok(TypedPayload {
            type_url: ENVELOPE_TYPE_URL.to_string(),
            value: rmp_serde::to_vec_named(self)?,
        })
    }
}

/// Self-describing typed container: an encoded value tagged with its type URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedPayload {
    pub type_url: String,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

impl TypedPayload {
    /// Unpacks an [`Envelope`], checking the type URL first.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnexpectedType`] for foreign payloads and
    /// [`EnvelopeError::Decode`] for malformed envelope bytes.
    pub fn unpack_envelope(&self) -> Result<Envelope, EnvelopeError> {
        if self.type_url != ENVELOPE_TYPE_URL {
            return Err(EnvelopeError::UnexpectedType {
                expected: ENVELOPE_TYPE_URL,
                actual: self.type_url.clone(),
            });
        }
        Ok(rmp_serde::from_slice(&self.value)?)
    }
}

/// Encodes headers as a query string. Keys are sorted so output is stable.
#[must_use]
pub fn encode_headers(headers: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = headers.iter().collect();
    pairs.sort();
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Decodes a query string produced by [`encode_headers`].
///
/// Duplicate keys keep the last value.
#[must_use]
pub fn decode_headers(encoded: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(encoded.as_bytes())
        .into_owned()
        .collect()
}
