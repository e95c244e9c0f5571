//! Source definitions as delivered by the resource watch.
//!
//! A [`SourceDefinition`] is owned by an external system; the runner only ever
//! reads snapshots of it. The opaque `config` blob is parsed separately into a
//! [`StreamingConfig`](crate::config::StreamingConfig) at each generation start.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The only source (and feature builder) kind this runner accepts.
pub const STREAMING_KIND: &str = "streaming";

/// Namespaced identity of an externally managed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference from a source to one of the features it feeds.
///
/// An unset namespace means "same namespace as the source".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl FeatureReference {
    /// Returns the object key of the referenced feature, filling an unset or
    /// empty namespace with `default_namespace`.
    #[must_use]
    pub fn with_default_namespace(&self, default_namespace: &str) -> ObjectKey {
        let namespace = match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default_namespace,
        };
        ObjectKey::new(namespace, self.name.clone())
    }
}

/// Fully-qualified feature name: `"{name}.{namespace}"`.
#[must_use]
pub fn feature_fqn(key: &ObjectKey) -> String {
    format!("{}.{}", key.name, key.namespace)
}

/// Snapshot of the externally managed source object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Source kind. Only [`STREAMING_KIND`] is handled.
    pub kind: String,
    pub namespace: String,
    pub name: String,
    /// Opaque configuration blob; see [`crate::config::StreamingConfig`].
    #[serde(default)]
    pub config: serde_json::Value,
    /// Declared features, in dispatch order.
    #[serde(default)]
    pub features: Vec<FeatureReference>,
}

impl SourceDefinition {
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.kind == STREAMING_KIND
    }

    /// Stable identifier stamped into every envelope as its `source`.
    #[must_use]
    pub fn source_id(&self) -> String {
        format!("{}://{}/{}", self.kind, self.namespace, self.name)
    }

    /// Feature keys with the source namespace applied to unset references.
    #[must_use]
    pub fn feature_keys(&self) -> Vec<ObjectKey> {
        self.features
            .iter()
            .map(|r| r.with_default_namespace(&self.namespace))
            .collect()
    }
}
