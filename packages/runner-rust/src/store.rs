//! Feature definition stores.
//!
//! - [`DirectoryFeatureStore`]: one JSON document per feature on disk.
//! - [`MemoryFeatureStore`]: in-memory map, for embedding and tests.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use streaming_runner_core::ObjectKey;

use crate::error::FetchError;
use crate::traits::FeatureStore;

// ---------------------------------------------------------------------------
// DirectoryFeatureStore
// ---------------------------------------------------------------------------

/// Reads features from `{root}/{namespace}/{name}.json`.
///
/// Each document looks like `{"builder": {"kind": "streaming", ...}}`; only the
/// raw `builder` object is returned, decoding is left to the resolver.
#[derive(Debug, Clone)]
pub struct DirectoryFeatureStore {
    root: PathBuf,
}

#[derive(Deserialize)]
struct FeatureDocument {
    builder: Box<serde_json::value::RawValue>,
}

impl DirectoryFeatureStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Namespace and name must each be a single normal path component.
    fn path_for(&self, key: &ObjectKey) -> Result<PathBuf, FetchError> {
        if !is_path_segment(&key.namespace) || !is_path_segment(&key.name) {
            return Err(FetchError::InvalidKey { key: key.clone() });
        }
        Ok(self
            .root
            .join(&key.namespace)
            .join(format!("{}.json", key.name)))
    }
}

fn is_path_segment(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part.contains(['/', '\\', '\0'])
}

#[async_trait]
impl FeatureStore for DirectoryFeatureStore {
    async fn get_feature(&self, key: &ObjectKey) -> Result<Vec<u8>, FetchError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FetchError::NotFound { key: key.clone() })
            }
            Err(e) => {
                return Err(FetchError::Store {
                    key: key.clone(),
                    source: anyhow::Error::new(e).context(format!("reading {}", path.display())),
                })
            }
        };
        let doc: FeatureDocument =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Store {
                key: key.clone(),
                source: anyhow::Error::new(e).context(format!("parsing {}", path.display())),
            })?;
        Ok(doc.builder.get().as_bytes().to_vec())
    }
}

// ---------------------------------------------------------------------------
// MemoryFeatureStore
// ---------------------------------------------------------------------------

/// In-memory feature store keyed by object key.
#[derive(Debug, Default)]
pub struct MemoryFeatureStore {
    features: DashMap<ObjectKey, Vec<u8>>,
}

impl MemoryFeatureStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the raw builder config of a feature.
    pub fn insert(&self, key: ObjectKey, builder: impl Into<Vec<u8>>) {
        self.features.insert(key, builder.into());
    }

    pub fn remove(&self, key: &ObjectKey) {
        self.features.remove(key);
    }
}

#[async_trait]
impl FeatureStore for MemoryFeatureStore {
    async fn get_feature(&self, key: &ObjectKey) -> Result<Vec<u8>, FetchError> {
        self.features
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FetchError::NotFound { key: key.clone() })
    }
}
