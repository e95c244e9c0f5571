//! Feature resolution: fetch, decode, resolve schema, register program.
//!
//! Resolution is partial-failure tolerant. A feature that cannot be fetched,
//! decoded or schema-resolved is logged and skipped; the others proceed. A
//! source whose features all fail still gets a running (idle) worker pool.

use std::sync::Arc;

use streaming_runner_core::{resolve_feature_schema, FeatureBuilder, ObjectKey, SourceDefinition, Url};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::feature::Feature;
use crate::registration::Registrar;
use crate::traits::FeatureStore;

pub struct FeatureResolver {
    store: Arc<dyn FeatureStore>,
    registrar: Registrar,
}

impl FeatureResolver {
    #[must_use]
    pub fn new(store: Arc<dyn FeatureStore>, registrar: Registrar) -> Self {
        Self { store, registrar }
    }

    /// Resolve every feature the source references, in declaration order.
    pub async fn resolve(
        &self,
        source: &SourceDefinition,
        source_schema: Option<&Url>,
    ) -> Vec<Arc<Feature>> {
        let keys = source.feature_keys();
        info!(source = %source.key(), count = keys.len(), "fetching feature definitions");

        let mut features = Vec::with_capacity(keys.len());
        for key in keys {
            debug!(feature = %key, "fetching feature definition");
            match self.resolve_one(&key, source_schema).await {
                Ok(feature) => features.push(Arc::new(feature)),
                Err(err) => warn!(feature = %key, error = %err, "skipping feature"),
            }
        }
        features
    }

    /// Resolve a single feature.
    ///
    /// A failed program registration does not fail resolution: the feature is
    /// returned without a fingerprint and gets registered on first dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the definition is missing or unreadable,
    /// is not a streaming builder, has an unresolvable schema, or its foreign
    /// schema cannot be registered.
    pub async fn resolve_one(
        &self,
        key: &ObjectKey,
        source_schema: Option<&Url>,
    ) -> Result<Feature, FetchError> {
        let raw = self.store.get_feature(key).await?;
        let builder = FeatureBuilder::decode(&raw).map_err(|source| FetchError::Builder {
            key: key.clone(),
            source,
        })?;

        let resolved = resolve_feature_schema(source_schema, &builder.schema).map_err(|source| {
            FetchError::Schema {
                key: key.clone(),
                source,
            }
        })?;
        if resolved.needs_registration() {
            self.registrar
                .register_schema(resolved.url().as_str())
                .await
                .map_err(|source| FetchError::SchemaRegistration {
                    key: key.clone(),
                    source,
                })?;
        }

        let feature = Feature::new(key.clone(), resolved.into_url(), builder.expression);
        if let Err(err) = self.registrar.register_program(&feature).await {
            warn!(
                fqn = %feature.fqn,
                error = %err,
                "program registration failed; deferring to first dispatch"
            );
        }
        Ok(feature)
    }
}
