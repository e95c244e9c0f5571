//! Resolved features shared by the workers of one generation.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use streaming_runner_core::{feature_fqn, ObjectKey, Url};

/// A feature ready for dispatch.
///
/// Everything except the program fingerprint is fixed at resolution time.
/// The fingerprint is published through an `ArcSwapOption`, so workers that
/// race on re-registration only ever observe a whole previous or whole new
/// value.
pub struct Feature {
    pub key: ObjectKey,
    /// Fully-qualified name (`name.namespace`).
    pub fqn: String,
    /// Fully-qualified schema URI stamped on every envelope.
    pub schema: Url,
    /// Program text submitted on (re-)registration.
    pub expression: String,
    fingerprint: ArcSwapOption<String>,
}

impl Feature {
    #[must_use]
    pub fn new(key: ObjectKey, schema: Url, expression: String) -> Self {
        Self {
            fqn: feature_fqn(&key),
            key,
            schema,
            expression,
            fingerprint: ArcSwapOption::empty(),
        }
    }

    /// Current program fingerprint, absent until the first successful registration.
    #[must_use]
    pub fn fingerprint(&self) -> Option<Arc<String>> {
        self.fingerprint.load_full()
    }

    /// Atomically replace the fingerprint and return the published value.
    pub fn publish_fingerprint(&self, fingerprint: String) -> Arc<String> {
        let fingerprint = Arc::new(fingerprint);
        self.fingerprint.store(Some(Arc::clone(&fingerprint)));
        fingerprint
    }

    #[cfg(test)]
    pub(crate) fn for_tests(fqn: &str, expression: &str) -> Self {
        let (name, namespace) = fqn.split_once('.').unwrap_or((fqn, "default"));
        Self::new(
            ObjectKey::new(namespace, name),
            Url::parse("https://schemas.example.com/test.proto#Test").unwrap(),
            expression.to_string(),
        )
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("fqn", &self.fqn)
            .field("schema", &self.schema.as_str())
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqn_is_derived_from_key() {
        let ft = Feature::for_tests("clicks.prod", "x");
        assert_eq!(ft.fqn, "clicks.prod");
        assert_eq!(ft.key, ObjectKey::new("prod", "clicks"));
    }

    #[test]
    fn fingerprint_starts_absent_and_is_replaced_whole() {
        let ft = Feature::for_tests("a.b", "x");
        assert!(ft.fingerprint().is_none());

        let first = ft.publish_fingerprint("sha-1".into());
        let held = ft.fingerprint().unwrap();
        assert!(Arc::ptr_eq(&first, &held));

        ft.publish_fingerprint("sha-2".into());
        assert_eq!(held.as_str(), "sha-1", "readers keep the value they loaded");
        assert_eq!(ft.fingerprint().unwrap().as_str(), "sha-2");
    }

    #[tokio::test]
    async fn concurrent_publishers_never_tear() {
        let ft = Arc::new(Feature::for_tests("a.b", "x"));
        let mut handles = Vec::new();
        for i in 0..8 {
            let ft = Arc::clone(&ft);
            handles.push(tokio::spawn(async move {
                for j in 0..100 {
                    ft.publish_fingerprint(format!("fp-{i}-{j}"));
                    let seen = ft.fingerprint().unwrap();
                    assert!(seen.starts_with("fp-"));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(ft.fingerprint().unwrap().ends_with("-99"));
    }
}
