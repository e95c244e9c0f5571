use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::Broker;
use crate::error::ConfigurationError;

/// Table of broker implementations keyed by kind.
///
/// Populated once at bootstrap, then shared read-only as
/// `Arc<BrokerRegistry>` with the source controller. Lookups never mutate.
#[derive(Default)]
pub struct BrokerRegistry {
    brokers: HashMap<String, Arc<dyn Broker>>,
}

impl BrokerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            brokers: HashMap::new(),
        }
    }

    /// Register a broker under its own `kind()`. A later registration for the
    /// same kind replaces the earlier one.
    pub fn register<B: Broker + 'static>(&mut self, broker: B) -> &mut Self {
        self.register_shared(Arc::new(broker))
    }

    /// Register an already shared broker, keeping a handle for the caller.
    pub fn register_shared(&mut self, broker: Arc<dyn Broker>) -> &mut Self {
        let kind = broker.kind().to_string();
        if self.brokers.insert(kind.clone(), broker).is_some() {
            warn!(broker = %kind, "broker registered twice; keeping the latest");
        }
        self
    }

    /// Look up a broker by kind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownBroker`] for unregistered kinds.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn Broker>, ConfigurationError> {
        self.brokers
            .get(kind)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownBroker {
                kind: kind.to_string(),
            })
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.brokers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
