//! Streaming runner: keeps one source's broker subscription feeding messages
//! through its features on a remote runtime.
//!
//! The [`SourceController`] reacts to source-definition events and owns the
//! generation lifecycle. Each generation subscribes through a [`Broker`] from
//! the [`BrokerRegistry`], resolves features via the [`FeatureStore`] and
//! runs a worker pool that dispatches every message through the
//! [`ExecutionPipeline`] to the [`RuntimeClient`].

pub mod broker;
pub mod config;
pub mod controller;
pub mod error;
pub mod feature;
pub mod health;
pub mod pipeline;
pub mod registration;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod store;
pub mod traits;
pub mod watch;

#[cfg(test)]
mod testing;

pub use broker::{Acker, Broker, BrokerRegistry, MemoryBroker, Message, Subscription};
pub use config::{ControllerConfig, RunnerConfig};
pub use controller::{ControllerStatus, SourceController, SourceState, StatusHandle};
pub use error::{
    ConfigurationError, ExecutionError, FetchError, GenerationError, ProtocolViolation,
    RegistrationError, RuntimeError,
};
pub use feature::Feature;
pub use pipeline::{ExecutionPipeline, MAX_EXECUTION_ATTEMPTS};
pub use resolver::FeatureResolver;
pub use runtime::HttpRuntimeClient;
pub use session::{Generation, SessionFactory};
pub use store::{DirectoryFeatureStore, MemoryFeatureStore};
pub use traits::{ExecuteRequest, ExecuteResponse, FeatureStore, LoadProgramResponse, RuntimeClient};
pub use watch::{FileSourceWatcher, SourceEvent};
