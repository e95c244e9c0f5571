//! Runner configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use streaming_runner_core::ObjectKey;

/// Command-line and environment configuration of the `streaming-runner` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "streaming-runner", version, about = "Streams broker messages into the feature runtime")]
pub struct RunnerConfig {
    /// Name of the source definition to run.
    #[arg(long, env = "SOURCE_NAME")]
    pub source_name: String,

    /// Namespace of the source definition to run.
    #[arg(long, env = "SOURCE_NAMESPACE")]
    pub source_namespace: String,

    /// JSON file holding the source definition; polled for changes.
    #[arg(long, env = "SOURCE_FILE", default_value = "source.json")]
    pub source_file: PathBuf,

    /// Root of the feature store (`<dir>/<namespace>/<name>.json`).
    #[arg(long, env = "FEATURE_DIR", default_value = "features")]
    pub feature_dir: PathBuf,

    /// Base URL of the feature runtime.
    #[arg(long, env = "RUNTIME_ADDR", default_value = "http://127.0.0.1:60005")]
    pub runtime_addr: String,

    /// Address of the liveness/readiness endpoints.
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    pub health_addr: SocketAddr,

    /// Address of the Prometheus scrape endpoint.
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    pub metrics_addr: SocketAddr,

    /// Emit JSON logs.
    #[arg(
        long,
        env = "PRODUCTION",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub production: bool,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 2_000)]
    pub poll_interval_ms: u64,

    /// Upper bound on waiting for a replaced generation's teardown.
    #[arg(long, env = "TEARDOWN_TIMEOUT_MS", default_value_t = 5_000)]
    pub teardown_timeout_ms: u64,

    /// Per-request timeout of runtime calls.
    #[arg(long, env = "RPC_TIMEOUT_MS", default_value_t = 30_000)]
    pub rpc_timeout_ms: u64,
}

impl RunnerConfig {
    #[must_use]
    pub fn source_key(&self) -> ObjectKey {
        ObjectKey::new(self.source_namespace.clone(), self.source_name.clone())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    #[must_use]
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            teardown_timeout: Duration::from_millis(self.teardown_timeout_ms),
        }
    }
}

/// Settings of a [`crate::controller::SourceController`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How long a reconfiguration waits for the previous generation's
    /// subscription shutdown before starting the next one.
    pub teardown_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            teardown_timeout: Duration::from_secs(5),
        }
    }
}
