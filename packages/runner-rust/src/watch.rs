//! Source definition notifications.
//!
//! [`FileSourceWatcher`] turns a JSON file on disk into a stream of
//! create/update/delete events for one source key.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use streaming_runner_core::{ObjectKey, SourceDefinition};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Change notification for a source definition.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Created(SourceDefinition),
    Updated {
        old: SourceDefinition,
        new: SourceDefinition,
    },
    Deleted(SourceDefinition),
}

impl SourceEvent {
    /// The definition the event refers to (the new one for updates).
    #[must_use]
    pub fn definition(&self) -> &SourceDefinition {
        match self {
            Self::Created(def) | Self::Deleted(def) | Self::Updated { new: def, .. } => def,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Polls a source definition file and emits [`SourceEvent`]s on change.
#[derive(Debug, Clone)]
pub struct FileSourceWatcher {
    path: PathBuf,
    key: ObjectKey,
    interval: Duration,
}

impl FileSourceWatcher {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, key: ObjectKey, interval: Duration) -> Self {
        Self {
            path: path.into(),
            key,
            interval,
        }
    }

    /// Read the file once and diff it against `last`, updating `last`.
    pub async fn poll_once(&self, last: &mut Option<SourceDefinition>) -> Option<SourceEvent> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return last.take().map(SourceEvent::Deleted);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read source definition");
                return None;
            }
        };

        let def: SourceDefinition = match serde_json::from_slice(&bytes) {
            Ok(def) => def,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unparsable source definition");
                return None;
            }
        };
        if def.key() != self.key {
            debug!(expected = %self.key, found = %def.key(), "ignoring definition for another source");
            return None;
        }

        match last.replace(def.clone()) {
            None => Some(SourceEvent::Created(def)),
            Some(old) if old != def => Some(SourceEvent::Updated { old, new: def }),
            Some(_) => None,
        }
    }

    /// Poll until `shutdown` fires or the receiver goes away.
    pub async fn run(self, events: mpsc::Sender<SourceEvent>, shutdown: CancellationToken) {
        info!(path = %self.path.display(), source = %self.key, "watching source definition");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = None;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Some(event) = self.poll_once(&mut last).await {
                debug!(source = %self.key, event = event.kind(), "source definition changed");
                if events.send(event).await.is_err() {
                    debug!(source = %self.key, "event receiver gone, watcher exiting");
                    return;
                }
            }
        }
    }
}
