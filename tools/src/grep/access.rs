//! File-access telemetry hook.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Search,
}

/// Receives the files a tool touched. Implementations must not block.
pub trait AccessRecorder: Send + Sync {
    fn record_access(&self, path: &Path, kind: AccessKind, origin: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAccessRecorder;

impl AccessRecorder for NoopAccessRecorder {
    fn record_access(&self, _path: &Path, _kind: AccessKind, _origin: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEvent {
    pub path: PathBuf,
    pub kind: AccessKind,
    pub origin: String,
}

/// In-memory recorder. Clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct AccessLog {
    events: Arc<Mutex<Vec<AccessEvent>>>,
}

impl AccessLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AccessEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.events().into_iter().map(|event| event.path).collect()
    }
}

impl AccessRecorder for AccessLog {
    fn record_access(&self, path: &Path, kind: AccessKind, origin: &str) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AccessEvent {
                path: path.to_path_buf(),
                kind,
                origin: origin.to_string(),
            });
    }
}
