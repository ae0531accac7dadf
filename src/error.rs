//! Error types for the watch loop.

use std::io;
use std::path::PathBuf;

/// Failure to get a watch loop running. The loop never starts.
#[derive(Debug, thiserror::Error)]
pub enum WatchSetupError {
    /// The target path could not be resolved (missing, unreadable, ...).
    #[error("cannot resolve {}: {source}", path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The filesystem-event source could not be created.
    #[error("failed to create file watcher: {0}")]
    Create(#[source] notify::Error),

    /// The source refused to watch the path.
    #[error("failed to watch {}: {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The consuming thread could not be spawned.
    #[error("failed to spawn watch thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Error reported by the source while the loop is running.
///
/// These are logged by the loop and never reach listeners.
pub type SourceRuntimeError = notify::Error;
