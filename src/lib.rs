//! Watch a path for filesystem changes and fan them out to listeners.
//!
//! A [`Registry`] holds the listeners; a [`WatchLoop`] owns the OS event
//! source, numbers each change and broadcasts it through the registry.

pub mod error;
pub mod event;
pub mod listener;
pub mod registry;
pub mod watcher;

pub use error::{SourceRuntimeError, WatchSetupError};
pub use event::{Event, Op};
pub use listener::{Listener, LogListener};
pub use registry::Registry;
pub use watcher::{EventSource, NotifySource, RawChange, Signal, Stopper, WatchHandle, WatchLoop};
