use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{SourceRuntimeError, WatchSetupError};
use crate::event::{Event, Op};
use crate::registry::Registry;

/// A change as reported by the event source, before it gets a number.
#[derive(Debug, Clone)]
pub struct RawChange {
    pub path: PathBuf,
    pub kind: EventKind,
}

/// Everything the consuming thread waits on, multiplexed on one channel.
#[derive(Debug)]
pub enum Signal {
    Change(RawChange),
    Error(SourceRuntimeError),
    /// Wakes the loop so it notices a cancellation request.
    Stop,
}

/// A filesystem-event source feeding a watch loop.
///
/// The source is handed the loop's `Sender<Signal>` when it is created and
/// pushes changes and errors into it. It is owned exclusively by the loop's
/// thread; dropping it must release whatever it holds.
pub trait EventSource: Send + 'static {
    /// Attach `path` to the source (non-recursively).
    fn watch(&mut self, path: &Path) -> Result<(), WatchSetupError>;
}

/// The OS-native source, backed by `notify`.
pub struct NotifySource {
    watcher: RecommendedWatcher,
}

impl NotifySource {
    pub fn new(tx: Sender<Signal>) -> Result<Self, WatchSetupError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // A send error means the loop is gone; nothing left to tell.
            match res {
                Ok(event) => {
                    for change in raw_changes(event) {
                        let _ = tx.send(Signal::Change(change));
                    }
                }
                Err(err) => {
                    let _ = tx.send(Signal::Error(err));
                }
            }
        })
        .map_err(WatchSetupError::Create)?;

        Ok(Self { watcher })
    }
}

impl EventSource for NotifySource {
    fn watch(&mut self, path: &Path) -> Result<(), WatchSetupError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| WatchSetupError::Register {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// One raw change per affected path.
///
/// `Name(Both)` is dropped: backends that send it (inotify) have already
/// reported each end as `Name(From)` and `Name(To)`.
fn raw_changes(event: notify::Event) -> Vec<RawChange> {
    let kind = event.kind;
    if kind == EventKind::Modify(ModifyKind::Name(RenameMode::Both)) {
        return Vec::new();
    }
    if event.paths.is_empty() {
        return vec![RawChange {
            path: PathBuf::new(),
            kind,
        }];
    }
    event
        .paths
        .into_iter()
        .map(|path| RawChange { path, kind })
        .collect()
}

/// A watch loop that has not been started yet.
///
/// Starting consumes it; a stopped loop cannot be restarted, build a new
/// one instead.
pub struct WatchLoop {
    registry: Registry,
    path: PathBuf,
}

impl WatchLoop {
    pub fn new(registry: Registry, path: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            path: path.into(),
        }
    }

    /// Start watching with the OS-native source.
    pub fn start(self) -> Result<WatchHandle, WatchSetupError> {
        self.start_with(NotifySource::new)
    }

    /// Start watching with a source built by `make_source`.
    ///
    /// The path is resolved and registered before the consuming thread is
    /// spawned, so any setup failure is returned here and nothing is ever
    /// broadcast.
    pub fn start_with<S, F>(self, make_source: F) -> Result<WatchHandle, WatchSetupError>
    where
        S: EventSource,
        F: FnOnce(Sender<Signal>) -> Result<S, WatchSetupError>,
    {
        let path = self
            .path
            .canonicalize()
            .map_err(|source| WatchSetupError::Path {
                path: self.path.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel();
        let mut source = make_source(tx.clone())?;
        source.watch(&path)?;

        let stopper = Stopper {
            tx,
            stopped: Arc::new(AtomicBool::new(false)),
        };
        let registry = self.registry;
        let stopped = Arc::clone(&stopper.stopped);
        let thread = thread::Builder::new()
            .name("watch-loop".into())
            .spawn(move || run(registry, source, rx, &stopped))
            .map_err(WatchSetupError::Spawn)?;

        info!("watching {}", path.display());
        Ok(WatchHandle {
            path,
            stopper,
            thread,
        })
    }
}

/// The consuming side: one blocking receive per iteration.
///
/// Sequence numbers start at 0 and only advance on changes, so errors leave
/// no gaps. Each broadcast completes before the next signal is read.
/// `stopped` is checked after every receive, so changes still queued when
/// cancellation is requested are never broadcast.
fn run<S: EventSource>(
    registry: Registry,
    source: S,
    rx: Receiver<Signal>,
    stopped: &AtomicBool,
) {
    let mut seq: u64 = 0;

    while let Ok(signal) = rx.recv() {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        match signal {
            Signal::Change(raw) => {
                debug!("raw change: {:?} {}", raw.kind, raw.path.display());
                let event = Event::new(seq, raw.path, Op::from_kind(&raw.kind));
                seq += 1;
                registry.broadcast(&event);
            }
            Signal::Error(err) => error!("watch error: {err}"),
            Signal::Stop => break,
        }
    }

    drop(source);
    debug!("watch loop stopped after {seq} events");
}

/// A running watch loop.
pub struct WatchHandle {
    path: PathBuf,
    stopper: Stopper,
    thread: JoinHandle<()>,
}

impl WatchHandle {
    /// The resolved path being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// A cloneable token that cancels this loop from another thread.
    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    /// Cancel the loop and wait for it to release its source.
    ///
    /// A broadcast already running finishes; nothing queued behind it is
    /// delivered.
    pub fn stop(self) {
        self.stopper.stop();
        self.join();
    }

    /// Block until the loop is cancelled.
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("watch loop for {} panicked", self.path.display());
        }
    }
}

#[derive(Clone)]
pub struct Stopper {
    tx: Sender<Signal>,
    stopped: Arc<AtomicBool>,
}

impl Stopper {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Wake the loop if it is blocked in `recv`.
        let _ = self.tx.send(Signal::Stop);
    }
}
