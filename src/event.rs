use std::fmt;
use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::EventKind;

/// Category of a filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Write,
    Remove,
    Rename,
    /// Permission or other metadata change.
    Chmod,
    /// Anything the source reports that we don't recognise.
    Unknown,
}

impl Op {
    /// Map a raw `notify` event kind onto an operation.
    ///
    /// Never fails: kinds outside the recognised set become `Unknown`.
    pub fn from_kind(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => Op::Create,
            // Some backends (kqueue, polling) only report `Modify(Any)` for writes
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                Op::Write
            }
            EventKind::Modify(ModifyKind::Name(_)) => Op::Rename,
            EventKind::Modify(ModifyKind::Metadata(_)) => Op::Chmod,
            EventKind::Remove(_) => Op::Remove,
            EventKind::Modify(ModifyKind::Other)
            | EventKind::Access(_)
            | EventKind::Any
            | EventKind::Other => Op::Unknown,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Create => "create",
            Op::Write => "write",
            Op::Remove => "remove",
            Op::Rename => "rename",
            Op::Chmod => "chmod",
            Op::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One delivered change, numbered by the watch loop that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    seq: u64,
    path: PathBuf,
    op: Op,
}

impl Event {
    pub fn new(seq: u64, path: impl Into<PathBuf>, op: Op) -> Self {
        Self {
            seq,
            path: path.into(),
            op,
        }
    }

    /// Sequence number, starting at 0 for the first event of a watch loop.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn op(&self) -> Op {
        self.op
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.seq, self.op, self.path.display())
    }
}
