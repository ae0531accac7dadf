use anyhow::Result;
use log::info;

use crate::event::Event;

/// Anything that wants to hear about filesystem events.
///
/// Returning an error (or panicking) only affects this listener: the
/// registry logs the failure and carries on with the others.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event) -> Result<()>;
}

impl<F> Listener for F
where
    F: Fn(&Event) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<()> {
        self(event)
    }
}

/// Writes every event it receives to the log.
#[derive(Debug)]
pub struct LogListener {
    id: usize,
}

impl LogListener {
    pub fn new(id: usize) -> Self {
        Self { id }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

impl Listener for LogListener {
    fn on_event(&self, event: &Event) -> Result<()> {
        info!(
            "listener {} got event {}: {} ({})",
            self.id,
            event.seq(),
            event.path().display(),
            event.op()
        );
        Ok(())
    }
}
