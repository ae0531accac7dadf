use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use fswatch_notify::{Listener, LogListener, Registry, WatchLoop};

#[derive(Parser)]
#[command(name = "fswatch-notify", about = "Watch a path and notify listeners of changes")]
struct Cli {
    /// File or directory to watch (defaults to cwd)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Number of logging listeners to register
    #[arg(long, default_value_t = 2)]
    listeners: usize,

    /// Seconds before the last listener is removed (0 keeps it forever)
    #[arg(long, default_value_t = 10)]
    remove_after: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Listeners ───────────────────────────────────────────────
    let registry = Registry::new();
    let listeners: Vec<Arc<LogListener>> = (1..=cli.listeners)
        .map(|id| Arc::new(LogListener::new(id)))
        .collect();
    for listener in &listeners {
        registry.add(listener.clone());
    }

    // ── Watch loop ──────────────────────────────────────────────
    let handle = WatchLoop::new(registry.clone(), &cli.path)
        .start()
        .with_context(|| format!("cannot watch {}", cli.path.display()))?;

    // ── Deferred removal ────────────────────────────────────────
    // Independent of the registry: just a late call to the public remove.
    if let Some(last) = listeners.last().cloned().filter(|_| cli.remove_after > 0) {
        let delay = Duration::from_secs(cli.remove_after);
        let id = last.id();
        let last: Arc<dyn Listener> = last;
        let registry = registry.clone();
        thread::Builder::new()
            .name("deferred-remove".into())
            .spawn(move || {
                thread::sleep(delay);
                info!("removing listener {id} after {}s", delay.as_secs());
                registry.remove(&last);
            })
            .context("failed to spawn deferred removal thread")?;
    }

    // Runs until the process is killed.
    handle.join();
    Ok(())
}
