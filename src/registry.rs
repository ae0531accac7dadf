//! Concurrency-safe set of listeners and the broadcast that feeds them.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::event::Event;
use crate::listener::Listener;

/// Membership key: the address of the listener's allocation.
///
/// The map holds a clone of the `Arc`, so an address cannot be reused by
/// another listener while its owner is still registered.
type ListenerKey = usize;

fn key_of(listener: &Arc<dyn Listener>) -> ListenerKey {
    Arc::as_ptr(listener) as *const () as usize
}

/// Shared registry of listeners.
///
/// Cloning is cheap and every clone refers to the same set, so the watch
/// loop, the main thread and any timer thread can each hold one.
///
/// Broadcasts run over a snapshot of the membership taken under the lock;
/// the lock is released before any listener is invoked, so a slow listener
/// never holds up `add` or `remove`.
#[derive(Clone, Default)]
pub struct Registry {
    listeners: Arc<Mutex<HashMap<ListenerKey, Arc<dyn Listener>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Adding the same instance twice is a no-op.
    pub fn add(&self, listener: Arc<dyn Listener>) {
        let key = key_of(&listener);
        let mut listeners = self.listeners.lock();
        if listeners.insert(key, listener).is_none() {
            info!("added listener {key:#x} ({} registered)", listeners.len());
        }
    }

    /// Unregister a listener. Removing a non-member is a no-op.
    ///
    /// A broadcast already in flight may still reach the listener; every
    /// broadcast that starts after this returns will not.
    pub fn remove(&self, listener: &Arc<dyn Listener>) {
        let key = key_of(listener);
        let mut listeners = self.listeners.lock();
        if listeners.remove(&key).is_some() {
            info!("removed listener {key:#x} ({} registered)", listeners.len());
        }
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// Listeners are invoked one at a time, in no particular order. A
    /// listener that returns an error or panics is logged and skipped; the
    /// rest still get the event. Returns the number of successful deliveries.
    pub fn broadcast(&self, event: &Event) -> usize {
        let snapshot: Vec<Arc<dyn Listener>> =
            self.listeners.lock().values().map(Arc::clone).collect();
        let total = snapshot.len();

        let mut delivered = 0;
        for (position, listener) in snapshot.iter().enumerate() {
            let position = position + 1;
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => warn!(
                    "listener {position}/{total} failed on event {}: {err:#}",
                    event.seq()
                ),
                Err(_) => warn!(
                    "listener {position}/{total} panicked on event {}",
                    event.seq()
                ),
            }
        }
        delivered
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Op;
    use anyhow::{bail, Result};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    /// Records every event it receives.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Event>>,
    }

    impl Listener for Recorder {
        fn on_event(&self, event: &Event) -> Result<()> {
            self.seen.lock().push(event.clone());
            Ok(())
        }
    }

    fn recorder() -> (Arc<Recorder>, Arc<dyn Listener>) {
        let rec = Arc::new(Recorder::default());
        let handle: Arc<dyn Listener> = rec.clone();
        (rec, handle)
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn Listener>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let listener: Arc<dyn Listener> = Arc::new(move |_: &Event| -> Result<()> {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, listener)
    }

    #[test]
    fn every_listener_gets_the_same_event_once() {
        let registry = Registry::new();
        let (rec1, l1) = recorder();
        let (rec2, l2) = recorder();
        registry.add(l1);
        registry.add(l2);

        let event = Event::new(0, "a.txt", Op::Create);
        assert_eq!(registry.broadcast(&event), 2);

        assert_eq!(*rec1.seen.lock(), vec![event.clone()]);
        assert_eq!(*rec2.seen.lock(), vec![event]);
    }

    #[test]
    fn removed_listener_is_skipped() {
        let registry = Registry::new();
        let (rec1, l1) = recorder();
        let (rec2, l2) = recorder();
        registry.add(l1);
        registry.add(Arc::clone(&l2));
        registry.remove(&l2);

        registry.broadcast(&Event::new(0, "a.txt", Op::Write));

        assert_eq!(rec1.seen.lock().len(), 1);
        assert!(rec2.seen.lock().is_empty());
    }

    #[test]
    fn adding_twice_delivers_once() {
        let registry = Registry::new();
        let (count, listener) = counter();
        registry.add(Arc::clone(&listener));
        registry.add(listener);
        assert_eq!(registry.len(), 1);

        registry.broadcast(&Event::new(0, "a.txt", Op::Create));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn identical_listeners_are_distinct_members() {
        let registry = Registry::new();
        registry.add(Arc::new(crate::listener::LogListener::new(1)));
        registry.add(Arc::new(crate::listener::LogListener::new(1)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removing_a_stranger_is_a_no_op() {
        let registry = Registry::new();
        let (_, member) = counter();
        let (_, stranger) = counter();
        registry.add(member);

        registry.remove(&stranger);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failing_listeners_do_not_stop_the_others() {
        let registry = Registry::new();
        let (count, good) = counter();
        let erroring: Arc<dyn Listener> =
            Arc::new(|_: &Event| -> Result<()> { bail!("disk full") });
        let panicking: Arc<dyn Listener> =
            Arc::new(|_: &Event| -> Result<()> { panic!("listener blew up") });
        registry.add(erroring);
        registry.add(panicking);
        registry.add(good);

        let delivered = registry.broadcast(&Event::new(0, "a.txt", Op::Remove));
        assert_eq!(delivered, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The registry is still usable after a listener panicked.
        registry.broadcast(&Event::new(1, "a.txt", Op::Remove));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_can_mutate_registry_during_broadcast() {
        let registry = Registry::new();
        let (count, victim) = counter();
        let reg = registry.clone();
        let victim_clone = Arc::clone(&victim);
        let remover: Arc<dyn Listener> = Arc::new(move |_: &Event| -> Result<()> {
            reg.remove(&victim_clone);
            Ok(())
        });
        registry.add(remover);
        registry.add(victim);

        // The first broadcast may or may not reach the victim, depending on
        // iteration order; it must not deadlock.
        registry.broadcast(&Event::new(0, "a.txt", Op::Write));
        let after_first = count.load(Ordering::SeqCst);
        assert!(after_first <= 1);

        registry.broadcast(&Event::new(1, "a.txt", Op::Write));
        assert_eq!(count.load(Ordering::SeqCst), after_first);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_add_remove_and_broadcast() {
        let registry = Registry::new();
        let (stable_count, stable) = counter();
        registry.add(stable);

        let done = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            let done = Arc::clone(&done);
            workers.push(thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let (_, listener) = counter();
                    registry.add(Arc::clone(&listener));
                    registry.remove(&listener);
                }
            }));
        }

        for seq in 0..500 {
            registry.broadcast(&Event::new(seq, "churn.txt", Op::Write));
        }
        done.store(true, Ordering::SeqCst);
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(stable_count.load(Ordering::SeqCst), 500);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_registry_broadcasts_to_nobody() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.broadcast(&Event::new(0, "a.txt", Op::Create)), 0);
    }
}
