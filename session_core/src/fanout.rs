//! Publish/subscribe delivery of session updates.
//!
//! Every accepted append and every reset produces exactly one
//! [`SessionUpdate`], delivered to each live subscriber in publication
//! order. Dropping (or calling [`Subscription::unsubscribe`] on) the handle
//! returned by [`Fanout::subscribe`] stops delivery: once it returns, the
//! callback is not invoked again. A delivery already running on another
//! thread is allowed to finish first.

use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use telemetry_runtime::Snapshot;

use crate::aggregate::LiveAggregate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Appended,
    /// The session was cleared. An empty sequence tagged with this kind is a
    /// reset, not "no data yet".
    SessionReset,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionUpdate<'a> {
    pub kind: UpdateKind,
    /// Monotonic per-session-actor update counter.
    pub sequence: u64,
    pub snapshots: &'a VecDeque<Snapshot>,
    pub aggregate: &'a LiveAggregate,
}

impl<'a> SessionUpdate<'a> {
    pub fn latest(&self) -> Option<&'a Snapshot> {
        self.snapshots.back()
    }
}

type Callback = Box<dyn FnMut(&SessionUpdate<'_>) + Send>;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static DELIVERING: Cell<Option<u64>> = const { Cell::new(None) };
}

struct SubscriberSlot {
    id: u64,
    active: AtomicBool,
    callback: Mutex<Callback>,
}

#[derive(Default)]
struct Registry {
    slots: Vec<Arc<SubscriberSlot>>,
}

#[derive(Clone, Default)]
pub struct Fanout {
    registry: Arc<Mutex<Registry>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&SessionUpdate<'_>) + Send + 'static,
    {
        let slot = Arc::new(SubscriberSlot {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            active: AtomicBool::new(true),
            callback: Mutex::new(Box::new(callback)),
        });
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .push(Arc::clone(&slot));
        Subscription {
            slot,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .iter()
            .filter(|slot| slot.active.load(Ordering::Acquire))
            .count()
    }

    /// Deliver `update` to every live subscriber. Returns the ids of
    /// subscribers whose callback panicked; those are unsubscribed.
    pub fn publish(&self, update: &SessionUpdate<'_>) -> Vec<u64> {
        let slots: Vec<Arc<SubscriberSlot>> = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .slots
                .retain(|slot| slot.active.load(Ordering::Acquire));
            registry.slots.clone()
        };

        let mut panicked = Vec::new();
        for slot in slots {
            let mut callback = slot.callback.lock().unwrap_or_else(PoisonError::into_inner);
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            let previous = DELIVERING.with(|cell| cell.replace(Some(slot.id)));
            let result = catch_unwind(AssertUnwindSafe(|| (*callback)(update)));
            DELIVERING.with(|cell| cell.set(previous));
            if result.is_err() {
                slot.active.store(false, Ordering::Release);
                panicked.push(slot.id);
            }
        }
        panicked
    }
}

/// Handle returned by [`Fanout::subscribe`]; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    slot: Arc<SubscriberSlot>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn is_active(&self) -> bool {
        self.slot.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.slot.active.store(false, Ordering::Release);
        let inside_own_callback = DELIVERING.with(|cell| cell.get() == Some(self.slot.id));
        if !inside_own_callback {
            // Wait out a delivery in progress on another thread.
            drop(self.slot.callback.lock());
        }
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            let id = self.slot.id;
            registry.slots.retain(|slot| slot.id != id);
        }
    }
}
