// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{EngineEvent, EventKind};

/// Default per-subscriber buffer depth.
pub const DEFAULT_BUFFER: usize = 10;

type Filter = Box<dyn Fn(&EngineEvent) -> bool + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: Filter,
    tx: mpsc::Sender<EngineEvent>,
    dropped: AtomicU64,
}

struct Inner {
    next_id: u64,
    // One subscriber list per kind; a subscriber interested in several kinds
    // appears in several lists.
    by_kind: HashMap<EventKind, Vec<Arc<Subscriber>>>,
}

/// Typed pub/sub decoupling event producers from consumers.
///
/// Ordering is preserved per publisher.  Delivery is lossy by design: when a
/// subscriber's buffer is full the event is dropped for that subscriber and
/// counted (the replay path is the durability guarantee).  `close()` is
/// idempotent; publishes after close are no-ops and receivers observe
/// channel closure.
pub struct EventBus {
    inner: Mutex<Inner>,
    closed: AtomicBool,
}

/// Returned from `subscribe`; identifies the subscription and exposes its
/// drop counter.
pub struct SubscriptionHandle {
    id: u64,
    sub: Arc<Subscriber>,
}

impl SubscriptionHandle {
    /// Events dropped for this subscriber because its buffer was full.
    pub fn dropped(&self) -> u64 {
        self.sub.dropped.load(Ordering::Relaxed)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { next_id: 0, by_kind: HashMap::new() }),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a subscriber for `kinds`, with a synchronous `filter`
    /// evaluated by the publisher and a bounded delivery buffer.
    pub fn subscribe<F>(
        &self,
        kinds: &[EventKind],
        filter: F,
        buffer: usize,
    ) -> (mpsc::Receiver<EngineEvent>, SubscriptionHandle)
    where
        F: Fn(&EngineEvent) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let sub = Arc::new(Subscriber {
            id: inner.next_id,
            filter: Box::new(filter),
            tx,
            dropped: AtomicU64::new(0),
        });
        for kind in kinds {
            inner.by_kind.entry(*kind).or_default().push(Arc::clone(&sub));
        }
        debug!(id = sub.id, kinds = kinds.len(), "bus subscriber registered");
        (rx, SubscriptionHandle { id: sub.id, sub })
    }

    /// Subscribe to every event kind.
    pub fn subscribe_all<F>(
        &self,
        filter: F,
        buffer: usize,
    ) -> (mpsc::Receiver<EngineEvent>, SubscriptionHandle)
    where
        F: Fn(&EngineEvent) -> bool + Send + Sync + 'static,
    {
        self.subscribe(&EventKind::ALL, filter, buffer)
    }

    /// Deliver `event` to every matching subscriber.
    ///
    /// Back-pressure policy is drop-newest: a full buffer loses this event
    /// for that subscriber only.  Subscribers whose receiver is gone are
    /// pruned in passing.
    pub fn publish(&self, event: EngineEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let Some(subs) = inner.by_kind.get_mut(&event.kind()) else {
            return;
        };
        subs.retain(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if !(sub.filter)(&event) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let total = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(subscriber = sub.id, total, "subscriber buffer full; event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
            true
        });
    }

    /// Remove the subscription across all kind lists.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut inner = self.inner.lock().unwrap();
        for subs in inner.by_kind.values_mut() {
            subs.retain(|s| s.id != handle.id);
        }
    }

    /// Shut the bus down.  Idempotent; drops every sender so receivers
    /// observe closure and exit.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.by_kind.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
