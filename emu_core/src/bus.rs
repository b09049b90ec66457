//! Event bus: per-kind subscription lists and the delivery queue.
//!
//! Subscriptions match on klass plus an exact origin id or a wildcard.
//! Duplicate subscriptions are allowed and each fires. A single worker
//! drains the FIFO queue, so events from one origin reach a given
//! subscription in submission order. Handlers must not re-enter
//! `register`/`unregister` from inside a delivery.

use std::collections::VecDeque;

use emu_common::events::{EVENT_KIND_COUNT, Event, EventKind};
use emu_common::klass::Klass;
use emu_common::object::ObjectId;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::cache::{CacheBox, ObjectCache};

/// A subscription's delivery endpoint.
pub enum EventHandler {
    /// Host-side callable.
    Host(Box<dyn Fn(&Event) + Send + Sync>),
    /// An object's `on_event` entry point.
    Object(ObjectId),
}

/// One entry in a per-kind subscription list.
pub struct Subscription {
    /// Source klass filter.
    pub klass: Klass,
    /// Exact origin, or `None` for wildcard.
    pub source: Option<ObjectId>,
    pub handler: EventHandler,
}

impl Subscription {
    #[inline]
    fn matches(&self, event: &Event) -> bool {
        self.klass == event.klass && self.source.is_none_or(|id| id == event.origin)
    }
}

/// The bus: a queue of cache-recycled event records plus per-kind
/// subscription lists.
pub struct EventBus {
    queue: Mutex<VecDeque<CacheBox<Event>>>,
    subscriptions: Mutex<[Vec<Subscription>; EVENT_KIND_COUNT]>,
    cache: ObjectCache<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(std::array::from_fn(|_| Vec::new())),
            cache: ObjectCache::new(),
        }
    }

    /// Append a subscription; duplicates are allowed.
    pub fn register(&self, kind: EventKind, subscription: Subscription) {
        self.subscriptions.lock()[kind as usize].push(subscription);
    }

    /// Remove every subscription matching `(klass, source)` for `kind`.
    pub fn unregister(&self, kind: EventKind, klass: Klass, source: Option<ObjectId>) {
        let mut subs = self.subscriptions.lock();
        let list = &mut subs[kind as usize];
        let before = list.len();
        list.retain(|s| !(s.klass == klass && s.source == source));
        trace!(
            target: "emu.core.bus",
            "unregister {kind:?} {klass}: {} entries removed",
            before - list.len()
        );
    }

    /// Queue an event for delivery on the next worker pass.
    pub fn submit(&self, event: Event) {
        self.queue.lock().push_back(self.cache.alloc(event));
    }

    /// Drain everything queued so far, FIFO. Dropping a drained record
    /// recycles its cell.
    pub fn drain(&self) -> Vec<CacheBox<Event>> {
        self.queue.lock().drain(..).collect()
    }

    /// Deliver one event to every matching subscription, in list order.
    /// Object handlers dispatch through `exec_object`.
    pub fn deliver(&self, event: &Event, exec_object: &mut dyn FnMut(ObjectId, &Event)) {
        let subs = self.subscriptions.lock();
        let mut delivered = 0usize;
        for sub in &subs[event.kind as usize] {
            if !sub.matches(event) {
                continue;
            }
            delivered += 1;
            match &sub.handler {
                EventHandler::Host(f) => {
                    // A panicking subscriber loses only its own delivery.
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(event))).is_err() {
                        error!(target: "emu.core.bus", "subscriber panicked on {:?}", event.kind);
                    }
                }
                EventHandler::Object(id) => exec_object(*id, event),
            }
        }
        if delivered == 0 {
            debug!(
                target: "emu.core.bus",
                "event {:?} from {} had no subscribers",
                event.kind,
                event.origin
            );
        }
    }

    /// Queued events not yet delivered.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_common::events::EventPayload;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(origin: u64) -> Event {
        Event {
            kind: EventKind::EndstopTrigger,
            origin: ObjectId::new(origin),
            klass: Klass::Endstop,
            payload: EventPayload::Level(true),
        }
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> EventHandler {
        let counter = Arc::clone(counter);
        EventHandler::Host(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn wildcard_matches_any_origin() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.register(
            EventKind::EndstopTrigger,
            Subscription {
                klass: Klass::Endstop,
                source: None,
                handler: counting_handler(&hits),
            },
        );
        bus.deliver(&event(1), &mut |_, _| {});
        bus.deliver(&event(2), &mut |_, _| {});
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exact_source_filters() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.register(
            EventKind::EndstopTrigger,
            Subscription {
                klass: Klass::Endstop,
                source: Some(ObjectId::new(7)),
                handler: counting_handler(&hits),
            },
        );
        bus.deliver(&event(1), &mut |_, _| {});
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.deliver(&event(7), &mut |_, _| {});
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn klass_must_match() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.register(
            EventKind::EndstopTrigger,
            Subscription {
                klass: Klass::DigitalPin,
                source: None,
                handler: counting_handler(&hits),
            },
        );
        bus.deliver(&event(1), &mut |_, _| {});
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_subscriptions_each_fire() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            bus.register(
                EventKind::EndstopTrigger,
                Subscription {
                    klass: Klass::Endstop,
                    source: None,
                    handler: counting_handler(&hits),
                },
            );
        }
        bus.deliver(&event(1), &mut |_, _| {});
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregister_removes_matching_entries() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.register(
            EventKind::EndstopTrigger,
            Subscription {
                klass: Klass::Endstop,
                source: None,
                handler: counting_handler(&hits),
            },
        );
        bus.unregister(EventKind::EndstopTrigger, Klass::Endstop, None);
        bus.deliver(&event(1), &mut |_, _| {});
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn object_handlers_dispatch_through_callback() {
        let bus = EventBus::new();
        bus.register(
            EventKind::EndstopTrigger,
            Subscription {
                klass: Klass::Endstop,
                source: None,
                handler: EventHandler::Object(ObjectId::new(9)),
            },
        );
        let mut dispatched = Vec::new();
        bus.deliver(&event(3), &mut |id, ev| {
            dispatched.push((id, ev.origin));
        });
        assert_eq!(dispatched, vec![(ObjectId::new(9), ObjectId::new(3))]);
    }

    #[test]
    fn queue_preserves_submission_order() {
        let bus = EventBus::new();
        bus.submit(event(1));
        bus.submit(event(2));
        bus.submit(event(3));
        let drained = bus.drain();
        let origins: Vec<u64> = drained.iter().map(|e| e.origin.raw()).collect();
        assert_eq!(origins, vec![1, 2, 3]);
        assert_eq!(bus.queued(), 0);
    }
}
