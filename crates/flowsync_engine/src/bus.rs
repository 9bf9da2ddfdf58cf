//! Topic-based event bus.
//!
//! The bus distributes engine events and cross-module updates to listeners.
//!
//! - Delivery is synchronous: `emit` returns after every listener ran
//! - Topic listeners run in registration order, then `All` listeners
//! - Subscribing the same listener twice to a topic delivers once
//! - A panicking listener is logged and skipped; delivery continues
//! - Listeners may emit or subscribe from inside a callback
//!
//! # Usage
//!
//! ```rust,ignore
//! use flowsync_engine::{BusEvent, EventBus, Topic};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(Topic::All, Arc::new(|event: &BusEvent| {
//!     println!("{:?}", event.topic());
//! }));
//!
//! // Later
//! subscription.unsubscribe();
//! ```

use flowsync_protocol::{CrossModuleUpdate, Module, SyncEvent, SyncEventKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, warn};

/// A bus topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Connectivity changes.
    Connection,
    /// Operations added to the queue.
    OperationQueued,
    /// Sync pass started.
    SyncStarted,
    /// Sync pass finished.
    SyncCompleted,
    /// Operation accepted by the backend.
    OperationSynced,
    /// Operation parked.
    OperationFailed,
    /// Conflict detected.
    ConflictDetected,
    /// Conflict resolved.
    ConflictResolved,
    /// Queue cleared by maintenance.
    QueueCleared,
    /// Cross-module updates.
    CrossModuleUpdate,
    /// Wildcard: receives every event on every topic.
    All,
}

impl Topic {
    /// Returns the topic engine events of `kind` are emitted on.
    pub fn for_kind(kind: SyncEventKind) -> Topic {
        match kind {
            SyncEventKind::Connection => Topic::Connection,
            SyncEventKind::OperationQueued => Topic::OperationQueued,
            SyncEventKind::SyncStarted => Topic::SyncStarted,
            SyncEventKind::SyncCompleted => Topic::SyncCompleted,
            SyncEventKind::OperationSynced => Topic::OperationSynced,
            SyncEventKind::OperationFailed => Topic::OperationFailed,
            SyncEventKind::ConflictDetected => Topic::ConflictDetected,
            SyncEventKind::ConflictResolved => Topic::ConflictResolved,
            SyncEventKind::QueueCleared => Topic::QueueCleared,
        }
    }
}

/// An event carried by the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Low-level engine event.
    Sync(SyncEvent),
    /// High-level cross-module update.
    Update(CrossModuleUpdate),
}

impl BusEvent {
    /// Returns the topic this event is emitted on.
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Sync(event) => Topic::for_kind(event.kind),
            BusEvent::Update(_) => Topic::CrossModuleUpdate,
        }
    }

    /// Returns the engine event, if this is one.
    pub fn as_sync(&self) -> Option<&SyncEvent> {
        match self {
            BusEvent::Sync(event) => Some(event),
            BusEvent::Update(_) => None,
        }
    }

    /// Returns the cross-module update, if this is one.
    pub fn as_update(&self) -> Option<&CrossModuleUpdate> {
        match self {
            BusEvent::Update(update) => Some(update),
            BusEvent::Sync(_) => None,
        }
    }
}

/// A bus listener.
pub type Listener = Arc<dyn Fn(&BusEvent) + Send + Sync>;

struct Registration {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
struct BusInner {
    topics: RwLock<HashMap<Topic, Vec<Registration>>>,
    next_id: AtomicU64,
    emitted: AtomicU64,
    listener_failures: AtomicU64,
}

impl BusInner {
    fn unsubscribe(&self, topic: Topic, id: u64) -> bool {
        let mut topics = self.topics.write();
        let Some(registrations) = topics.get_mut(&topic) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        before != registrations.len()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// Returns the subscribed topic.
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Removes the listener. Returns false if it was already removed.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.unsubscribe(self.topic, self.id),
            None => false,
        }
    }
}

/// Topic-based publish/subscribe bus.
///
/// Cloning the bus yields another handle to the same listener table.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("emitted", &self.emitted_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener` to `topic`.
    ///
    /// Subscribing the same listener (`Arc` identity) to the same topic
    /// again returns a handle to the existing registration.
    pub fn subscribe(&self, topic: Topic, listener: Listener) -> Subscription {
        let mut topics = self.inner.topics.write();
        let registrations = topics.entry(topic).or_default();

        let existing = registrations
            .iter()
            .find(|r| same_listener(&r.listener, &listener))
            .map(|r| r.id);

        let id = existing.unwrap_or_else(|| {
            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            registrations.push(Registration { id, listener });
            id
        });

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Subscribes to cross-module updates addressed to `module`.
    pub fn subscribe_module(
        &self,
        module: Module,
        listener: impl Fn(&CrossModuleUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(
            Topic::CrossModuleUpdate,
            Arc::new(move |event: &BusEvent| {
                if let BusEvent::Update(update) = event {
                    if update.target_modules.includes(module) {
                        listener(update);
                    }
                }
            }),
        )
    }

    /// Emits `event` on its topic. Returns the number of listeners that ran
    /// to completion.
    ///
    /// Cross-module updates beyond the hop bound, or with no target, are
    /// dropped without delivery.
    pub fn emit(&self, event: BusEvent) -> usize {
        if let BusEvent::Update(update) = &event {
            if !update.within_hop_bound() {
                warn!(
                    entity_type = %update.entity_type,
                    entity_id = %update.entity_id,
                    hops = update.hops,
                    "dropping cross-module update beyond hop bound"
                );
                return 0;
            }
            if update.target_modules.is_empty() {
                return 0;
            }
        }

        let topic = event.topic();
        let listeners: Vec<Listener> = {
            let topics = self.inner.topics.read();
            let specific = topics.get(&topic).into_iter().flatten();
            let wildcard = topics.get(&Topic::All).into_iter().flatten();
            specific
                .chain(wildcard)
                .map(|r| Arc::clone(&r.listener))
                .collect()
        };

        self.inner.emitted.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    self.inner.listener_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        topic = ?topic,
                        reason = panic_message(&payload),
                        "event listener panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Emits an engine event.
    pub fn emit_sync(&self, event: SyncEvent) -> usize {
        self.emit(BusEvent::Sync(event))
    }

    /// Broadcasts a cross-module update.
    pub fn broadcast(&self, update: CrossModuleUpdate) -> usize {
        self.emit(BusEvent::Update(update))
    }

    /// Returns the number of registered listeners across all topics.
    pub fn listener_count(&self) -> usize {
        self.inner.topics.read().values().map(Vec::len).sum()
    }

    /// Returns the number of listeners registered on `topic`.
    pub fn topic_listener_count(&self, topic: Topic) -> usize {
        self.inner.topics.read().get(&topic).map_or(0, Vec::len)
    }

    /// Returns the number of events emitted so far.
    pub fn emitted_count(&self) -> u64 {
        self.inner.emitted.load(Ordering::Relaxed)
    }

    /// Returns the number of listener invocations that panicked.
    pub fn listener_failure_count(&self) -> u64 {
        self.inner.listener_failures.load(Ordering::Relaxed)
    }
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsync_protocol::{
        CascadeAction, EntityType, Targets, UpdateData, UpdateType, MAX_CASCADE_HOPS,
    };
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Listener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |name: &str| -> Listener {
            let log = Arc::clone(&log_clone);
            let name = name.to_string();
            Arc::new(move |event: &BusEvent| {
                log.lock().push(format!("{name}:{:?}", event.topic()));
            })
        };
        (log, make)
    }

    fn update(targets: Targets) -> CrossModuleUpdate {
        CrossModuleUpdate::new(
            Module::Tasks,
            targets,
            EntityType::Task,
            "t1",
            UpdateType::Complete,
            UpdateData::Action(CascadeAction::LogTimeForTask {
                task_id: "t1".into(),
            }),
        )
    }

    #[test]
    fn topic_listeners_then_wildcard() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let _all = bus.subscribe(Topic::All, make("all"));
        let _a = bus.subscribe(Topic::OperationSynced, make("a"));
        let _b = bus.subscribe(Topic::OperationSynced, make("b"));
        let _other = bus.subscribe(Topic::ConflictDetected, make("other"));

        let delivered = bus.emit_sync(SyncEvent::new(SyncEventKind::OperationSynced));
        assert_eq!(delivered, 3);
        assert_eq!(
            *log.lock(),
            vec![
                "a:OperationSynced".to_string(),
                "b:OperationSynced".to_string(),
                "all:OperationSynced".to_string(),
            ]
        );
    }

    #[test]
    fn duplicate_subscription_delivers_once() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let listener = make("dup");

        let first = bus.subscribe(Topic::Connection, Arc::clone(&listener));
        let second = bus.subscribe(Topic::Connection, listener);
        assert_eq!(bus.topic_listener_count(Topic::Connection), 1);

        bus.emit_sync(SyncEvent::connection(true));
        assert_eq!(log.lock().len(), 1);

        assert!(first.unsubscribe());
        assert!(!second.unsubscribe());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let sub = bus.subscribe(Topic::SyncStarted, make("x"));
        bus.emit_sync(SyncEvent::new(SyncEventKind::SyncStarted));
        assert!(sub.unsubscribe());
        bus.emit_sync(SyncEvent::new(SyncEventKind::SyncStarted));

        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let _before = bus.subscribe(Topic::QueueCleared, make("before"));
        let _bad = bus.subscribe(
            Topic::QueueCleared,
            Arc::new(|_: &BusEvent| panic!("listener bug")),
        );
        let _after = bus.subscribe(Topic::QueueCleared, make("after"));

        let delivered = bus.emit_sync(SyncEvent::new(SyncEventKind::QueueCleared));

        assert_eq!(delivered, 2);
        assert_eq!(log.lock().len(), 2);
        assert_eq!(bus.listener_failure_count(), 1);
    }

    #[test]
    fn wildcard_sees_every_topic_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _all = bus.subscribe(
            Topic::All,
            Arc::new(move |event: &BusEvent| seen_clone.lock().push(event.topic())),
        );

        bus.emit_sync(SyncEvent::connection(false));
        bus.broadcast(update(Targets::only(Module::Energy)));
        bus.emit_sync(SyncEvent::new(SyncEventKind::SyncCompleted));

        assert_eq!(
            *seen.lock(),
            vec![Topic::Connection, Topic::CrossModuleUpdate, Topic::SyncCompleted]
        );
    }

    #[test]
    fn module_subscription_filters_targets() {
        let bus = EventBus::new();
        let energy = Arc::new(Mutex::new(0));
        let energy_clone = Arc::clone(&energy);
        let _sub = bus.subscribe_module(Module::Energy, move |_| *energy_clone.lock() += 1);

        bus.broadcast(update(Targets::only(Module::Energy)));
        bus.broadcast(update(Targets::only(Module::Calendar)));
        bus.broadcast(update(Targets::All));

        assert_eq!(*energy.lock(), 2);
    }

    #[test]
    fn updates_beyond_hop_bound_are_dropped() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let _all = bus.subscribe(Topic::All, make("all"));

        let mut runaway = update(Targets::only(Module::Energy));
        runaway.hops = MAX_CASCADE_HOPS + 1;

        assert_eq!(bus.broadcast(runaway), 0);
        assert_eq!(bus.broadcast(update(Targets::modules([]))), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn listeners_may_emit_reentrantly() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let _sink = bus.subscribe(Topic::SyncCompleted, make("sink"));

        let bus_clone = bus.clone();
        let _relay = bus.subscribe(
            Topic::SyncStarted,
            Arc::new(move |_: &BusEvent| {
                bus_clone.emit_sync(SyncEvent::new(SyncEventKind::SyncCompleted));
            }),
        );

        bus.emit_sync(SyncEvent::new(SyncEventKind::SyncStarted));
        assert_eq!(*log.lock(), vec!["sink:SyncCompleted".to_string()]);
    }
}
