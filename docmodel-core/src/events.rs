//! Event emission shared by models and documents.
//!
//! [`EventEmitter`] keeps per-event listener lists; the [`Emitter`] trait exposes the same
//! operations on any type that owns an emitter, which is how both
//! [`Model`](crate::model::Model) and [`Document`](crate::document::Document) get their
//! `on`/`once`/`emit` methods.
//!
//! Listeners run synchronously, in registration order, on the thread calling `emit`.
//! `once` listeners are removed before they run. The list is snapshotted before
//! dispatch, so a listener may add or remove listeners without affecting the emit in
//! progress.
//!
//! ```ignore
//! let users = connection.model::<User>()?;
//!
//! users.once("index", |payload| {
//!     tracing::info!("indexes built: {}", payload);
//! });
//!
//! users.ensure_indexes().await?;
//! ```

use bson::Bson;
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Default listener limit per event before a leak warning is logged.
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// A registered callback.
pub type Listener = Arc<dyn Fn(&Bson) + Send + Sync>;

/// Handle identifying one registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A listener together with its registration details, as returned by
/// [`EventEmitter::raw_listeners`].
#[derive(Clone)]
pub struct RawListener {
    pub id: ListenerId,
    pub once: bool,
    pub listener: Listener,
}

impl fmt::Debug for RawListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawListener")
            .field("id", &self.id)
            .field("once", &self.once)
            .finish()
    }
}

struct Registry {
    events: Vec<(String, Vec<RawListener>)>,
    max_listeners: usize,
    warned: HashSet<String>,
}

impl Registry {
    fn slot(&self, event: &str) -> Option<&Vec<RawListener>> {
        self.events
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, listeners)| listeners)
    }

    fn slot_mut(&mut self, event: &str) -> &mut Vec<RawListener> {
        let index = match self.events.iter().position(|(name, _)| name == event) {
            Some(index) => index,
            None => {
                self.events.push((event.to_string(), Vec::new()));
                self.events.len() - 1
            }
        };

        &mut self.events[index].1
    }

    fn prune(&mut self) {
        self.events.retain(|(_, listeners)| !listeners.is_empty());
    }
}

/// Observer registry keyed by event name.
pub struct EventEmitter {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("EventEmitter")
            .field(
                "events",
                &registry
                    .events
                    .iter()
                    .map(|(name, listeners)| (name.as_str(), listeners.len()))
                    .collect::<Vec<_>>(),
            )
            .field("max_listeners", &registry.max_listeners)
            .finish()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                events: Vec::new(),
                max_listeners: DEFAULT_MAX_LISTENERS,
                warned: HashSet::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, event: String, listener: Listener, once: bool, prepend: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.lock();
        let max = registry.max_listeners;

        let listeners = registry.slot_mut(&event);
        let entry = RawListener { id, once, listener };
        if prepend {
            listeners.insert(0, entry);
        } else {
            listeners.push(entry);
        }
        let count = listeners.len();

        if max > 0 && count > max && registry.warned.insert(event.clone()) {
            tracing::warn!(
                "Possible event listener leak detected: {} '{}' listeners added, max is {}",
                count,
                event,
                max
            );
        }

        id
    }

    /// Appends a listener for `event`.
    pub fn add_listener<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(listener), false, false)
    }

    /// Alias of [`add_listener`](Self::add_listener).
    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.add_listener(event, listener)
    }

    /// Appends a listener that is removed the first time `event` is emitted.
    pub fn once<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(listener), true, false)
    }

    /// Inserts a listener at the front of the list for `event`.
    pub fn prepend_listener<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(listener), false, true)
    }

    pub fn prepend_once_listener<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(listener), true, true)
    }

    /// Removes one registration. Returns whether it was found.
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut registry = self.registry.lock();
        let listeners = registry.slot_mut(event);
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        let removed = listeners.len() != before;
        registry.prune();
        removed
    }

    /// Alias of [`remove_listener`](Self::remove_listener).
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.remove_listener(event, id)
    }

    /// Removes every listener of `event`, or of every event when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut registry = self.registry.lock();
        match event {
            Some(event) => {
                registry.events.retain(|(name, _)| name != event);
                registry.warned.remove(event);
            }
            None => {
                registry.events.clear();
                registry.warned.clear();
            }
        }
    }

    /// Sets the per-event listener count above which a warning is logged. `0` disables
    /// the check.
    pub fn set_max_listeners(&self, n: usize) {
        self.registry.lock().max_listeners = n;
    }

    pub fn get_max_listeners(&self) -> usize {
        self.registry.lock().max_listeners
    }

    /// The callbacks registered for `event`, in dispatch order.
    pub fn listeners(&self, event: &str) -> Vec<Listener> {
        self.raw_listeners(event)
            .into_iter()
            .map(|raw| raw.listener)
            .collect()
    }

    /// The registrations for `event`, including whether each is a `once` listener.
    pub fn raw_listeners(&self, event: &str) -> Vec<RawListener> {
        self.registry
            .lock()
            .slot(event)
            .cloned()
            .unwrap_or_default()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.registry
            .lock()
            .slot(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Names of events with at least one listener, in first-registration order.
    pub fn event_names(&self) -> Vec<String> {
        self.registry
            .lock()
            .events
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Invokes the listeners of `event` with `payload`. Returns whether any listener ran.
    pub fn emit(&self, event: &str, payload: impl Into<Bson>) -> bool {
        let snapshot = {
            let mut registry = self.registry.lock();
            let snapshot = match registry.slot(event) {
                Some(listeners) => listeners.clone(),
                None => return false,
            };
            registry.slot_mut(event).retain(|l| !l.once);
            registry.prune();
            snapshot
        };

        let payload = payload.into();
        for raw in &snapshot {
            (raw.listener)(&payload);
        }

        !snapshot.is_empty()
    }
}

/// Event capability for any type owning an [`EventEmitter`].
///
/// Implementors only provide [`emitter`](Emitter::emitter); every other method forwards
/// to it.
pub trait Emitter {
    fn emitter(&self) -> &EventEmitter;

    fn add_listener<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.emitter().add_listener(event, listener)
    }

    fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.emitter().on(event, listener)
    }

    fn once<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.emitter().once(event, listener)
    }

    fn prepend_listener<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.emitter().prepend_listener(event, listener)
    }

    fn prepend_once_listener<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Bson) + Send + Sync + 'static,
    {
        self.emitter().prepend_once_listener(event, listener)
    }

    fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.emitter().remove_listener(event, id)
    }

    fn off(&self, event: &str, id: ListenerId) -> bool {
        self.emitter().off(event, id)
    }

    fn remove_all_listeners(&self, event: Option<&str>) {
        self.emitter().remove_all_listeners(event)
    }

    fn set_max_listeners(&self, n: usize) {
        self.emitter().set_max_listeners(n)
    }

    fn get_max_listeners(&self) -> usize {
        self.emitter().get_max_listeners()
    }

    fn listeners(&self, event: &str) -> Vec<Listener> {
        self.emitter().listeners(event)
    }

    fn raw_listeners(&self, event: &str) -> Vec<RawListener> {
        self.emitter().raw_listeners(event)
    }

    fn listener_count(&self, event: &str) -> usize {
        self.emitter().listener_count(event)
    }

    fn event_names(&self) -> Vec<String> {
        self.emitter().event_names()
    }

    fn emit(&self, event: &str, payload: impl Into<Bson>) -> bool {
        self.emitter().emit(event, payload)
    }
}

impl Emitter for EventEmitter {
    fn emitter(&self) -> &EventEmitter {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Bson) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &Bson| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn once_listener_runs_exactly_once() {
        let emitter = EventEmitter::new();
        let (count, listener) = counter();

        emitter.once("save", listener);

        assert!(emitter.emit("save", Bson::Null));
        assert!(!emitter.emit("save", Bson::Null));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count("save"), 0);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let emitter = EventEmitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["second", "third"] {
            let order = Arc::clone(&order);
            emitter.on("event", move |_| order.lock().push(label));
        }
        let first = Arc::clone(&order);
        emitter.prepend_listener("event", move |_| first.lock().push("first"));

        emitter.emit("event", "payload");

        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn emit_without_listeners_returns_false() {
        let emitter = EventEmitter::new();
        assert!(!emitter.emit("nothing", Bson::Null));
    }

    #[test]
    fn remove_listener_by_id() {
        let emitter = EventEmitter::new();
        let (count, listener) = counter();

        let id = emitter.on("a", listener);
        emitter.on("b", |_| {});

        assert_eq!(emitter.event_names(), vec!["a".to_string(), "b".to_string()]);
        assert!(emitter.off("a", id));
        assert!(!emitter.off("a", id));
        assert!(!emitter.emit("a", Bson::Null));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.event_names(), vec!["b".to_string()]);

        emitter.remove_all_listeners(None);
        assert!(emitter.event_names().is_empty());
    }

    #[test]
    fn payload_is_passed_through() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        emitter.on("index", move |payload| *sink.lock() = Some(payload.clone()));
        emitter.emit("index", "failed");

        assert_eq!(*seen.lock(), Some(Bson::String("failed".into())));
    }

    #[test]
    fn raw_listeners_report_once_flag() {
        let emitter = EventEmitter::new();
        emitter.on("e", |_| {});
        emitter.once("e", |_| {});

        let raw = emitter.raw_listeners("e");
        assert_eq!(raw.iter().map(|r| r.once).collect::<Vec<_>>(), vec![false, true]);
        assert_eq!(emitter.listeners("e").len(), 2);
    }

    #[test]
    fn listeners_may_register_during_emit() {
        let emitter = Arc::new(EventEmitter::new());
        let inner = Arc::clone(&emitter);

        emitter.once("e", move |_| {
            inner.on("e", |_| {});
        });

        assert!(emitter.emit("e", Bson::Null));
        assert_eq!(emitter.listener_count("e"), 1);
    }

    #[test]
    fn max_listeners_is_configurable() {
        let emitter = EventEmitter::new();
        assert_eq!(emitter.get_max_listeners(), DEFAULT_MAX_LISTENERS);

        emitter.set_max_listeners(1);
        emitter.on("e", |_| {});
        emitter.on("e", |_| {});

        assert_eq!(emitter.get_max_listeners(), 1);
        assert_eq!(emitter.listener_count("e"), 2);
    }
}
