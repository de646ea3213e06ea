//! Named signal lookup
//!
//! Independent code can rendezvous on a signal by name through a
//! [`Namespace`]. Signals themselves know nothing about namespaces: a name
//! only helps find a signal, two signals are still told apart by identity.
//!
//! # Examples
//!
//! ```rust
//! use relay_core::namespace::Namespace;
//!
//! let namespace: Namespace<String, ()> = Namespace::new();
//! let saved = namespace.signal("saved");
//!
//! assert!(saved.ptr_eq(&namespace.signal("saved")));
//! assert!(!saved.ptr_eq(&namespace.signal("loaded")));
//! ```


use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::signal::{Signal, WeakSignal};
use crate::{Kwargs, Value};

type Map<V> = DashMap<Arc<str>, V, ahash::RandomState>;

/// Name to signal mapping that keeps its signals alive
pub struct Namespace<P = Kwargs, R = Value> {
    signals: Map<Signal<P, R>>,
}

impl<P, R> Namespace<P, R>
where
    P: 'static,
    R: 'static,
{
    pub fn new() -> Self {
        Self {
            signals: Map::default(),
        }
    }

    /// The signal called `name`, created on first use
    pub fn signal(&self, name: &str) -> Signal<P, R> {
        if let Some(signal) = self.get(name) {
            return signal;
        }
        self.signals
            .entry(Arc::from(name))
            .or_insert_with(|| Signal::named(name))
            .value()
            .clone()
    }

    /// The signal called `name`, if it was created
    pub fn get(&self, name: &str) -> Option<Signal<P, R>> {
        self.signals.get(name).map(|signal| signal.value().clone())
    }

    /// Forget `name`. Handles already given out stay valid.
    pub fn remove(&self, name: &str) -> Option<Signal<P, R>> {
        self.signals.remove(name).map(|(_, signal)| signal)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    pub fn names(&self) -> Vec<Arc<str>> {
        self.signals.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl<P, R> Default for Namespace<P, R>
where
    P: 'static,
    R: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R> fmt::Debug for Namespace<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("signals", &self.signals.len())
            .finish()
    }
}

/// Name to signal mapping that does not keep its signals alive
///
/// An entry disappears once every handle to its signal is dropped; asking
/// for the name again creates a fresh signal.
pub struct WeakNamespace<P = Kwargs, R = Value> {
    signals: Arc<Map<WeakSignal<P, R>>>,
}

impl<P, R> WeakNamespace<P, R>
where
    P: 'static,
    R: 'static,
{
    pub fn new() -> Self {
        Self {
            signals: Arc::new(Map::default()),
        }
    }

    /// The live signal called `name`, created if there is none
    pub fn signal(&self, name: &str) -> Signal<P, R> {
        if let Some(signal) = self.get(name) {
            return signal;
        }

        let created = match self.signals.entry(Arc::from(name)) {
            Entry::Occupied(mut entry) => match entry.get().upgrade() {
                // Lost a race with another caller. The upgraded handle is
                // returned, never dropped under the shard lock.
                Some(signal) => return signal,
                None => {
                    let signal = Signal::named(name);
                    entry.insert(signal.downgrade());
                    signal
                }
            },
            Entry::Vacant(entry) => {
                let signal = Signal::named(name);
                entry.insert(signal.downgrade());
                signal
            }
        };

        self.evict_on_drop(name, &created);
        created
    }

    /// The live signal called `name`, if any
    pub fn get(&self, name: &str) -> Option<Signal<P, R>> {
        self.signals.get(name).and_then(|signal| signal.upgrade())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signals
            .get(name)
            .is_some_and(|signal| signal.is_alive())
    }

    /// Number of entries, including ones whose signal is being dropped
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    fn evict_on_drop(&self, name: &str, signal: &Signal<P, R>) {
        let signals: Weak<Map<WeakSignal<P, R>>> = Arc::downgrade(&self.signals);
        let name: Arc<str> = Arc::from(name);
        signal.on_drop(move || {
            if let Some(signals) = signals.upgrade() {
                // A newer signal may already live under the same name
                signals.remove_if(&name, |_, signal| !signal.is_alive());
            }
        });
    }
}

impl<P, R> Default for WeakNamespace<P, R>
where
    P: 'static,
    R: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R> fmt::Debug for WeakNamespace<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakNamespace")
            .field("signals", &self.signals.len())
            .finish()
    }
}

static DEFAULT_NAMESPACE: Lazy<Namespace> = Lazy::new(Namespace::new);

/// The process-wide namespace used by [`signal`]
pub fn default_namespace() -> &'static Namespace {
    &DEFAULT_NAMESPACE
}

/// The signal called `name` in the default namespace
///
/// ```rust
/// use relay_core::{kwargs, signal, Receiver};
///
/// let started = signal("started");
/// let _greeter = started
///     .connect(&Receiver::new(|_sender, kwargs: &relay_core::Kwargs| {
///         Ok(kwargs["user"].clone())
///     }))
///     .unwrap();
///
/// let results = signal("started")
///     .send("cli", &kwargs! { "user" => "ada" })
///     .unwrap();
/// assert_eq!(results[0].1, "ada");
/// ```
pub fn signal(name: &str) -> Signal {
    DEFAULT_NAMESPACE.signal(name)
}
