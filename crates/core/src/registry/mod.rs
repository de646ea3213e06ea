//! Connection registry
//!
//! Each signal owns one registry: a set of connection records keyed by
//! (receiver, sender filter), indexed both by sender and by receiver. All
//! state sits behind a single mutex. Two rules keep that mutex deadlock
//! free:
//!
//! - receivers are never invoked while it is held
//! - no record, and no strong handle obtained by upgrading a weak one, is
//!   dropped while it is held, because that drop may run expiry callbacks
//!   which take the lock again
//!
//! Removed records are therefore handed back to the caller and dropped once
//! the guard is gone.

mod connection;

pub use connection::ConnectionInfo;
pub(crate) use connection::Connection;

use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::config::RegistryConfig;
use crate::receiver::{Receiver, ReceiverKey, ReceiverRef, Strength};
use crate::sender::{Sender, SenderKey, SenderRef};
use crate::tracked::{ExpiryCallback, ExpiryToken, Watch};
use connection::{ConnectionKey, Leg};

/// Connection records of one signal
pub(crate) struct Registry<P, R> {
    shared: Arc<Shared<P, R>>,
}

struct Shared<P, R> {
    label: Arc<str>,
    config: RegistryConfig,
    /// Mirror of `records.len()` for the lock-free empty check
    len: AtomicUsize,
    state: Mutex<State<P, R>>,
}

struct State<P, R> {
    records: HashMap<ConnectionKey, Connection<P, R>, RandomState>,
    by_sender: HashMap<SenderKey, HashSet<ReceiverKey, RandomState>, RandomState>,
    by_receiver: HashMap<ReceiverKey, HashSet<SenderKey, RandomState>, RandomState>,
    removals_since_prune: usize,
}

impl<P, R> Default for State<P, R> {
    fn default() -> Self {
        Self {
            records: HashMap::default(),
            by_sender: HashMap::default(),
            by_receiver: HashMap::default(),
            removals_since_prune: 0,
        }
    }
}

impl<P, R> State<P, R> {
    /// Insert or replace the record under its key. Indexes are sets, so a
    /// replacement leaves them unchanged.
    fn insert(&mut self, connection: Connection<P, R>) -> Option<Connection<P, R>> {
        let (receiver, sender) = connection.key();
        self.by_sender
            .entry(sender.clone())
            .or_default()
            .insert(receiver);
        self.by_receiver
            .entry(receiver)
            .or_default()
            .insert(sender.clone());
        self.records.insert((receiver, sender), connection)
    }

    fn remove(&mut self, key: &ConnectionKey) -> Option<Connection<P, R>> {
        let connection = self.records.remove(key)?;
        let (receiver, sender) = key;

        if let Some(receivers) = self.by_sender.get_mut(sender) {
            receivers.remove(receiver);
            if receivers.is_empty() {
                self.by_sender.remove(sender);
            }
        }
        if let Some(senders) = self.by_receiver.get_mut(receiver) {
            senders.remove(sender);
            if senders.is_empty() {
                self.by_receiver.remove(receiver);
            }
        }

        self.removals_since_prune += 1;
        Some(connection)
    }

    /// Remove every record of `receiver`, whatever its sender filter
    fn remove_receiver(&mut self, receiver: ReceiverKey) -> Vec<Connection<P, R>> {
        let senders: Vec<SenderKey> = self
            .by_receiver
            .get(&receiver)
            .map(|senders| senders.iter().cloned().collect())
            .unwrap_or_default();

        senders
            .into_iter()
            .filter_map(|sender| self.remove(&(receiver, sender)))
            .collect()
    }

    /// Remove records whose receiver or sender has expired
    fn remove_stale(&mut self) -> Vec<Connection<P, R>> {
        let stale: Vec<ConnectionKey> = self
            .records
            .iter()
            .filter(|(_, connection)| !connection.is_alive())
            .map(|(key, _)| key.clone())
            .collect();

        let removed = stale.iter().filter_map(|key| self.remove(key)).collect();
        self.removals_since_prune = 0;
        removed
    }

    fn maybe_prune(&mut self, config: &RegistryConfig) -> Vec<Connection<P, R>> {
        match config.auto_prune_interval {
            Some(interval) if self.removals_since_prune >= interval => self.remove_stale(),
            _ => Vec::new(),
        }
    }

    /// Receivers registered under `sender`, in no particular order
    fn collect_candidates(&self, sender: &SenderKey, candidates: &mut Vec<Candidate<P, R>>) {
        let Some(receivers) = self.by_sender.get(sender) else {
            return;
        };
        for receiver in receivers {
            let key = (*receiver, sender.clone());
            if let Some(connection) = self.records.get(&key) {
                candidates.push(Candidate {
                    key,
                    receiver: connection.receiver.clone(),
                });
            }
        }
    }
}

impl<P, R> Shared<P, R> {
    fn sync_len(&self, state: &State<P, R>) {
        self.len.store(state.records.len(), Ordering::Release);
    }

    /// Expiry callback body: remove the record under `key` if it is still the
    /// one that registered `token`. A replaced or re-created record carries a
    /// different token and is left alone.
    fn expire(&self, key: &ConnectionKey, leg: Leg, token: ExpiryToken) {
        let (removed, swept) = {
            let mut state = self.state.lock();
            let current = state
                .records
                .get(key)
                .and_then(|connection| connection.watch(leg))
                .is_some_and(|watch| watch.token() == token);
            if !current {
                return;
            }
            let removed = state.remove(key);
            let swept = state.maybe_prune(&self.config);
            self.sync_len(&state);
            (removed, swept)
        };

        tracing::trace!(
            target: "relay::registry",
            signal = %self.label,
            receiver = %key.0,
            sender = %key.1,
            leg = ?leg,
            swept = swept.len(),
            "expired connection removed"
        );
        drop(removed);
        drop(swept);
    }

    /// Remove the record under `key` if its receiver expired. Used when a
    /// dispatch snapshot finds a dead receiver before its callback ran.
    fn discard_expired(&self, key: &ConnectionKey) {
        let removed = {
            let mut state = self.state.lock();
            let expired = state
                .records
                .get(key)
                .is_some_and(|connection| !connection.receiver.is_alive());
            if !expired {
                return;
            }
            let removed = state.remove(key);
            self.sync_len(&state);
            removed
        };

        tracing::trace!(
            target: "relay::registry",
            signal = %self.label,
            receiver = %key.0,
            sender = %key.1,
            "discarded expired receiver"
        );
        drop(removed);
    }
}

impl<P, R> Registry<P, R> {
    pub(crate) fn new(label: impl Into<Arc<str>>, config: RegistryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                config,
                len: AtomicUsize::new(0),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Number of connection records, without taking the lock
    pub(crate) fn len(&self) -> usize {
        self.shared.len.load(Ordering::Acquire)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }
}

impl<P, R> Registry<P, R>
where
    P: 'static,
    R: 'static,
{
    /// Add or replace the record for (`receiver`, `sender`)
    ///
    /// Returns a view of the stored record. Its strengths tell whether each
    /// leg is actually held weakly; function receivers and plain values can
    /// only be held strongly.
    pub(crate) fn connect(
        &self,
        receiver: &Receiver<P, R>,
        sender: &Sender,
        strength: Strength,
    ) -> ConnectionInfo {
        let (info, replaced) = self.replace(receiver, sender, strength);
        drop(replaced);
        info
    }

    /// [`connect`](Self::connect), handing back the record it replaced
    ///
    /// The replaced record must be dropped, or given to
    /// [`restore`](Self::restore), without holding any registry lock.
    pub(crate) fn replace(
        &self,
        receiver: &Receiver<P, R>,
        sender: &Sender,
        strength: Strength,
    ) -> (ConnectionInfo, Option<Connection<P, R>>) {
        let key: ConnectionKey = (receiver.key(), sender.key());

        // Watches are registered before the lock is taken. If a leg expires
        // in between, its callback finds no record and the stale entry is
        // left for the next sweep or dispatch.
        let (receiver_ref, receiver_watch) =
            match (strength.is_weak(), receiver.downgrade(), receiver.lifeline()) {
                (true, Some(weak), Some(lifeline)) => {
                    let token = ExpiryToken::next();
                    let callback = self.expiry_callback(key.clone(), Leg::Receiver, token);
                    (
                        ReceiverRef::Weak(weak),
                        Some(Watch::register(&lifeline, token, callback)),
                    )
                }
                _ => (ReceiverRef::Strong(receiver.clone()), None),
            };

        let (sender_ref, sender_watch) = match sender.lifeline() {
            Some(lifeline) if strength.is_weak() => {
                let token = ExpiryToken::next();
                let callback = self.expiry_callback(key.clone(), Leg::Sender, token);
                (
                    SenderRef::Weak(Arc::downgrade(lifeline)),
                    Some(Watch::register(lifeline, token, callback)),
                )
            }
            _ => (SenderRef::Strong(sender.clone()), None),
        };

        let connection = Connection {
            receiver_key: key.0,
            receiver: receiver_ref,
            sender_key: key.1,
            sender: sender_ref,
            receiver_watch,
            sender_watch,
        };
        let info = connection.info();

        let replaced = {
            let mut state = self.shared.state.lock();
            let replaced = state.insert(connection);
            self.shared.sync_len(&state);
            replaced
        };

        tracing::debug!(
            target: "relay::registry",
            signal = %self.shared.label,
            receiver = %info.receiver,
            sender = %info.sender,
            strength = ?info.strength,
            replaced = replaced.is_some(),
            "receiver connected"
        );
        (info, replaced)
    }

    /// Undo a [`replace`](Self::replace): remove the record stored under
    /// exactly (`receiver`, `sender`) and put `previous` back in its place
    ///
    /// [`SenderKey::Any`] names the wildcard record only; records of the
    /// receiver under other senders are left alone. A restored record keeps
    /// its original expiry tokens, so its callbacks stay current.
    pub(crate) fn restore(
        &self,
        receiver: ReceiverKey,
        sender: &SenderKey,
        previous: Option<Connection<P, R>>,
    ) {
        let restored = previous.is_some();
        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.remove(&(receiver, sender.clone()));
            if let Some(previous) = previous {
                state.insert(previous);
            }
            self.shared.sync_len(&state);
            removed
        };

        tracing::debug!(
            target: "relay::registry",
            signal = %self.shared.label,
            receiver = %receiver,
            sender = %sender,
            restored,
            "connection rolled back"
        );
        drop(removed);
    }

    /// Remove the record for (`receiver`, `sender`), or every record of
    /// `receiver` when `sender` is [`SenderKey::Any`]
    ///
    /// The removed records are returned to the caller, who must drop them
    /// without holding any registry lock.
    pub(crate) fn disconnect(
        &self,
        receiver: ReceiverKey,
        sender: &SenderKey,
    ) -> Vec<Connection<P, R>> {
        let (removed, swept) = {
            let mut state = self.shared.state.lock();
            let removed = if sender.is_any() {
                state.remove_receiver(receiver)
            } else {
                state
                    .remove(&(receiver, sender.clone()))
                    .into_iter()
                    .collect()
            };
            let swept = state.maybe_prune(&self.shared.config);
            self.shared.sync_len(&state);
            (removed, swept)
        };

        tracing::debug!(
            target: "relay::registry",
            signal = %self.shared.label,
            receiver = %receiver,
            sender = %sender,
            removed = removed.len(),
            swept = swept.len(),
            "receiver disconnected"
        );
        drop(swept);
        removed
    }

    /// Remove every record whose receiver or sender has expired
    pub(crate) fn prune_stale(&self) -> usize {
        let (removed, remaining) = {
            let mut state = self.shared.state.lock();
            let removed = state.remove_stale();
            self.shared.sync_len(&state);
            (removed, state.records.len())
        };

        let count = removed.len();
        tracing::debug!(
            target: "relay::registry",
            signal = %self.shared.label,
            removed = count,
            remaining,
            "pruned stale connections"
        );
        drop(removed);
        count
    }

    /// Whether a send from `sender` may reach anyone
    ///
    /// Optimistic: a record whose receiver just expired still counts until
    /// it is cleaned up.
    pub(crate) fn has_receivers_for(&self, sender: &SenderKey) -> bool {
        if self.is_empty() {
            return false;
        }
        let state = self.shared.state.lock();
        if state.by_sender.contains_key(&SenderKey::Any) {
            return true;
        }
        !sender.is_any() && state.by_sender.contains_key(sender)
    }

    /// Live receivers that a send from `sender` reaches
    pub(crate) fn receivers_for(&self, sender: &SenderKey) -> Receivers<P, R> {
        if self.is_empty() {
            return Receivers::empty();
        }

        let candidates = {
            let state = self.shared.state.lock();
            let mut candidates = Vec::new();
            state.collect_candidates(&SenderKey::Any, &mut candidates);
            if !sender.is_any() {
                state.collect_candidates(sender, &mut candidates);
            }
            candidates
        };

        Receivers {
            shared: Arc::downgrade(&self.shared),
            candidates: candidates.into_iter(),
            yielded: HashSet::default(),
        }
    }

    /// Snapshot of all records
    pub(crate) fn connections(&self) -> Vec<ConnectionInfo> {
        let state = self.shared.state.lock();
        state.records.values().map(Connection::info).collect()
    }

    /// Insert a weak record without expiry callbacks, as left behind when a
    /// receiver expires between watch registration and insertion
    #[cfg(test)]
    pub(crate) fn insert_unwatched(&self, receiver: &Receiver<P, R>, sender: &Sender) {
        let Some(weak) = receiver.downgrade() else {
            panic!("receiver cannot be held weakly");
        };
        let connection = Connection {
            receiver_key: receiver.key(),
            receiver: ReceiverRef::Weak(weak),
            sender_key: sender.key(),
            sender: SenderRef::Strong(sender.clone()),
            receiver_watch: None,
            sender_watch: None,
        };
        let replaced = {
            let mut state = self.shared.state.lock();
            let replaced = state.insert(connection);
            self.shared.sync_len(&state);
            replaced
        };
        drop(replaced);
    }

    fn expiry_callback(&self, key: ConnectionKey, leg: Leg, token: ExpiryToken) -> ExpiryCallback {
        let shared = Arc::downgrade(&self.shared);
        Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.expire(&key, leg, token);
            }
        })
    }
}

struct Candidate<P, R> {
    key: ConnectionKey,
    receiver: ReceiverRef<P, R>,
}

/// Lazy iterator over the receivers a send reaches
///
/// Works on a snapshot taken when it was created: receivers connected later
/// are not seen, receivers that expire before their turn are skipped. Each
/// receiver is yielded at most once, even when it is connected both to
/// [`ANY`](crate::sender::ANY) and to the specific sender.
pub struct Receivers<P, R> {
    shared: Weak<Shared<P, R>>,
    candidates: std::vec::IntoIter<Candidate<P, R>>,
    yielded: HashSet<ReceiverKey, RandomState>,
}

impl<P, R> Receivers<P, R> {
    fn empty() -> Self {
        Self {
            shared: Weak::new(),
            candidates: Vec::new().into_iter(),
            yielded: HashSet::default(),
        }
    }
}

impl<P, R> Iterator for Receivers<P, R> {
    type Item = Receiver<P, R>;

    fn next(&mut self) -> Option<Self::Item> {
        for candidate in self.candidates.by_ref() {
            let (receiver_key, _) = &candidate.key;
            if self.yielded.contains(receiver_key) {
                continue;
            }
            match candidate.receiver.upgrade() {
                Some(receiver) => {
                    self.yielded.insert(*receiver_key);
                    return Some(receiver);
                }
                None => {
                    if let Some(shared) = self.shared.upgrade() {
                        shared.discard_expired(&candidate.key);
                    }
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.candidates.len()))
    }
}

impl<P, R> std::fmt::Debug for Receivers<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receivers")
            .field("remaining", &self.candidates.len())
            .finish()
    }
}
