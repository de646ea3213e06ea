//! Signals: broadcast channels with a registry of receivers
//!
//! A [`Signal`] is a cheap handle; clones share one registry. Sending calls
//! every live receiver that listens to [`ANY`] or to the exact sender, in
//! the caller's thread, and collects their return values. The registry
//! lock is never held while a receiver runs, so receivers may connect,
//! disconnect or send on the same signal.
//!
//! # Examples
//!
//! ```rust
//! use relay_core::{Receiver, Sender, Signal};
//!
//! let ready: Signal<u32, u32> = Signal::named("ready");
//! let double = ready
//!     .connect(&Receiver::new(|_sender, value: &u32| Ok(value * 2)))
//!     .unwrap();
//!
//! let results = ready.send(Sender::text("boot"), &21).unwrap();
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0].0, double);
//! assert_eq!(results[0].1, 42);
//! ```

mod guard;
mod hooks;
#[cfg(test)]
mod tests;

pub use guard::{ConnectedGuard, MuteGuard};
pub use hooks::HookEvent;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::config::{RegistryConfig, registry_config};
use crate::error::{SignalError, SignalResult};
use crate::receiver::{Receiver, Strength};
use crate::registry::{ConnectionInfo, Receivers, Registry};
use crate::sender::{ANY, Sender};
use crate::tracked::{ExpiryToken, Tracked, WeakTracked};
use crate::{Kwargs, Value};

const ANONYMOUS: &str = "anonymous";

/// A broadcast channel
///
/// `P` is the payload handed by reference to every receiver, `R` what each
/// receiver returns. The defaults carry JSON keyword data, which suits
/// signals looked up by name.
///
/// Two signals are the same signal only if they share state
/// ([`Signal::ptr_eq`]); equal names mean nothing.
pub struct Signal<P = Kwargs, R = Value> {
    core: Tracked<SignalCore<P, R>>,
}

struct SignalCore<P, R> {
    name: Option<Arc<str>>,
    doc: Option<Arc<str>>,
    label: Arc<str>,
    registry: Registry<P, R>,
    muted: AtomicUsize,
    // Created on first access; a hook signal owns hook signals of its own
    connected_hook: OnceLock<Signal<HookEvent, ()>>,
    disconnected_hook: OnceLock<Signal<HookEvent, ()>>,
}

/// Builder for signals with a name, documentation or custom configuration
#[derive(Debug, Default, Clone)]
pub struct SignalBuilder {
    name: Option<Arc<str>>,
    doc: Option<Arc<str>>,
    config: Option<RegistryConfig>,
}

impl SignalBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<Arc<str>>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Registry configuration; the process-wide default when not set
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build<P, R>(self) -> Signal<P, R>
    where
        P: 'static,
        R: 'static,
    {
        let label = self.name.clone().unwrap_or_else(|| Arc::from(ANONYMOUS));
        let config = self.config.unwrap_or_else(registry_config);
        Signal {
            core: Tracked::new(SignalCore {
                name: self.name,
                doc: self.doc,
                registry: Registry::new(label.clone(), config),
                label,
                muted: AtomicUsize::new(0),
                connected_hook: OnceLock::new(),
                disconnected_hook: OnceLock::new(),
            }),
        }
    }
}

impl<P, R> Signal<P, R>
where
    P: 'static,
    R: 'static,
{
    /// An anonymous signal
    pub fn new() -> Self {
        SignalBuilder::new().build()
    }

    /// A signal with a name, used in logs and by namespaces
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        SignalBuilder::new().name(name).build()
    }

    /// An anonymous signal with its own registry configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        SignalBuilder::new().config(config).build()
    }

    pub fn name(&self) -> Option<&str> {
        self.core.name.as_deref()
    }

    pub fn doc(&self) -> Option<&str> {
        self.core.doc.as_deref()
    }

    /// Registry configuration this signal was built with
    pub fn config(&self) -> &RegistryConfig {
        self.core.registry.config()
    }

    pub(crate) fn label(&self) -> &str {
        &self.core.label
    }

    /// Connect `receiver` to every sender, held weakly
    ///
    /// Returns the receiver it was given.
    pub fn connect(&self, receiver: &Receiver<P, R>) -> SignalResult<Receiver<P, R>> {
        self.connect_with(receiver, ANY, Strength::Weak)
    }

    /// Connect `receiver` to one sender, held weakly
    pub fn connect_via(
        &self,
        receiver: &Receiver<P, R>,
        sender: impl Into<Sender>,
    ) -> SignalResult<Receiver<P, R>> {
        self.connect_with(receiver, sender, Strength::Weak)
    }

    /// Connect `receiver` to `sender` with the requested holding strength
    ///
    /// Connecting a pair that is already connected replaces the record, so
    /// the receiver is still called once per send. When a
    /// `receiver_connected` hook receiver fails, the new record is removed,
    /// any record it replaced is put back and the hook error returned.
    /// Records of the receiver under other senders are untouched.
    pub fn connect_with(
        &self,
        receiver: &Receiver<P, R>,
        sender: impl Into<Sender>,
        strength: Strength,
    ) -> SignalResult<Receiver<P, R>> {
        let sender = sender.into();
        let Some(hook) = self.active_hook(&self.core.connected_hook) else {
            self.core.registry.connect(receiver, &sender, strength);
            return Ok(receiver.clone());
        };

        // The replaced record is kept until the hooks agree
        let (_, replaced) = self.core.registry.replace(receiver, &sender, strength);
        let event = HookEvent::connected(receiver, &sender, strength);
        if let Err(err) = hook.send(self, &event) {
            self.core
                .registry
                .restore(receiver.key(), &sender.key(), replaced);
            return Err(err);
        }

        drop(replaced);
        Ok(receiver.clone())
    }

    /// Disconnect `receiver` from every sender it is connected to
    pub fn disconnect(&self, receiver: &Receiver<P, R>) -> SignalResult<()> {
        self.disconnect_from(receiver, ANY)
    }

    /// Disconnect `receiver` from `sender`, or from everything for [`ANY`]
    ///
    /// Disconnecting a pair that is not connected does nothing. Errors only
    /// come from `receiver_disconnected` hook receivers; the records are
    /// removed either way.
    pub fn disconnect_from(
        &self,
        receiver: &Receiver<P, R>,
        sender: impl Into<Sender>,
    ) -> SignalResult<()> {
        let sender = sender.into();
        let removed = self.core.registry.disconnect(receiver.key(), &sender.key());
        let Some(hook) = self.active_hook(&self.core.disconnected_hook) else {
            return Ok(());
        };

        let events: Vec<HookEvent> = removed
            .iter()
            .map(|connection| {
                let record_sender = connection.sender_handle().unwrap_or_else(|| sender.clone());
                HookEvent::disconnected(receiver, record_sender)
            })
            .collect();
        drop(removed);

        for event in &events {
            hook.send(self, event)?;
        }
        Ok(())
    }

    /// Connect strongly for the lifetime of the returned guard
    pub fn connected_to(
        &self,
        receiver: &Receiver<P, R>,
        sender: impl Into<Sender>,
    ) -> SignalResult<ConnectedGuard<P, R>> {
        let sender = sender.into();
        let receiver = self.connect_with(receiver, sender.clone(), Strength::Strong)?;
        Ok(ConnectedGuard {
            signal: self.clone(),
            receiver,
            sender,
        })
    }

    /// Send on behalf of `sender`
    ///
    /// Returns one `(receiver, value)` pair per receiver reached, in no
    /// particular order. The first receiver error stops the send; receivers
    /// already called are not undone.
    pub fn send(
        &self,
        sender: impl Into<Sender>,
        payload: &P,
    ) -> SignalResult<Vec<(Receiver<P, R>, R)>> {
        if self.core.registry.is_empty() || self.is_muted() {
            return Ok(Vec::new());
        }

        let sender = sender.into();
        let mut results = Vec::new();
        for receiver in self.core.registry.receivers_for(&sender.key()) {
            match receiver.call(&sender, payload) {
                Ok(value) => results.push((receiver, value)),
                Err(source) => {
                    return Err(SignalError::Receiver {
                        receiver: receiver.key(),
                        source,
                    });
                }
            }
        }

        tracing::trace!(
            target: "relay::signal",
            signal = %self.core.label,
            sender = %sender.key(),
            receivers = results.len(),
            "signal sent"
        );
        Ok(results)
    }

    /// Send with a positional sender list, as forwarded by adapters
    ///
    /// No sender means [`ANY`]. More than one is rejected before any
    /// receiver runs.
    pub fn send_args(
        &self,
        senders: &[Sender],
        payload: &P,
    ) -> SignalResult<Vec<(Receiver<P, R>, R)>> {
        match senders {
            [] => self.send(ANY, payload),
            [sender] => self.send(sender, payload),
            _ => Err(SignalError::MultipleSenders {
                count: senders.len(),
            }),
        }
    }

    /// Whether a send from `sender` may reach a receiver
    ///
    /// Can report true for receivers that just expired, never false for a
    /// live one.
    pub fn has_receivers_for(&self, sender: impl Into<Sender>) -> bool {
        if self.core.registry.is_empty() {
            return false;
        }
        self.core.registry.has_receivers_for(&sender.into().key())
    }

    /// Live receivers a send from `sender` would reach
    pub fn receivers_for(&self, sender: impl Into<Sender>) -> Receivers<P, R> {
        self.core.registry.receivers_for(&sender.into().key())
    }

    /// Remove records whose receiver or sender expired before its cleanup
    /// ran. Returns how many were removed.
    pub fn prune_stale(&self) -> usize {
        self.core.registry.prune_stale()
    }

    /// Snapshot of the connection records
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.core.registry.connections()
    }

    /// Number of connection records, expired ones included until cleaned up
    pub fn connection_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Suppress dispatch until the guard is dropped
    pub fn muted(&self) -> MuteGuard<P, R> {
        self.core.muted.fetch_add(1, Ordering::AcqRel);
        MuteGuard {
            signal: self.clone(),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.core.muted.load(Ordering::Acquire) > 0
    }

    /// Fired after each successful connect, with this signal as sender
    pub fn receiver_connected(&self) -> &Signal<HookEvent, ()> {
        self.core
            .connected_hook
            .get_or_init(|| Signal::named(format!("{}.receiver_connected", self.core.label)))
    }

    /// Fired once per record removed by an explicit disconnect, with this
    /// signal as sender. Expiry cleanup does not fire it.
    pub fn receiver_disconnected(&self) -> &Signal<HookEvent, ()> {
        self.core
            .disconnected_hook
            .get_or_init(|| Signal::named(format!("{}.receiver_disconnected", self.core.label)))
    }

    /// A handle that does not keep the signal alive
    pub fn downgrade(&self) -> WeakSignal<P, R> {
        WeakSignal {
            core: Tracked::downgrade(&self.core),
        }
    }

    /// Run `callback` once the last handle to this signal is dropped
    pub(crate) fn on_drop<F>(&self, callback: F) -> ExpiryToken
    where
        F: FnOnce() + Send + 'static,
    {
        Tracked::on_expire(&self.core, callback)
    }

    /// Whether both handles refer to the same signal
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Tracked::ptr_eq(&self.core, &other.core)
    }

    fn active_hook<'a>(
        &self,
        hook: &'a OnceLock<Signal<HookEvent, ()>>,
    ) -> Option<&'a Signal<HookEvent, ()>> {
        hook.get().filter(|hook| !hook.core.registry.is_empty())
    }
}

impl<P, R> Clone for Signal<P, R> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<P, R> Default for Signal<P, R>
where
    P: 'static,
    R: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R> fmt::Debug for Signal<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.core.name)
            .field("connections", &self.core.registry.len())
            .finish()
    }
}

/// A signal is a weakly observable sender: connections filtered on it are
/// dropped when the signal goes away
impl<P, R> From<&Signal<P, R>> for Sender
where
    P: 'static,
    R: 'static,
{
    fn from(signal: &Signal<P, R>) -> Self {
        Sender::tracked(&signal.core)
    }
}

/// Weak counterpart of [`Signal`]
pub struct WeakSignal<P = Kwargs, R = Value> {
    core: WeakTracked<SignalCore<P, R>>,
}

impl<P, R> WeakSignal<P, R> {
    pub fn upgrade(&self) -> Option<Signal<P, R>> {
        self.core.upgrade().map(|core| Signal { core })
    }

    pub fn is_alive(&self) -> bool {
        self.core.is_alive()
    }
}

impl<P, R> Clone for WeakSignal<P, R> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<P, R> fmt::Debug for WeakSignal<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSignal")
            .field("alive", &self.is_alive())
            .finish()
    }
}
