//! Weakly observable shared handles
//!
//! A [`Tracked`] value behaves like an `Arc`, with one addition: code that
//! only keeps a [`WeakTracked`] can register expiry callbacks which run when
//! the last strong handle is dropped. Signal registries use this to remove
//! connections whose receiver or sender went away, without being the reason
//! either of them stays alive.


use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked once when a tracked value expires
pub type ExpiryCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies one registered expiry callback
///
/// Tokens are unique for the whole process, so a stale token can never
/// cancel or match a callback registered later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpiryToken(u64);

impl ExpiryToken {
    /// Allocate a fresh token
    pub fn next() -> Self {
        static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

type Callbacks = HashMap<ExpiryToken, ExpiryCallback, ahash::RandomState>;

/// Expiry interface of a tracked allocation, independent of the value type
pub(crate) trait Lifeline: Send + Sync {
    /// Register `callback` under `token`; it runs when the value expires
    fn on_expire(&self, token: ExpiryToken, callback: ExpiryCallback);

    /// Drop a registered callback. Returns false when it was not registered
    fn cancel(&self, token: ExpiryToken) -> bool;

    /// Address of the allocation, used as identity
    fn address(&self) -> usize;

    /// The tracked value itself
    fn value_any(&self) -> &(dyn Any + Send + Sync);
}

struct TrackedCell<T> {
    callbacks: Mutex<Callbacks>,
    value: T,
}

impl<T> Drop for TrackedCell<T> {
    fn drop(&mut self) {
        // Nobody else can reach the cell any more, so draining without the
        // lock is safe. Callbacks run after the drain so they may freely
        // touch other tracked values.
        let callbacks = std::mem::take(self.callbacks.get_mut());
        if !callbacks.is_empty() {
            tracing::trace!(
                target: "relay::tracked",
                count = callbacks.len(),
                "running expiry callbacks"
            );
        }
        for (_, callback) in callbacks {
            callback();
        }
    }
}

impl<T> Lifeline for TrackedCell<T>
where
    T: Send + Sync + 'static,
{
    fn on_expire(&self, token: ExpiryToken, callback: ExpiryCallback) {
        self.callbacks.lock().insert(token, callback);
    }

    fn cancel(&self, token: ExpiryToken) -> bool {
        self.callbacks.lock().remove(&token).is_some()
    }

    fn address(&self) -> usize {
        self as *const Self as *const () as usize
    }

    fn value_any(&self) -> &(dyn Any + Send + Sync) {
        &self.value
    }
}

/// A shared value whose expiry can be observed through weak handles
///
/// Like `Arc`, the helper functions are associated functions
/// (`Tracked::downgrade(&value)`) so they never shadow methods of `T`.
pub struct Tracked<T> {
    cell: Arc<TrackedCell<T>>,
}

impl<T> Tracked<T>
where
    T: Send + Sync + 'static,
{
    /// Wrap `value` in a new tracked allocation
    pub fn new(value: T) -> Self {
        Self {
            cell: Arc::new(TrackedCell {
                callbacks: Mutex::new(Callbacks::default()),
                value,
            }),
        }
    }

    /// Create a weak handle that does not keep the value alive
    pub fn downgrade(this: &Self) -> WeakTracked<T> {
        WeakTracked {
            cell: Arc::downgrade(&this.cell),
        }
    }

    /// Register a callback that runs exactly once, on whichever thread drops
    /// the last strong handle
    pub fn on_expire<F>(this: &Self, callback: F) -> ExpiryToken
    where
        F: FnOnce() + Send + 'static,
    {
        let token = ExpiryToken::next();
        this.cell.on_expire(token, Box::new(callback));
        token
    }

    /// Cancel a callback registered with [`Tracked::on_expire`]
    pub fn cancel_expiry(this: &Self, token: ExpiryToken) -> bool {
        this.cell.cancel(token)
    }

    /// Identity of the allocation
    pub fn address(this: &Self) -> usize {
        Arc::as_ptr(&this.cell) as *const () as usize
    }

    /// Whether both handles point at the same allocation
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.cell, &other.cell)
    }

    /// Number of strong handles, including this one
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.cell)
    }

    pub(crate) fn lifeline(this: &Self) -> Arc<dyn Lifeline> {
        this.cell.clone()
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.cell.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&self.cell.value).finish()
    }
}

/// Weak counterpart of [`Tracked`]
pub struct WeakTracked<T> {
    cell: Weak<TrackedCell<T>>,
}

impl<T> WeakTracked<T> {
    /// Upgrade to a strong handle, or `None` once the value expired
    pub fn upgrade(&self) -> Option<Tracked<T>> {
        self.cell.upgrade().map(|cell| Tracked { cell })
    }

    /// Check liveness without upgrading
    pub fn is_alive(&self) -> bool {
        self.cell.strong_count() > 0
    }

    /// Identity of the allocation. Stays stable after expiry because the
    /// allocation is kept while weak handles exist.
    pub fn address(&self) -> usize {
        self.cell.as_ptr() as *const () as usize
    }
}

impl<T> Clone for WeakTracked<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> fmt::Debug for WeakTracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTracked")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// A registered expiry callback that the holder may want to cancel later
pub(crate) struct Watch {
    lifeline: Weak<dyn Lifeline>,
    token: ExpiryToken,
}

impl Watch {
    /// Register `callback` on `lifeline` under `token`
    pub(crate) fn register(
        lifeline: &Arc<dyn Lifeline>,
        token: ExpiryToken,
        callback: ExpiryCallback,
    ) -> Self {
        lifeline.on_expire(token, callback);
        Self {
            lifeline: Arc::downgrade(lifeline),
            token,
        }
    }

    pub(crate) fn token(&self) -> ExpiryToken {
        self.token
    }

    /// Cancel the callback if the value is still alive.
    ///
    /// Upgrading may briefly hold the last strong reference, so this must
    /// never run while a registry lock is held.
    pub(crate) fn cancel(&self) {
        if let Some(lifeline) = self.lifeline.upgrade() {
            lifeline.cancel(self.token);
        }
    }
}
