//! Receivers: the callables subscribed to a signal
//!
//! A [`Receiver`] wraps a callable `Fn(&Sender, &P) -> Result<R, BoxError>`
//! together with a stable identity. Three kinds exist:
//!
//! - closures ([`Receiver::new`]): the receiver owns a tracked allocation and
//!   can be held weakly; dropping every `Receiver` clone expires it
//! - function pointers ([`Receiver::from_fn`]): static code, never expires,
//!   always held strongly even when weak holding was requested
//! - bound methods ([`Receiver::method`]): a function applied to a tracked
//!   object; held weakly through the object, and two receivers built from the
//!   same object and function share one identity


use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::sender::Sender;
use crate::tracked::{Lifeline, Tracked, WeakTracked};

/// Result type returned by receivers
pub type ReceiverResult<R> = Result<R, BoxError>;

type Callback<P, R> = dyn Fn(&Sender, &P) -> ReceiverResult<R> + Send + Sync;

/// Plain function usable as a receiver
pub type ReceiverFn<P, R> = fn(&Sender, &P) -> ReceiverResult<R>;

/// Function usable as a bound-method receiver on a `T`
pub type MethodFn<T, P, R> = fn(&T, &Sender, &P) -> ReceiverResult<R>;

/// Stable identity of a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverKey {
    /// A closure receiver, by allocation
    Callable(usize),
    /// A function pointer, by address
    Function(usize),
    /// A bound method, by function address and object allocation
    Method { function: usize, object: usize },
}

impl fmt::Display for ReceiverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callable(address) => write!(f, "closure@{address:#x}"),
            Self::Function(address) => write!(f, "fn@{address:#x}"),
            Self::Method { function, object } => {
                write!(f, "method@{function:#x} on object@{object:#x}")
            }
        }
    }
}

/// Requested holding strength for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strength {
    /// Do not keep the receiver (or sender) alive
    #[default]
    Weak,
    /// Keep the receiver (and sender) alive until disconnected
    Strong,
}

impl Strength {
    /// Whether weak holding is requested
    pub fn is_weak(self) -> bool {
        matches!(self, Self::Weak)
    }
}

/// A callable subscribed to a signal
pub struct Receiver<P, R> {
    key: ReceiverKey,
    target: Target<P, R>,
}

enum Target<P, R> {
    Closure(Tracked<Box<Callback<P, R>>>),
    Function(ReceiverFn<P, R>),
    Method(Arc<dyn BoundMethod<P, R>>),
}

impl<P, R> Clone for Target<P, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Closure(callback) => Self::Closure(callback.clone()),
            Self::Function(function) => Self::Function(*function),
            Self::Method(method) => Self::Method(method.clone()),
        }
    }
}

trait BoundMethod<P, R>: Send + Sync {
    fn invoke(&self, sender: &Sender, payload: &P) -> ReceiverResult<R>;
    fn lifeline(&self) -> Arc<dyn Lifeline>;
    fn downgrade(&self) -> Arc<dyn WeakBoundMethod<P, R>>;
}

trait WeakBoundMethod<P, R>: Send + Sync {
    fn upgrade(&self) -> Option<Arc<dyn BoundMethod<P, R>>>;
    fn is_alive(&self) -> bool;
}

struct StrongMethod<T, P, R> {
    object: Tracked<T>,
    function: MethodFn<T, P, R>,
}

struct WeakMethod<T, P, R> {
    object: WeakTracked<T>,
    function: MethodFn<T, P, R>,
}

impl<T, P, R> BoundMethod<P, R> for StrongMethod<T, P, R>
where
    T: Send + Sync + 'static,
    P: 'static,
    R: 'static,
{
    fn invoke(&self, sender: &Sender, payload: &P) -> ReceiverResult<R> {
        (self.function)(&self.object, sender, payload)
    }

    fn lifeline(&self) -> Arc<dyn Lifeline> {
        Tracked::lifeline(&self.object)
    }

    fn downgrade(&self) -> Arc<dyn WeakBoundMethod<P, R>> {
        Arc::new(WeakMethod {
            object: Tracked::downgrade(&self.object),
            function: self.function,
        })
    }
}

impl<T, P, R> WeakBoundMethod<P, R> for WeakMethod<T, P, R>
where
    T: Send + Sync + 'static,
    P: 'static,
    R: 'static,
{
    fn upgrade(&self) -> Option<Arc<dyn BoundMethod<P, R>>> {
        let object = self.object.upgrade()?;
        Some(Arc::new(StrongMethod {
            object,
            function: self.function,
        }))
    }

    fn is_alive(&self) -> bool {
        self.object.is_alive()
    }
}

impl<P, R> Receiver<P, R>
where
    P: 'static,
    R: 'static,
{
    /// Receiver backed by a closure
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Sender, &P) -> ReceiverResult<R> + Send + Sync + 'static,
    {
        let boxed: Box<Callback<P, R>> = Box::new(callback);
        let cell = Tracked::new(boxed);
        Self {
            key: ReceiverKey::Callable(Tracked::address(&cell)),
            target: Target::Closure(cell),
        }
    }

    /// Receiver backed by a plain function. Never held weakly.
    pub fn from_fn(function: ReceiverFn<P, R>) -> Self {
        Self {
            key: ReceiverKey::Function(function as usize),
            target: Target::Function(function),
        }
    }

    /// Receiver calling `function` on `object`
    ///
    /// Receivers built from the same object and function are the same
    /// receiver as far as connect and disconnect are concerned.
    pub fn method<T>(object: &Tracked<T>, function: MethodFn<T, P, R>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            key: ReceiverKey::Method {
                function: function as usize,
                object: Tracked::address(object),
            },
            target: Target::Method(Arc::new(StrongMethod {
                object: object.clone(),
                function,
            })),
        }
    }

    /// Identity of this receiver
    pub fn key(&self) -> ReceiverKey {
        self.key
    }

    /// Invoke the receiver
    pub fn call(&self, sender: &Sender, payload: &P) -> ReceiverResult<R> {
        match &self.target {
            Target::Closure(callback) => (**callback)(sender, payload),
            Target::Function(function) => function(sender, payload),
            Target::Method(method) => method.invoke(sender, payload),
        }
    }

    /// Whether a registry may hold this receiver weakly
    pub fn is_weakly_referenceable(&self) -> bool {
        !matches!(self.target, Target::Function(_))
    }

    pub(crate) fn lifeline(&self) -> Option<Arc<dyn Lifeline>> {
        match &self.target {
            Target::Closure(callback) => Some(Tracked::lifeline(callback)),
            Target::Function(_) => None,
            Target::Method(method) => Some(method.lifeline()),
        }
    }

    pub(crate) fn downgrade(&self) -> Option<WeakReceiver<P, R>> {
        let target = match &self.target {
            Target::Closure(callback) => WeakTarget::Closure(Tracked::downgrade(callback)),
            Target::Function(_) => return None,
            Target::Method(method) => WeakTarget::Method(method.downgrade()),
        };
        Some(WeakReceiver {
            key: self.key,
            target,
        })
    }
}

impl<P, R> Clone for Receiver<P, R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            target: self.target.clone(),
        }
    }
}

impl<P, R> PartialEq for Receiver<P, R> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<P, R> Eq for Receiver<P, R> {}

impl<P, R> std::hash::Hash for Receiver<P, R> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<P, R> fmt::Debug for Receiver<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Receiver").field(&self.key).finish()
    }
}

impl<P, R, F> From<F> for Receiver<P, R>
where
    P: 'static,
    R: 'static,
    F: Fn(&Sender, &P) -> ReceiverResult<R> + Send + Sync + 'static,
{
    fn from(callback: F) -> Self {
        Self::new(callback)
    }
}

/// Weak counterpart of [`Receiver`], as stored by registries
pub(crate) struct WeakReceiver<P, R> {
    key: ReceiverKey,
    target: WeakTarget<P, R>,
}

enum WeakTarget<P, R> {
    Closure(WeakTracked<Box<Callback<P, R>>>),
    Method(Arc<dyn WeakBoundMethod<P, R>>),
}

impl<P, R> WeakReceiver<P, R> {
    pub(crate) fn upgrade(&self) -> Option<Receiver<P, R>> {
        let target = match &self.target {
            WeakTarget::Closure(callback) => Target::Closure(callback.upgrade()?),
            WeakTarget::Method(method) => Target::Method(method.upgrade()?),
        };
        Some(Receiver {
            key: self.key,
            target,
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        match &self.target {
            WeakTarget::Closure(callback) => callback.is_alive(),
            WeakTarget::Method(method) => method.is_alive(),
        }
    }
}

impl<P, R> Clone for WeakReceiver<P, R> {
    fn clone(&self) -> Self {
        let target = match &self.target {
            WeakTarget::Closure(callback) => WeakTarget::Closure(callback.clone()),
            WeakTarget::Method(method) => WeakTarget::Method(method.clone()),
        };
        Self {
            key: self.key,
            target,
        }
    }
}

/// How a registry holds the receiver leg of a connection
pub(crate) enum ReceiverRef<P, R> {
    Strong(Receiver<P, R>),
    Weak(WeakReceiver<P, R>),
}

impl<P, R> ReceiverRef<P, R> {
    pub(crate) fn upgrade(&self) -> Option<Receiver<P, R>> {
        match self {
            Self::Strong(receiver) => Some(receiver.clone()),
            Self::Weak(weak) => weak.upgrade(),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        match self {
            Self::Strong(_) => true,
            Self::Weak(weak) => weak.is_alive(),
        }
    }

    pub(crate) fn strength(&self) -> Strength {
        match self {
            Self::Strong(_) => Strength::Strong,
            Self::Weak(_) => Strength::Weak,
        }
    }
}

impl<P, R> Clone for ReceiverRef<P, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Strong(receiver) => Self::Strong(receiver.clone()),
            Self::Weak(weak) => Self::Weak(weak.clone()),
        }
    }
}
