//! Sender identities
//!
//! A [`Sender`] names the object on whose behalf a signal is emitted.
//! Receivers can subscribe to one specific sender or to [`ANY`].
//!
//! Identity depends on the kind of value:
//! - tracked values and signals are identified by allocation and can be held
//!   weakly by a registry
//! - plain shared objects are identified by allocation but only held strongly
//! - text and integers are identified by value, so two equal strings built
//!   independently address the same connections


use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use crate::tracked::{Lifeline, Tracked};

/// Wildcard sender: as a filter it matches every emission, as a sender it
/// only reaches receivers connected to `ANY`
pub const ANY: Sender = Sender { repr: Repr::Any };

/// Hashable identity of a sender
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SenderKey {
    /// The [`ANY`] wildcard
    Any,
    /// An object identified by its allocation
    Address(usize),
    /// A text value
    Text(Arc<str>),
    /// An integer value
    Int(i64),
}

impl SenderKey {
    /// Whether this is the wildcard key
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for SenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Address(address) => write!(f, "object@{address:#x}"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Int(value) => write!(f, "{value}"),
        }
    }
}

/// The object on whose behalf a signal is sent
#[derive(Clone)]
pub struct Sender {
    repr: Repr,
}

#[derive(Clone)]
enum Repr {
    Any,
    Tracked(Arc<dyn Lifeline>),
    Object {
        address: usize,
        value: Arc<dyn Any + Send + Sync>,
    },
    Text(Arc<str>),
    Int(i64),
}

impl Sender {
    /// A shared object, identified by its allocation. Always held strongly
    /// by registries; use a [`Tracked`] value for weak holding.
    pub fn object<T>(value: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        let address = Arc::as_ptr(&value) as *const () as usize;
        Self {
            repr: Repr::Object { address, value },
        }
    }

    /// A text value, identified by equality
    pub fn text(value: impl Into<Arc<str>>) -> Self {
        Self {
            repr: Repr::Text(value.into()),
        }
    }

    /// An integer value, identified by equality
    pub fn int(value: i64) -> Self {
        Self {
            repr: Repr::Int(value),
        }
    }

    /// Sender for any tracked value
    pub fn tracked<T>(value: &Tracked<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::from_lifeline(Tracked::lifeline(value))
    }

    pub(crate) fn from_lifeline(lifeline: Arc<dyn Lifeline>) -> Self {
        Self {
            repr: Repr::Tracked(lifeline),
        }
    }

    /// Identity key of this sender
    pub fn key(&self) -> SenderKey {
        match &self.repr {
            Repr::Any => SenderKey::Any,
            Repr::Tracked(lifeline) => SenderKey::Address(lifeline.address()),
            Repr::Object { address, .. } => SenderKey::Address(*address),
            Repr::Text(text) => SenderKey::Text(text.clone()),
            Repr::Int(value) => SenderKey::Int(*value),
        }
    }

    /// Whether this is [`ANY`]
    pub fn is_any(&self) -> bool {
        matches!(self.repr, Repr::Any)
    }

    /// Whether a registry may hold this sender weakly
    pub fn is_weakly_referenceable(&self) -> bool {
        matches!(self.repr, Repr::Tracked(_))
    }

    /// Borrow the underlying object if it has type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match &self.repr {
            Repr::Tracked(lifeline) => lifeline.value_any().downcast_ref::<T>(),
            Repr::Object { value, .. } => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// The text value, for text senders
    pub fn as_text(&self) -> Option<&str> {
        match &self.repr {
            Repr::Text(text) => Some(&**text),
            _ => None,
        }
    }

    /// The integer value, for integer senders
    pub fn as_int(&self) -> Option<i64> {
        match self.repr {
            Repr::Int(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn lifeline(&self) -> Option<&Arc<dyn Lifeline>> {
        match &self.repr {
            Repr::Tracked(lifeline) => Some(lifeline),
            _ => None,
        }
    }
}

impl Default for Sender {
    fn default() -> Self {
        ANY
    }
}

impl PartialEq for Sender {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Sender {}

impl Hash for Sender {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sender({})", self.key())
    }
}

impl From<&Sender> for Sender {
    fn from(sender: &Sender) -> Self {
        sender.clone()
    }
}

impl<T> From<&Tracked<T>> for Sender
where
    T: Send + Sync + 'static,
{
    fn from(value: &Tracked<T>) -> Self {
        Self::tracked(value)
    }
}

impl From<&str> for Sender {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Sender {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<i64> for Sender {
    fn from(value: i64) -> Self {
        Self::int(value)
    }
}

impl From<i32> for Sender {
    fn from(value: i32) -> Self {
        Self::int(i64::from(value))
    }
}

/// How a registry holds the sender leg of a connection
pub(crate) enum SenderRef {
    Strong(Sender),
    Weak(Weak<dyn Lifeline>),
}

impl SenderRef {
    pub(crate) fn is_alive(&self) -> bool {
        match self {
            Self::Strong(_) => true,
            Self::Weak(weak) => weak.strong_count() > 0,
        }
    }

    pub(crate) fn is_weak(&self) -> bool {
        matches!(self, Self::Weak(_))
    }

    /// Recover a sender value, if it is still alive
    pub(crate) fn upgrade(&self) -> Option<Sender> {
        match self {
            Self::Strong(sender) => Some(sender.clone()),
            Self::Weak(weak) => weak.upgrade().map(Sender::from_lifeline),
        }
    }
}
