use crate::receiver::{ReceiverKey, ReceiverRef, Strength};
use crate::sender::{Sender, SenderKey, SenderRef};
use crate::tracked::Watch;

/// Records are unique per (receiver, sender filter)
pub(crate) type ConnectionKey = (ReceiverKey, SenderKey);

/// Which leg of a connection an expiry callback watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Leg {
    Receiver,
    Sender,
}

/// One subscription of a receiver to a sender filter
///
/// Dropping a record cancels its expiry callbacks, which may release the
/// last strong handle of a receiver or sender. Records must therefore only
/// be dropped once the registry lock is released.
pub(crate) struct Connection<P, R> {
    pub(crate) receiver_key: ReceiverKey,
    pub(crate) receiver: ReceiverRef<P, R>,
    pub(crate) sender_key: SenderKey,
    pub(crate) sender: SenderRef,
    pub(crate) receiver_watch: Option<Watch>,
    pub(crate) sender_watch: Option<Watch>,
}

impl<P, R> Connection<P, R> {
    pub(crate) fn key(&self) -> ConnectionKey {
        (self.receiver_key, self.sender_key.clone())
    }

    /// Both legs still reachable
    pub(crate) fn is_alive(&self) -> bool {
        self.receiver.is_alive() && self.sender.is_alive()
    }

    pub(crate) fn watch(&self, leg: Leg) -> Option<&Watch> {
        match leg {
            Leg::Receiver => self.receiver_watch.as_ref(),
            Leg::Sender => self.sender_watch.as_ref(),
        }
    }

    /// The sender this record listens to, if it can still be produced
    pub(crate) fn sender_handle(&self) -> Option<Sender> {
        self.sender.upgrade()
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            receiver: self.receiver_key,
            sender: self.sender_key.clone(),
            strength: self.receiver.strength(),
            sender_strength: if self.sender.is_weak() {
                Strength::Weak
            } else {
                Strength::Strong
            },
        }
    }
}

impl<P, R> Drop for Connection<P, R> {
    fn drop(&mut self) {
        if let Some(watch) = &self.receiver_watch {
            watch.cancel();
        }
        if let Some(watch) = &self.sender_watch {
            watch.cancel();
        }
    }
}

/// Read-only view of one connection record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Receiver identity
    pub receiver: ReceiverKey,
    /// Sender filter, [`SenderKey::Any`] for the wildcard
    pub sender: SenderKey,
    /// How the receiver is actually held. Can be `Strong` even when weak
    /// holding was requested, for receivers that cannot be held weakly.
    pub strength: Strength,
    /// How the sender is actually held
    pub sender_strength: Strength,
}
