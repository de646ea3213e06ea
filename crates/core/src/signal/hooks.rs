use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::receiver::{Receiver, ReceiverKey, Strength};
use crate::sender::Sender;

/// Payload of the `receiver_connected` and `receiver_disconnected` hooks
///
/// Hook signals are `Signal<HookEvent, ()>` whatever the payload type of
/// the signal they observe, so the receiver travels type-erased. Use
/// [`HookEvent::receiver`] with the owning signal's types to get it back.
#[derive(Clone)]
pub struct HookEvent {
    /// Identity of the receiver that was connected or disconnected
    pub receiver_key: ReceiverKey,
    receiver: Arc<dyn Any + Send + Sync>,
    /// Sender filter of the record
    pub sender: Sender,
    /// Requested weak holding. `None` for disconnect events.
    pub weak: Option<bool>,
}

impl HookEvent {
    pub(crate) fn connected<P, R>(receiver: &Receiver<P, R>, sender: &Sender, strength: Strength) -> Self
    where
        P: 'static,
        R: 'static,
    {
        Self {
            receiver_key: receiver.key(),
            receiver: Arc::new(receiver.clone()),
            sender: sender.clone(),
            weak: Some(strength.is_weak()),
        }
    }

    pub(crate) fn disconnected<P, R>(receiver: &Receiver<P, R>, sender: Sender) -> Self
    where
        P: 'static,
        R: 'static,
    {
        Self {
            receiver_key: receiver.key(),
            receiver: Arc::new(receiver.clone()),
            sender,
            weak: None,
        }
    }

    /// The receiver, if the observed signal is a `Signal<P, R>`
    pub fn receiver<P, R>(&self) -> Option<&Receiver<P, R>>
    where
        P: 'static,
        R: 'static,
    {
        self.receiver.downcast_ref()
    }

    /// Whether this event reports a connect
    pub fn is_connect(&self) -> bool {
        self.weak.is_some()
    }
}

impl fmt::Debug for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookEvent")
            .field("receiver", &self.receiver_key)
            .field("sender", &self.sender)
            .field("weak", &self.weak)
            .finish()
    }
}
