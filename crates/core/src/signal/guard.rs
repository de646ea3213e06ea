use std::sync::atomic::Ordering;

use super::Signal;
use crate::receiver::Receiver;
use crate::sender::Sender;

/// Keeps a receiver connected for as long as it lives
///
/// Returned by [`Signal::connected_to`]. Dropping the guard disconnects the
/// receiver from the sender it was connected to, also while unwinding.
#[must_use = "the receiver is disconnected as soon as the guard is dropped"]
pub struct ConnectedGuard<P: 'static, R: 'static> {
    pub(super) signal: Signal<P, R>,
    pub(super) receiver: Receiver<P, R>,
    pub(super) sender: Sender,
}

impl<P: 'static, R: 'static> ConnectedGuard<P, R> {
    /// The connected receiver
    pub fn receiver(&self) -> &Receiver<P, R> {
        &self.receiver
    }
}

impl<P: 'static, R: 'static> Drop for ConnectedGuard<P, R> {
    fn drop(&mut self) {
        if let Err(err) = self
            .signal
            .disconnect_from(&self.receiver, self.sender.clone())
        {
            tracing::warn!(
                target: "relay::signal",
                signal = %self.signal.label(),
                receiver = %self.receiver.key(),
                error = %err,
                "disconnect hook failed while releasing a scoped connection"
            );
        }
    }
}

/// Suppresses dispatch of a signal while held
///
/// Returned by [`Signal::muted`]. Guards nest: the signal is live again once
/// every guard is dropped.
#[must_use = "the signal is unmuted as soon as the guard is dropped"]
pub struct MuteGuard<P: 'static, R: 'static> {
    pub(super) signal: Signal<P, R>,
}

impl<P: 'static, R: 'static> Drop for MuteGuard<P, R> {
    fn drop(&mut self) {
        self.signal.core.muted.fetch_sub(1, Ordering::AcqRel);
    }
}
