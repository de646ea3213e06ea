//! Error types for signal dispatch

use thiserror::Error;

use crate::receiver::ReceiverKey;

/// Boxed error produced by receivers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by signal operations
#[derive(Debug, Error)]
pub enum SignalError {
    /// More than one positional sender was supplied to a send
    #[error("send accepts at most one sender, got {count}")]
    MultipleSenders { count: usize },

    /// A receiver failed; the remaining receivers were not invoked
    #[error("receiver {receiver} failed: {source}")]
    Receiver {
        receiver: ReceiverKey,
        #[source]
        source: BoxError,
    },
}

impl SignalError {
    /// Returns true if a receiver failed
    pub fn is_receiver_error(&self) -> bool {
        matches!(self, Self::Receiver { .. })
    }

    /// The receiver that failed, if any
    pub fn receiver(&self) -> Option<ReceiverKey> {
        match self {
            Self::Receiver { receiver, .. } => Some(*receiver),
            Self::MultipleSenders { .. } => None,
        }
    }

    /// Take back the error the receiver returned, untouched
    pub fn into_receiver_error(self) -> Option<BoxError> {
        match self {
            Self::Receiver { source, .. } => Some(source),
            Self::MultipleSenders { .. } => None,
        }
    }
}

/// Result type alias for signal operations
pub type SignalResult<T> = Result<T, SignalError>;
