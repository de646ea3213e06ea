//! In-process signals: named or anonymous broadcast channels that any number
//! of receivers subscribe to, optionally filtered by sender.
//!
//! ```rust
//! use relay_core::{Receiver, Signal, Tracked};
//!
//! struct Document {
//!     title: &'static str,
//! }
//!
//! let saved: Signal<(), String> = Signal::named("saved");
//! let report = saved
//!     .connect(&Receiver::new(|sender, _| {
//!         let document = sender.downcast_ref::<Document>().ok_or("not a document")?;
//!         Ok(format!("saved {}", document.title))
//!     }))
//!     .unwrap();
//!
//! let document = Tracked::new(Document { title: "notes" });
//! let results = saved.send(&document, &()).unwrap();
//! assert_eq!(results, vec![(report, "saved notes".to_string())]);
//! ```

pub mod config;
pub mod error;
pub mod namespace;
pub mod receiver;
mod registry;
pub mod sender;
pub mod signal;
pub mod tracked;

#[cfg(test)]
pub(crate) mod test_utils;

/// Keyword payload carried by signals looked up by name
pub type Kwargs = serde_json::Map<String, Value>;
pub use serde_json::Value;

// Re-export commonly used items
pub use config::RegistryConfig;
pub use error::{BoxError, SignalError, SignalResult};
pub use namespace::{Namespace, WeakNamespace, default_namespace, signal};
pub use receiver::{Receiver, ReceiverKey, ReceiverResult, Strength};
pub use registry::{ConnectionInfo, Receivers};
pub use sender::{ANY, Sender, SenderKey};
pub use signal::{ConnectedGuard, HookEvent, MuteGuard, Signal, SignalBuilder, WeakSignal};
pub use tracked::{ExpiryToken, Tracked, WeakTracked};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}

/// Build a [`Kwargs`] payload
///
/// ```rust
/// use relay_core::kwargs;
///
/// let payload = kwargs! { "user" => "ada", "attempt" => 2 };
/// assert_eq!(payload["attempt"], 2);
/// ```
#[macro_export]
macro_rules! kwargs {
    () => {
        $crate::Kwargs::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut kwargs = $crate::Kwargs::new();
        $(
            kwargs.insert(
                ::std::string::String::from($key),
                $crate::__private::serde_json::json!($value),
            );
        )+
        kwargs
    }};
}
