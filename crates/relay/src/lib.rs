pub use relay_core::{
    ANY, BoxError, ConnectedGuard, ConnectionInfo, ExpiryToken, HookEvent, Kwargs, MuteGuard,
    Namespace, Receiver, ReceiverKey, ReceiverResult, Receivers, RegistryConfig, Sender,
    SenderKey, Signal, SignalBuilder, SignalError, SignalResult, Strength, Tracked, Value,
    WeakNamespace, WeakSignal, WeakTracked,
    config::{registry_config, set_registry_config},
    default_namespace, kwargs,
    receiver::{MethodFn, ReceiverFn},
    signal,
};

pub mod prelude {
    pub use super::*;
}
