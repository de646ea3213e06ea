//! Helpers shared by the unit tests

use parking_lot::Mutex;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

use crate::receiver::Receiver;
use crate::sender::SenderKey;

/// Install a tracing subscriber that writes through the test harness
///
/// Honors `RUST_LOG`; defaults to `relay=trace` so failing tests show the
/// registry activity that led up to them.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay=trace"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Collects the sender of every call made to its receivers
#[derive(Clone, Default)]
pub(crate) struct CallRecorder {
    calls: Arc<Mutex<Vec<SenderKey>>>,
}

impl CallRecorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A receiver that records each call and returns `value`
    pub(crate) fn receiver<P: 'static>(&self, value: i64) -> Receiver<P, i64> {
        let calls = self.calls.clone();
        Receiver::new(move |sender, _payload: &P| {
            calls.lock().push(sender.key());
            Ok(value)
        })
    }

    pub(crate) fn calls(&self) -> Vec<SenderKey> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.calls.lock().len()
    }
}
