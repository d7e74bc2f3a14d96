use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Keyed rendezvous between send tasks and the inbound ACK path.
///
/// Each entry is a single-slot signal: `trick` on a full slot or a missing
/// key is silently dropped, which is exactly what late or unknown ACKs
/// need.
#[derive(Debug, Default)]
pub struct PendingAcks {
    slots: Mutex<HashMap<String, Arc<Notify>>>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` and returns its signal handle. An existing entry for
    /// the same key is overwritten.
    pub fn put(
        &self,
        key: &str,
    ) -> Arc<Notify> {
        let signal = Arc::new(Notify::new());
        self.slots
            .lock()
            .unwrap()
            .insert(key.to_string(), signal.clone());
        signal
    }

    /// Delivers one non-blocking notification if `key` is registered.
    pub fn trick(
        &self,
        key: &str,
    ) {
        if let Some(signal) = self.slots.lock().unwrap().get(key) {
            signal.notify_one();
        }
    }

    pub fn delete(
        &self,
        key: &str,
    ) {
        self.slots.lock().unwrap().remove(key);
    }
}
