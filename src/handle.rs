use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::nonce::UNSET;
use crate::registry::{NonceRegistry, NonceSlot};

/// Per-key lazy accessor over the nonce registry.
///
/// The handle resolves its registry slot on the first read that finds the key
/// present. Until then every read reports [`UNSET`](crate::UNSET), and the
/// handle keeps retrying resolution so a key created later is picked up.
/// Once resolved, the slot is published through a `OnceCell` and all further
/// reads go through it without taking any lock.
pub struct NonceHandle {
    name: String,
    registry: Arc<dyn NonceRegistry>,
    slot: OnceCell<Arc<dyn NonceSlot>>,
}

impl NonceHandle {
    /// Creates an unresolved handle for `name`.
    pub fn new(registry: Arc<dyn NonceRegistry>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry,
            slot: OnceCell::new(),
        }
    }

    /// The nonce key this handle is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the current nonce.
    ///
    /// Returns [`UNSET`](crate::UNSET) while the key is absent, or when the
    /// stored value cannot be decoded.
    pub fn read(&self) -> i64 {
        if let Some(slot) = self.slot.get() {
            return slot.get_long(UNSET);
        }
        match self.registry.find(&self.name) {
            Some(slot) => {
                let value = slot.get_long(UNSET);
                // Two racing readers may both resolve; the slots are
                // interchangeable, so losing the publication race is fine.
                let _ = self.slot.set(slot);
                value
            }
            None => UNSET,
        }
    }
}
