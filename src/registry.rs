//! The nonce registry collaborator.
//!
//! The registry is the process-external map from nonce key to scalar that all
//! caches in all processes read and that invalidation writes. Real
//! deployments back it with whatever shared key/value facility the platform
//! offers; this crate only depends on the [`NonceRegistry`] trait and ships
//! [`InProcessRegistry`] as the reference implementation for tests and
//! single-process use.
//!
//! Values are stored as base-10 decimal strings; `"0"` and `"-1"` encode the
//! [`UNSET`](crate::UNSET) and [`DISABLED`](crate::DISABLED) sentinels. A
//! string that does not decode reads as the caller-supplied default.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

/// A resolved per-key accessor into the registry.
///
/// A slot reads the current value for one key without rehashing the name on
/// every read. Slots are handed out by [`NonceRegistry::find`] and cached by
/// [`NonceHandle`](crate::NonceHandle).
pub trait NonceSlot: Send + Sync {
    /// Returns the current value of the slot, or `default` if the stored
    /// string cannot be decoded.
    fn get_long(&self, default: i64) -> i64;
}

/// Contract of the process-external nonce registry.
///
/// Implementations are expected to serialize writers globally; readers only
/// need release/acquire visibility per key.
pub trait NonceRegistry: Send + Sync {
    /// Returns the current value under `name`, or `default` if the key is
    /// absent or does not decode.
    fn get_long(&self, name: &str, default: i64) -> i64;

    /// Overwrites the value under `name` with a base-10 decimal string,
    /// creating the key if needed.
    fn set(&self, name: &str, value: &str);

    /// Resolves a key once. Returns `None` if the key does not exist yet, so
    /// callers can retry resolution after the key appears.
    fn find(&self, name: &str) -> Option<Arc<dyn NonceSlot>>;
}

struct SlotCell {
    raw: RwLock<String>,
}

impl SlotCell {
    fn new(value: &str) -> Self {
        Self {
            raw: RwLock::new(value.to_string()),
        }
    }

    fn store(&self, value: &str) {
        *self.raw.write() = value.to_string();
    }
}

impl NonceSlot for SlotCell {
    fn get_long(&self, default: i64) -> i64 {
        self.raw.read().trim().parse().unwrap_or(default)
    }
}

/// In-process [`NonceRegistry`] backed by a concurrent map.
///
/// Each key owns one slot cell that lives for the registry's lifetime, so
/// slots resolved through [`find`](NonceRegistry::find) keep observing later
/// writes to the same key.
///
/// # Examples
///
/// ```
/// use propcache::{InProcessRegistry, NonceRegistry, UNSET};
///
/// let registry = InProcessRegistry::new();
/// assert_eq!(registry.get_long("net.devices", UNSET), UNSET);
///
/// registry.set("net.devices", "7");
/// assert_eq!(registry.get_long("net.devices", UNSET), 7);
/// ```
pub struct InProcessRegistry {
    slots: DashMap<String, Arc<SlotCell>>,
}

impl InProcessRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Returns the process-global registry instance.
    ///
    /// This is the registry behind the crate-level coordinator surface; all
    /// caches built without an explicit coordinator share it.
    pub fn global() -> &'static Arc<InProcessRegistry> {
        static GLOBAL: Lazy<Arc<InProcessRegistry>> =
            Lazy::new(|| Arc::new(InProcessRegistry::new()));
        &GLOBAL
    }
}

impl Default for InProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceRegistry for InProcessRegistry {
    fn get_long(&self, name: &str, default: i64) -> i64 {
        match self.slots.get(name) {
            Some(slot) => slot.get_long(default),
            None => default,
        }
    }

    fn set(&self, name: &str, value: &str) {
        let slot = self
            .slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SlotCell::new("")))
            .clone();
        slot.store(value);
    }

    fn find(&self, name: &str) -> Option<Arc<dyn NonceSlot>> {
        let slot: Arc<dyn NonceSlot> = self.slots.get(name)?.value().clone();
        Some(slot)
    }
}
