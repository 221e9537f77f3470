//! Invalidation, corking, and the system-wide kill switch.
//!
//! The coordinator is the write side of the protocol: it owns the per-process
//! cork table and is the only component that publishes nonces into the
//! registry. Caches never write nonces; they only observe them.
//!
//! A burst of mutations is wrapped in [`cork`]/[`uncork`]: the first cork
//! knocks the key down to `UNSET` (putting every bound cache into bypass) and
//! suppresses intermediate invalidations, and the last uncork publishes one
//! fresh nonce so caches snap back into a clean session.

use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::nonce::{is_live, next_nonce, DISABLED, UNSET};
use crate::registry::{InProcessRegistry, NonceRegistry};

/// Serializes nonce writes and tracks outstanding corks per nonce key.
///
/// One coordinator per process is the intended deployment (see
/// [`InvalidationCoordinator::global`]); tests build their own over a private
/// registry to stay isolated.
///
/// All operations except [`disable_system_wide`](Self::disable_system_wide)
/// hold the cork lock for their entire duration, so per-process coordinator
/// operations are totally ordered.
pub struct InvalidationCoordinator {
    registry: Arc<dyn NonceRegistry>,
    corks: Mutex<HashMap<String, usize>>,
}

impl InvalidationCoordinator {
    /// Creates a coordinator writing through `registry`.
    pub fn new(registry: Arc<dyn NonceRegistry>) -> Self {
        Self {
            registry,
            corks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the process-global coordinator, bound to
    /// [`InProcessRegistry::global`].
    pub fn global() -> &'static Arc<InvalidationCoordinator> {
        static GLOBAL: Lazy<Arc<InvalidationCoordinator>> = Lazy::new(|| {
            Arc::new(InvalidationCoordinator::new(
                InProcessRegistry::global().clone(),
            ))
        });
        &GLOBAL
    }

    /// The registry this coordinator writes through.
    pub fn registry(&self) -> &Arc<dyn NonceRegistry> {
        &self.registry
    }

    /// Publishes a fresh nonce under `name`, invalidating every bound cache
    /// in every process on its next query.
    ///
    /// No-op while `name` is corked, and no-op if the registry holds
    /// `DISABLED` for `name`.
    pub fn invalidate(&self, name: &str) {
        let corks = self.corks.lock();
        self.invalidate_locked(&corks, name);
    }

    /// The invalidate body, with the cork lock already held.
    fn invalidate_locked(&self, corks: &HashMap<String, usize>, name: &str) {
        if corks.get(name).copied().unwrap_or(0) > 0 {
            debug!("invalidate of {name} suppressed: corked");
            return;
        }
        let current = self.registry.get_long(name, UNSET);
        if current == DISABLED {
            debug!("invalidate of {name} skipped: disabled");
            return;
        }
        let fresh = next_nonce();
        self.registry.set(name, &fresh.to_string());
        debug!("invalidated {name}: {current} -> {fresh}");
    }

    /// Takes a cork on `name`.
    ///
    /// On the 0 -> 1 transition a live registry value is overwritten with
    /// `UNSET`, forcing all caches bound to `name` into bypass for the
    /// duration of the cork.
    pub fn cork(&self, name: &str) {
        let mut corks = self.corks.lock();
        let count = corks.get(name).copied().unwrap_or(0);
        if count == 0 {
            let current = self.registry.get_long(name, UNSET);
            if is_live(current) {
                self.registry.set(name, &UNSET.to_string());
            }
            debug!("corked {name} (was {current})");
        }
        corks.insert(name.to_string(), count + 1);
    }

    /// Releases a cork on `name`. The final uncork publishes a fresh nonce
    /// so bound caches re-enable with a clean session.
    ///
    /// # Panics
    ///
    /// Panics on cork underflow: an `uncork` without a matching `cork` is a
    /// programming error and must not be silently ignored.
    pub fn uncork(&self, name: &str) {
        let mut corks = self.corks.lock();
        match corks.get(name).copied() {
            None | Some(0) => panic!("cork underflow: uncork of {name} without matching cork"),
            Some(1) => {
                corks.remove(name);
                debug!("uncorked {name}");
                self.invalidate_locked(&corks, name);
            }
            Some(count) => {
                corks.insert(name.to_string(), count - 1);
            }
        }
    }

    /// Takes a cork on `name` and returns a guard that releases it on drop.
    pub fn cork_guard(self: &Arc<Self>, name: &str) -> CorkGuard {
        self.cork(name);
        CorkGuard {
            coordinator: self.clone(),
            name: name.to_string(),
        }
    }

    /// Unconditionally writes `DISABLED` under `name`, turning off every
    /// bound cache system-wide. No later `invalidate` re-enables the key.
    ///
    /// Deliberately not gated by the cork lock: this is an administrative
    /// kill switch and must succeed even mid-cork.
    pub fn disable_system_wide(&self, name: &str) {
        self.registry.set(name, &DISABLED.to_string());
        warn!("disabled {name} system-wide");
    }
}

/// RAII cork over one nonce key; releases the cork when dropped.
///
/// # Examples
///
/// ```
/// use propcache::{InProcessRegistry, InvalidationCoordinator, NonceRegistry, UNSET};
/// use std::sync::Arc;
///
/// let registry = Arc::new(InProcessRegistry::new());
/// let coordinator = Arc::new(InvalidationCoordinator::new(registry.clone()));
/// coordinator.invalidate("k");
///
/// {
///     let _cork = coordinator.cork_guard("k");
///     coordinator.invalidate("k"); // suppressed
///     assert_eq!(registry.get_long("k", UNSET), UNSET);
/// }
/// // The guard's drop published a fresh nonce.
/// assert_ne!(registry.get_long("k", UNSET), UNSET);
/// ```
pub struct CorkGuard {
    coordinator: Arc<InvalidationCoordinator>,
    name: String,
}

impl Drop for CorkGuard {
    fn drop(&mut self) {
        self.coordinator.uncork(&self.name);
    }
}

/// Invalidates `name` via the process-global coordinator.
pub fn invalidate(name: &str) {
    InvalidationCoordinator::global().invalidate(name);
}

/// Corks `name` via the process-global coordinator.
pub fn cork(name: &str) {
    InvalidationCoordinator::global().cork(name);
}

/// Uncorks `name` via the process-global coordinator.
///
/// # Panics
///
/// Panics on cork underflow.
pub fn uncork(name: &str) {
    InvalidationCoordinator::global().uncork(name);
}

/// Disables `name` system-wide via the process-global coordinator.
pub fn disable_system_wide(name: &str) {
    InvalidationCoordinator::global().disable_system_wide(name);
}
