use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicI64, Ordering};

/// The nonce value of a key that is absent or freshly corked.
///
/// Caches bound to a key holding `UNSET` bypass their entries entirely and
/// answer every query through the recompute closure.
pub const UNSET: i64 = 0;

/// The nonce value of a key that has been administratively disabled.
///
/// Unlike [`UNSET`], a disabled key is never overwritten by invalidation;
/// only an explicit registry write can bring it back.
pub const DISABLED: i64 = -1;

/// Returns true if `nonce` is a live value rather than one of the two
/// reserved sentinels.
///
/// # Examples
///
/// ```
/// use propcache::{is_live, DISABLED, UNSET};
///
/// assert!(!is_live(UNSET));
/// assert!(!is_live(DISABLED));
/// assert!(is_live(42));
/// ```
#[inline]
pub fn is_live(nonce: i64) -> bool {
    nonce != UNSET && nonce != DISABLED
}

/// Process-global nonce source, seeded once from a random value.
///
/// Monotonicity across processes is not required; random seeding keeps
/// independent writers from colliding within one registry session.
static NEXT_NONCE: Lazy<AtomicI64> = Lazy::new(|| AtomicI64::new(fastrand::i64(..)));

/// Draws the next nonce from the process-global generator.
///
/// The generator increments by one per draw and skips the [`UNSET`] and
/// [`DISABLED`] sentinels.
pub fn next_nonce() -> i64 {
    loop {
        let nonce = NEXT_NONCE.fetch_add(1, Ordering::Relaxed);
        if is_live(nonce) {
            return nonce;
        }
    }
}
