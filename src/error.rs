use thiserror::Error;

/// Boxed error type carried across the recompute/refresh boundary.
///
/// The cache does not interpret user-fetch failures; it propagates them and
/// leaves its entries untouched.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a [`query`](crate::PropertyCache::query).
///
/// Both variants wrap the error returned by the owner-supplied closure. The
/// query retry loop is for nonce races only; fetch failures are never retried
/// by the cache.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The recompute closure failed. Nothing was cached.
    #[error("recompute failed: {0}")]
    Recompute(#[source] BoxError),

    /// The refresh closure failed. The cached entry is unchanged.
    #[error("refresh failed: {0}")]
    Refresh(#[source] BoxError),
}
