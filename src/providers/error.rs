//! Typed provider errors.
//!
//! Adapters normalize every transport- or provider-specific failure into one
//! of these classes; nothing provider-shaped escapes the adapter boundary.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Provider signalled quota or rate-limit exhaustion.
    #[error("rate limited")]
    RateLimit,
    /// Credentials rejected. Fatal for the provider for the rest of the cycle.
    #[error("authentication rejected")]
    Auth,
    /// 5xx or equivalent provider-side failure.
    #[error("server error: {0}")]
    Server(String),
    #[error("request timed out")]
    Timeout,
    /// Token unknown to the provider. Not a failure in the breaker sense.
    #[error("not found")]
    NotFound,
    /// Response arrived but could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),
    /// The cycle budget expired while the call was in flight.
    #[error("cancelled")]
    Cancelled,
    /// The circuit breaker refused the call.
    #[error("circuit open for {0}")]
    CircuitOpen(String),
}

impl ProviderError {
    /// Only server-side trouble counts toward tripping the breaker.
    #[inline]
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit | ProviderError::Server(_) | ProviderError::Timeout
        )
    }
}
