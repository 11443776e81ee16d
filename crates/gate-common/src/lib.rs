//! Gate Common - Shared types for the request gatekeeping core
//!
//! This crate provides the pieces every gate stage agrees on:
//! - Error taxonomy with HTTP status classes
//! - Clock abstraction (system and manual)
//! - Client identity (network key + header fingerprint)
//! - CIDR allowlists
//! - Caller roles

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allowlist;
pub mod client;
pub mod clock;
pub mod error;
pub mod role;

pub use allowlist::{AllowlistError, IpAllowlist};
pub use client::{ClientId, ClientMetadata};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GateError, GateResult};
pub use role::Role;

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counter for cache and gate statistics
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create new counter
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return previous value
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Get current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_counter() {
        let counter = AtomicCounter::new(0);
        assert_eq!(counter.inc(), 0);
        assert_eq!(counter.inc(), 1);
        assert_eq!(counter.get(), 2);
    }
}
