//! Opportunistic cleanup
//!
//! Idle buckets and failure records are removed on a random fraction of
//! requests instead of on a timer task.

use crate::store::LimitStore;
use gate_common::Clock;
use rand::Rng;
use tracing::{debug, warn};

/// Default share of requests that trigger a sweep
pub const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
pub struct Sweeper {
    probability: f64,
}

impl Sweeper {
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_finite() { probability.clamp(0.0, 1.0) } else { 0.0 };
        Self { probability }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Roll for this request
    pub fn should_run(&self) -> bool {
        rand::thread_rng().gen_bool(self.probability)
    }

    /// Sweep `store` if this request won the roll
    pub async fn maybe_sweep(&self, store: &dyn LimitStore, clock: &dyn Clock) -> Option<usize> {
        if !self.should_run() {
            return None;
        }
        match store.sweep(clock.now().timestamp_millis()).await {
            Ok(removed) => {
                debug!(removed, "limit store swept");
                Some(removed)
            }
            Err(e) => {
                warn!(error = %e, "limit store sweep failed");
                None
            }
        }
    }
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_PROBABILITY)
    }
}
