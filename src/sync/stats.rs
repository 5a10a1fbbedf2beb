//! Coordinator Statistics Module
//!
//! Tracks how fetch requests were served: by the network, by joining an
//! in-flight fetch, or from the mirror inside the rate-limit window.

use serde::Serialize;

// == Coordinator Stats ==
/// Fetch request counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    /// Requests that issued a network fetch
    pub fetches: u64,
    /// Requests that joined a fetch already in flight
    pub deduplicated: u64,
    /// Requests answered from the mirror without a fetch
    pub rate_limited: u64,
    /// Network fetches that completed with an error
    pub failures: u64,
}

impl CoordinatorStats {
    // == Constructor ==
    /// Creates a new CoordinatorStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Totals ==
    /// Total number of fetch requests seen.
    pub fn requests(&self) -> u64 {
        self.fetches + self.deduplicated + self.rate_limited
    }

    /// Share of requests that did not hit the network.
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn saved_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            0.0
        } else {
            (self.deduplicated + self.rate_limited) as f64 / total as f64
        }
    }

    // == Recorders ==
    pub fn record_fetch(&mut self) {
        self.fetches += 1;
    }

    pub fn record_deduplicated(&mut self) {
        self.deduplicated += 1;
    }

    pub fn record_rate_limited(&mut self) {
        self.rate_limited += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }
}
