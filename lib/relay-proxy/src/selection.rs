//! Endpoint selection strategies for relayed requests

use rand::Rng;
use relay_core::Endpoint;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Round-robin: rotate through active endpoints in registry order.
    /// Deterministic, so callers get even distribution across endpoints.
    RoundRobin,
    /// Uniform random pick among active endpoints.
    Random,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::RoundRobin
    }
}

/// Selector over the registry's endpoints, skipping Unreachable ones.
pub struct EndpointSelector {
    strategy: SelectionStrategy,
    round_robin_counter: AtomicUsize,
}

impl EndpointSelector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Select an active endpoint, or None when none are usable.
    pub fn select<'a>(&self, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint> {
        let active: Vec<&'a Endpoint> = endpoints.iter().filter(|e| e.is_active()).collect();
        if active.is_empty() {
            return None;
        }

        match self.strategy {
            SelectionStrategy::RoundRobin => {
                let current = self.round_robin_counter.fetch_add(1, Ordering::SeqCst);
                active.get(current % active.len()).copied()
            }
            SelectionStrategy::Random => {
                let index = rand::thread_rng().gen_range(0..active.len());
                active.get(index).copied()
            }
        }
    }
}

impl Default for EndpointSelector {
    fn default() -> Self {
        Self::new(SelectionStrategy::default())
    }
}
