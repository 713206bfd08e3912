//! Engine selection inside a bind group.
//!
//! Round-robin keeps one atomic ticket counter per group; random selection
//! draws uniformly, or through a `WeightedIndex` when weights differ.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use tracing::trace;

use super::{Engine, EngineGroup};
use crate::config::Strategy;
use crate::core::{Result, RouterError};
use std::sync::Arc;

/// Per-group selection state
#[derive(Debug)]
pub(crate) struct Rotation {
    /// Round-robin ticket counter, shared by every caller of this pool
    cursor: AtomicUsize,
    /// Running weight totals; `None` when all weights are equal
    cumulative: Option<Vec<u64>>,
    weighted: Option<WeightedIndex<u32>>,
}

impl Rotation {
    pub(crate) fn new(weights: &[u32]) -> Result<Self> {
        let uniform = weights.windows(2).all(|w| w[0] == w[1]);
        if uniform {
            return Ok(Self {
                cursor: AtomicUsize::new(0),
                cumulative: None,
                weighted: None,
            });
        }

        let cumulative = weights
            .iter()
            .scan(0u64, |total, w| {
                *total += u64::from(*w);
                Some(*total)
            })
            .collect();
        let weighted = WeightedIndex::new(weights.iter().copied())
            .map_err(|e| RouterError::Configuration(format!("invalid weights {:?}: {}", weights, e)))?;

        Ok(Self {
            cursor: AtomicUsize::new(0),
            cumulative: Some(cumulative),
            weighted: Some(weighted),
        })
    }

    fn next_round_robin(&self, len: usize) -> usize {
        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed);
        match &self.cumulative {
            None => ticket % len,
            Some(cumulative) => {
                let total = cumulative.last().copied().unwrap_or(1);
                let slot = (ticket as u64) % total;
                cumulative.partition_point(|&bound| bound <= slot)
            }
        }
    }

    fn next_random<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> usize {
        match &self.weighted {
            Some(weighted) => weighted.sample(rng),
            None => rng.gen_range(0..len),
        }
    }

    pub(crate) fn tickets(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

impl EngineGroup {
    /// Pick one engine using the given strategy
    ///
    /// A single-engine group returns that engine without touching the
    /// round-robin counter.
    pub fn select(&self, strategy: Strategy) -> &Arc<Engine> {
        self.select_with_rng(strategy, &mut rand::thread_rng())
    }

    /// Same as [`select`](Self::select) with a caller-supplied random source
    pub fn select_with_rng<R: Rng + ?Sized>(&self, strategy: Strategy, rng: &mut R) -> &Arc<Engine> {
        let engines = self.engines();
        if engines.len() == 1 {
            return &engines[0];
        }

        let index = match strategy {
            Strategy::RoundRobin => self.rotation.next_round_robin(engines.len()),
            Strategy::Random => self.rotation.next_random(engines.len(), rng),
        };

        let engine = &engines[index];
        trace!(group = %self.name(), engine = %engine.name(), ?strategy, "selected engine");
        engine
    }

    /// Number of round-robin tickets handed out so far
    pub fn tickets(&self) -> usize {
        self.rotation.tickets()
    }
}
