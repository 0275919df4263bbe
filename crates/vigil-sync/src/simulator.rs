//! Unreliable delivery for exercising the sync engine.
//!
//! Messages may be lost, duplicated or delivered out of order. Lost messages
//! stay around until `retransmit_lost` so tests can model a retrying
//! transport.

use std::collections::VecDeque;

/// Delivery fault probabilities.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Probability of message loss (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability of message duplication (0.0 - 1.0)
    pub dup_rate: f64,
    /// Probability of message reordering (0.0 - 1.0)
    pub reorder_rate: f64,
}

impl NetworkConfig {
    pub fn reliable() -> Self {
        Self::default()
    }

    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    pub fn with_dups(dup_rate: f64) -> Self {
        Self {
            dup_rate,
            ..Default::default()
        }
    }

    pub fn reordering(reorder_rate: f64) -> Self {
        Self {
            reorder_rate,
            ..Default::default()
        }
    }

    /// All three faults at once.
    pub fn chaotic() -> Self {
        Self {
            loss_rate: 0.1,
            dup_rate: 0.2,
            reorder_rate: 0.3,
        }
    }
}

/// An in-memory channel with configurable faults.
#[derive(Debug)]
pub struct NetworkSimulator<M> {
    in_flight: VecDeque<M>,
    lost: Vec<M>,
    config: NetworkConfig,
    /// LCG state; fixed seeds keep test runs reproducible.
    rng_state: u64,
}

impl<M: Clone> NetworkSimulator<M> {
    pub fn new(config: NetworkConfig) -> Self {
        Self::with_seed(config, 12345)
    }

    pub fn with_seed(config: NetworkConfig, seed: u64) -> Self {
        Self {
            in_flight: VecDeque::new(),
            lost: Vec::new(),
            config,
            rng_state: seed,
        }
    }

    fn next_random(&mut self) -> f64 {
        self.rng_state = self.rng_state.wrapping_mul(1103515245).wrapping_add(12345);
        ((self.rng_state >> 16) & 0x7fff) as f64 / 32768.0
    }

    pub fn send(&mut self, msg: M) {
        if self.next_random() < self.config.loss_rate {
            self.lost.push(msg);
            return;
        }

        if self.next_random() < self.config.dup_rate {
            self.in_flight.push_back(msg.clone());
        }

        if self.next_random() < self.config.reorder_rate && !self.in_flight.is_empty() {
            let pos = (self.next_random() * self.in_flight.len() as f64) as usize;
            self.in_flight.insert(pos.min(self.in_flight.len()), msg);
        } else {
            self.in_flight.push_back(msg);
        }
    }

    pub fn receive(&mut self) -> Option<M> {
        self.in_flight.pop_front()
    }

    /// Put every lost message back in flight.
    pub fn retransmit_lost(&mut self) {
        self.in_flight.extend(self.lost.drain(..));
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn lost_count(&self) -> usize {
        self.lost.len()
    }
}
