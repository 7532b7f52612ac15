use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

use crate::ai::Transition;

/// Fixed-capacity ring buffer for storing training transitions.
pub struct ReplayBuffer {
    buffer: Vec<Transition>,
    capacity: usize,
    position: usize,
    rng: StdRng,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, seed: u64) -> Self {
        ReplayBuffer {
            buffer: Vec::with_capacity(capacity.min(4096)),
            capacity,
            position: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Add a transition to the buffer. Overwrites oldest when full.
    pub fn push(&mut self, transition: Transition) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() < self.capacity {
            self.buffer.push(transition);
        } else {
            self.buffer[self.position] = transition;
        }
        self.position = (self.position + 1) % self.capacity;
    }

    /// Sample a random batch into a pre-allocated Vec. Clears `out` first.
    pub fn sample_into(&mut self, batch_size: usize, out: &mut Vec<Transition>) {
        assert!(batch_size <= self.buffer.len(), "Not enough transitions to sample");
        let indices = index::sample(&mut self.rng, self.buffer.len(), batch_size);
        out.clear();
        out.extend(indices.iter().map(|i| self.buffer[i].clone()));
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.position = 0;
    }

    /// Contents in insertion order, oldest first.
    pub fn to_vec(&self) -> Vec<Transition> {
        if self.buffer.len() < self.capacity {
            return self.buffer.clone();
        }
        let mut out = Vec::with_capacity(self.buffer.len());
        out.extend_from_slice(&self.buffer[self.position..]);
        out.extend_from_slice(&self.buffer[..self.position]);
        out
    }

    /// Replace the contents, keeping only the newest `capacity` transitions.
    pub fn restore(&mut self, transitions: Vec<Transition>) {
        self.clear();
        let skip = transitions.len().saturating_sub(self.capacity);
        for t in transitions.into_iter().skip(skip) {
            self.push(t);
        }
    }
}
