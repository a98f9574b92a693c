//! Sliding sample window
//!
//! Holds the most recent W samples. A snapshot is handed out only when the
//! window is full and the evaluation policy says this push is an evaluation
//! point.

use std::collections::VecDeque;
use std::sync::Arc;

use braincar_core::config::EvaluationPolicy;

/// Immutable copy of a full window, oldest sample first.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowSnapshot {
    samples: Arc<[f64]>,
    index: u64,
}

impl WindowSnapshot {
    /// Samples, oldest first
    #[must_use]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Zero-based count of snapshots emitted before this one
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false for emitted snapshots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Copy with every sample mapped through `f`.
    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self { samples: self.samples.iter().map(|&s| f(s)).collect(), index: self.index }
    }
}

/// Fixed-capacity FIFO of the most recent samples.
#[derive(Clone, Debug)]
pub struct WindowBuffer {
    buffer: VecDeque<f64>,
    capacity: usize,
    stride: usize,
    /// Pushes since the last emitted snapshot (or since the window filled)
    since_emit: usize,
    emitted: u64,
}

impl WindowBuffer {
    /// Create a window of `capacity` samples (minimum 1).
    #[must_use]
    pub fn new(capacity: usize, policy: EvaluationPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            stride: policy.stride(capacity),
            since_emit: 0,
            emitted: 0,
        }
    }

    /// Push one sample; returns a snapshot when this push is an evaluation
    /// point.
    ///
    /// The first snapshot is emitted on the push that fills the window. After
    /// that, one snapshot every `stride` pushes.
    pub fn push(&mut self, sample: f64) -> Option<WindowSnapshot> {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);

        if self.buffer.len() < self.capacity {
            return None;
        }

        let due = self.emitted == 0 || self.since_emit + 1 >= self.stride;
        if !due {
            self.since_emit += 1;
            return None;
        }

        self.since_emit = 0;
        let snapshot = WindowSnapshot {
            samples: self.buffer.iter().copied().collect(),
            index: self.emitted,
        };
        self.emitted += 1;
        Some(snapshot)
    }

    /// Whether W samples are held.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    /// Samples currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Window length W
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshots emitted so far
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Drop all samples and restart the evaluation schedule.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.since_emit = 0;
        self.emitted = 0;
    }
}
