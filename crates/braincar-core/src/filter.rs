//! Temporal filters over discrete values
//!
//! Two independent smoothing stages protect the vehicle from transient
//! misclassification:
//!
//! - [`MajorityFilter`]: majority vote over the last K values. Emits from
//!   the first value onward. Used on classifier labels.
//! - [`RunFilter`]: confirms a value only after N identical consecutive
//!   observations. Emits nothing until saturated. Used on received wire
//!   commands.
//!
//! They share a bounded FIFO but differ in eviction and evaluation policy,
//! so they are kept as separate types.

use std::collections::VecDeque;

// ============================================================================
// Majority vote
// ============================================================================

/// Majority-vote filter over the last `capacity` values.
///
/// Ties are broken in favour of the candidate whose latest occurrence is the
/// most recent.
#[derive(Clone, Debug)]
pub struct MajorityFilter<T> {
    window: VecDeque<T>,
    capacity: usize,
}

impl<T: PartialEq + Clone> MajorityFilter<T> {
    /// Create a filter voting over `capacity` values (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { window: VecDeque::with_capacity(capacity), capacity }
    }

    /// Push a value and return the current majority.
    pub fn smooth(&mut self, value: T) -> T {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value.clone());
        self.majority().unwrap_or(value)
    }

    /// Current majority without pushing, `None` before the first value.
    #[must_use]
    pub fn majority(&self) -> Option<T> {
        let mut best: Option<(&T, usize)> = None;

        // Newest first: a strictly greater count is needed to displace a
        // candidate, so ties resolve to the most recently seen value.
        for candidate in self.window.iter().rev() {
            if best.is_some_and(|(b, _)| b == candidate) {
                continue;
            }
            let count = self.window.iter().filter(|v| *v == candidate).count();
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((candidate, count));
            }
        }

        best.map(|(v, _)| v.clone())
    }

    /// Number of values currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether no value has been pushed since creation or the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Vote window size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.window.clear();
    }
}

// ============================================================================
// Consecutive-run confirmation
// ============================================================================

/// Debounce filter: confirms a value once the last `depth` observations are
/// identical.
///
/// Emission is edge-triggered. A run of `depth` identical values emits once;
/// further repeats stay silent until a different value has been confirmed or
/// the filter is reset.
#[derive(Clone, Debug)]
pub struct RunFilter<T> {
    window: VecDeque<T>,
    depth: usize,
    confirmed: Option<T>,
}

impl<T: PartialEq + Clone> RunFilter<T> {
    /// Create a filter requiring `depth` identical observations (minimum 1).
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self { window: VecDeque::with_capacity(depth), depth, confirmed: None }
    }

    /// Record an observation; returns the value if it just became confirmed.
    pub fn observe(&mut self, value: T) -> Option<T> {
        if self.window.len() == self.depth {
            self.window.pop_front();
        }
        self.window.push_back(value);

        if self.window.len() < self.depth {
            return None;
        }

        let first = self.window.front()?;
        if !self.window.iter().all(|v| v == first) {
            return None;
        }
        if self.confirmed.as_ref() == Some(first) {
            return None;
        }

        self.confirmed = Some(first.clone());
        self.confirmed.clone()
    }

    /// Last confirmed value since creation or reset.
    #[must_use]
    pub fn confirmed(&self) -> Option<&T> {
        self.confirmed.as_ref()
    }

    /// Required run length.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Clear observations and the confirmed value.
    pub fn reset(&mut self) {
        self.window.clear();
        self.confirmed = None;
    }
}
