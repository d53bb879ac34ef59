//! Bounded, ordered sample storage with rolling statistics.

use crate::stats::{mean_f64, top_n_mean};
use std::collections::VecDeque;

/// An insertion-ordered sequence of samples, optionally capped.
///
/// A capped buffer keeps exactly the most recent `cap` samples, evicting
/// oldest-first, which bounds memory during long-running tests. An uncapped
/// buffer is unbounded for the duration of one run and reset at the start
/// of the next.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: VecDeque<f64>,
    cap: Option<usize>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that retains at most `cap` samples. `cap` must be >= 1.
    pub fn with_capacity(cap: usize) -> Self {
        assert!(cap >= 1, "sample buffer capacity must be at least 1");
        Self { samples: VecDeque::with_capacity(cap), cap: Some(cap) }
    }

    pub fn push(&mut self, value: f64) {
        if let Some(cap) = self.cap {
            while self.samples.len() >= cap {
                self.samples.pop_front();
            }
        }

        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All values in insertion order.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    /// The most recent `n` values, oldest first.
    pub fn recent(&self, n: usize) -> Vec<f64> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    /// Mean of the most recent `n` values.
    pub fn recent_mean(&self, n: usize) -> Option<f64> {
        mean_f64(&self.recent(n))
    }

    pub fn mean(&self) -> Option<f64> {
        mean_f64(&self.values())
    }

    pub fn max(&self) -> Option<f64> {
        self.samples
            .iter()
            .copied()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
    }

    /// Mean of the `n` largest values.
    pub fn top_n_mean(&self, n: usize) -> Option<f64> {
        top_n_mean(&self.values(), n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_buffer_yields_no_data() {
        let buffer = SampleBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.mean(), None);
        assert_eq!(buffer.max(), None);
        assert_eq!(buffer.top_n_mean(5), None);
        assert_eq!(buffer.recent_mean(5), None);
        assert!(buffer.recent(5).is_empty());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut buffer = SampleBuffer::new();
        buffer.push(3.0);
        buffer.push(1.0);
        buffer.push(2.0);
        assert_eq!(buffer.values(), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut buffer = SampleBuffer::with_capacity(3);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            buffer.push(v);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.values(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_recent_window() {
        let mut buffer = SampleBuffer::new();
        for v in [10.0, 20.0, 30.0, 40.0] {
            buffer.push(v);
        }
        assert_eq!(buffer.recent(2), vec![30.0, 40.0]);
        assert_eq!(buffer.recent_mean(2), Some(35.0));
        // Window larger than the buffer covers everything.
        assert_eq!(buffer.recent(10), vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_rolling_statistics() {
        let mut buffer = SampleBuffer::new();
        for v in [5.0, 50.0, 20.0] {
            buffer.push(v);
        }
        assert_eq!(buffer.mean(), Some(25.0));
        assert_eq!(buffer.max(), Some(50.0));
        assert_eq!(buffer.top_n_mean(2), Some(35.0));
        assert_eq!(buffer.top_n_mean(10), Some(25.0));
    }

    proptest! {
        /// Appending beyond capacity always yields exactly the N most
        /// recent values, oldest discarded first, for all N >= 1.
        #[test]
        fn eviction_keeps_exactly_n_most_recent(
            cap in 1usize..32,
            values in proptest::collection::vec(-1e6f64..1e6, 0..128),
        ) {
            let mut buffer = SampleBuffer::with_capacity(cap);
            for &v in &values {
                buffer.push(v);
            }

            let expected: Vec<f64> = values
                .iter()
                .copied()
                .skip(values.len().saturating_sub(cap))
                .collect();

            prop_assert_eq!(buffer.values(), expected);
            prop_assert!(buffer.len() <= cap);
        }
    }
}
