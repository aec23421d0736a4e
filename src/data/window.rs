//! Bounded reading history for a single channel.

use std::collections::VecDeque;
use std::time::Duration;

use smokewatch_types::Reading;

use crate::error::WindowError;

/// Number of readings needed to cover `monitoring` when one arrives every
/// `sampling`.
///
/// The ratio is rounded half to even, like every other rounding here, so
/// 75s at 30s gives 2. Returns `None` when the sampling interval is zero or
/// the ratio rounds to less than one reading.
pub fn capacity_for(monitoring: Duration, sampling: Duration) -> Option<usize> {
    if sampling.is_zero() {
        return None;
    }
    let capacity = (monitoring.as_secs_f64() / sampling.as_secs_f64()).round_ties_even();
    if capacity < 1.0 {
        return None;
    }
    Some(capacity as usize)
}

/// A fixed-capacity buffer of the most recent readings, oldest first.
///
/// Readings are kept in arrival order; no reordering is attempted, so the
/// window assumes the broker delivers in publish order. Once full, every push
/// evicts the oldest reading.
#[derive(Debug, Clone)]
pub struct Window {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl Window {
    /// Create an empty window. A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading, returning the evicted one if the window was full.
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        let evicted = if self.readings.len() == self.capacity {
            self.readings.pop_front()
        } else {
            None
        };
        self.readings.push_back(reading);
        evicted
    }

    /// The earliest retained reading.
    pub fn oldest(&self) -> Result<&Reading, WindowError> {
        self.readings.front().ok_or(WindowError::Empty)
    }

    /// The most recently pushed reading.
    pub fn newest(&self) -> Result<&Reading, WindowError> {
        self.readings.back().ok_or(WindowError::Empty)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.readings.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(i: usize) -> Reading {
        Reading::new(format!("t{}", i), 200.0 + i as f64).unwrap()
    }

    #[test]
    fn test_capacity_for_sampling_cadence() {
        let half_minute = Duration::from_secs(30);
        assert_eq!(capacity_for(Duration::from_secs(150), half_minute), Some(5));
        assert_eq!(capacity_for(Duration::from_secs(600), half_minute), Some(20));
        // rounds to the nearest whole reading
        assert_eq!(capacity_for(Duration::from_secs(160), half_minute), Some(5));
    }

    #[test]
    fn test_capacity_for_ties_to_even() {
        let half_minute = Duration::from_secs(30);
        assert_eq!(capacity_for(Duration::from_secs(75), half_minute), Some(2));
        assert_eq!(capacity_for(Duration::from_secs(105), half_minute), Some(4));
        assert_eq!(capacity_for(Duration::from_secs(45), half_minute), Some(2));
        assert_eq!(capacity_for(Duration::from_secs(15), half_minute), None);
    }

    #[test]
    fn test_capacity_for_invalid() {
        assert_eq!(capacity_for(Duration::from_secs(60), Duration::ZERO), None);
        assert_eq!(
            capacity_for(Duration::from_secs(10), Duration::from_secs(30)),
            None
        );
    }

    #[test]
    fn test_push_below_capacity() {
        let mut window = Window::with_capacity(3);
        assert!(window.push(reading(0)).is_none());
        assert!(window.push(reading(1)).is_none());
        assert_eq!(window.len(), 2);
        assert!(!window.is_full());
        assert_eq!(window.oldest().unwrap(), &reading(0));
        assert_eq!(window.newest().unwrap(), &reading(1));
    }

    #[test]
    fn test_eviction_keeps_last_n_in_order() {
        let capacity = 5;
        for extra in 1..=7 {
            let mut window = Window::with_capacity(capacity);
            let mut evicted = Vec::new();
            for i in 0..capacity + extra {
                if let Some(old) = window.push(reading(i)) {
                    evicted.push(old);
                }
            }

            assert_eq!(window.len(), capacity);
            let kept: Vec<Reading> = window.iter().cloned().collect();
            let expected: Vec<Reading> = (extra..capacity + extra).map(reading).collect();
            assert_eq!(kept, expected);

            let expected_evicted: Vec<Reading> = (0..extra).map(reading).collect();
            assert_eq!(evicted, expected_evicted);
        }
    }

    #[test]
    fn test_empty_window() {
        let window = Window::with_capacity(5);
        assert!(window.is_empty());
        assert_eq!(window.oldest(), Err(WindowError::Empty));
        assert_eq!(window.newest(), Err(WindowError::Empty));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut window = Window::with_capacity(0);
        assert_eq!(window.capacity(), 1);
        window.push(reading(0));
        assert_eq!(window.push(reading(1)), Some(reading(0)));
        assert_eq!(window.oldest().unwrap(), window.newest().unwrap());
    }
}
