use std::{collections::VecDeque, num::NonZeroUsize};

/// Window length used when none is configured.
pub const DEFAULT_WINDOW_SIZE: NonZeroUsize = NonZeroUsize::new(20).unwrap();

/// Tracks a series of values, keeping a window of the most recent ones and running
/// totals over the whole history.
#[derive(Debug, Clone)]
pub struct SmoothedValue {
    window: VecDeque<f64>,
    capacity: NonZeroUsize,
    total: f64,
    count: usize,
}

impl SmoothedValue {
    /// Creates an empty series.
    ///
    /// # Arguments
    /// * `capacity` - The amount of recent values the window keeps.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity.get()),
            capacity,
            total: 0.0,
            count: 0,
        }
    }

    pub fn update(&mut self, value: f64) {
        if self.window.len() == self.capacity.get() {
            self.window.pop_front();
        }

        self.window.push_back(value);
        self.total += value;
        self.count += 1;
    }

    /// Mean of the values in the window.
    pub fn avg(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }

        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Lower median of the values in the window.
    pub fn median(&self) -> f64 {
        let mut sorted: Vec<_> = self.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        match sorted.len() {
            0 => 0.0,
            n => sorted[(n - 1) / 2],
        }
    }

    /// Mean over every value seen since creation.
    pub fn global_avg(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        self.total / self.count as f64
    }

    pub fn latest(&self) -> Option<f64> {
        self.window.back().copied()
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Default for SmoothedValue {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_forgets_old_values() {
        let mut value = SmoothedValue::default();
        (1..=25).for_each(|v| value.update(v as f64));

        // last 20 values are 6..=25
        assert_eq!(value.avg(), 15.5);
        assert_eq!(value.global_avg(), 13.0);
        assert_eq!(value.count(), 25);
        assert_eq!(value.total(), 325.0);
        assert_eq!(value.latest(), Some(25.0));
    }

    #[test]
    fn median_takes_the_lower_middle() {
        let mut value = SmoothedValue::new(NonZeroUsize::new(4).unwrap());
        [4.0, 1.0, 3.0, 2.0].into_iter().for_each(|v| value.update(v));
        assert_eq!(value.median(), 2.0);

        value.update(10.0);
        // window is now [1, 3, 2, 10]
        assert_eq!(value.median(), 2.0);
    }

    #[test]
    fn empty_series_is_zero() {
        let value = SmoothedValue::default();
        assert_eq!(value.avg(), 0.0);
        assert_eq!(value.median(), 0.0);
        assert_eq!(value.global_avg(), 0.0);
        assert_eq!(value.latest(), None);
    }
}
