use std::{collections::HashMap, fmt, num::NonZeroUsize};

use super::{DEFAULT_WINDOW_SIZE, SmoothedValue};

/// Keeps a `SmoothedValue` per metric name and renders all of them in a single line.
///
/// Metrics are rendered in the order they were first updated.
#[derive(Debug, Clone)]
pub struct MetricLogger {
    meters: Vec<(String, SmoothedValue)>,
    index: HashMap<String, usize>,
    window_size: NonZeroUsize,
    delimiter: String,
}

impl MetricLogger {
    /// Creates a new logger with the default window size.
    ///
    /// # Arguments
    /// * `delimiter` - The separator placed between rendered metrics.
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self::with_window(delimiter, DEFAULT_WINDOW_SIZE)
    }

    /// Creates a new logger.
    ///
    /// # Arguments
    /// * `delimiter` - The separator placed between rendered metrics.
    /// * `window_size` - The window length of every tracked metric.
    pub fn with_window(delimiter: impl Into<String>, window_size: NonZeroUsize) -> Self {
        Self {
            meters: Vec::new(),
            index: HashMap::new(),
            window_size,
            delimiter: delimiter.into(),
        }
    }

    /// Records `value` under `key`, tracking the key from now on if it's new.
    pub fn update(&mut self, key: &str, value: f64) {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => {
                let idx = self.meters.len();
                self.meters
                    .push((key.to_string(), SmoothedValue::new(self.window_size)));
                self.index.insert(key.to_string(), idx);
                idx
            }
        };

        self.meters[idx].1.update(value);
    }

    /// Records every `(key, value)` pair of `values`.
    pub fn update_many<'k, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (&'k str, f64)>,
    {
        for (key, value) in values {
            self.update(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&SmoothedValue> {
        self.index.get(key).map(|&idx| &self.meters[idx].1)
    }

    /// The tracked keys in first-update order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.meters.iter().map(|(key, _)| key.as_str())
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Renders every metric as `key: windowed (global)`.
    pub fn format(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MetricLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, meter)) in self.meters.iter().enumerate() {
            if i > 0 {
                f.write_str(&self.delimiter)?;
            }

            write!(f, "{key}: {:.4} ({:.4})", meter.avg(), meter.global_avg())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_two_updates() {
        let mut logger = MetricLogger::new("  ");
        logger.update("x", 1.0);
        logger.update("x", 3.0);

        let x = logger.get("x").unwrap();
        assert_eq!(x.avg(), 2.0);
        assert_eq!(x.global_avg(), 2.0);
    }

    #[test]
    fn window_covers_the_last_twenty() {
        let mut logger = MetricLogger::new("  ");
        (0..25).for_each(|i| logger.update("x", if i < 5 { 100.0 } else { 1.0 }));

        let x = logger.get("x").unwrap();
        assert_eq!(x.avg(), 1.0);
        assert_eq!(x.global_avg(), (5.0 * 100.0 + 20.0) / 25.0);
    }

    #[test]
    fn renders_in_insertion_order() {
        let mut logger = MetricLogger::new(" | ");
        logger.update_many([("b", 1.0), ("a", 2.0)]);
        logger.update("c", 0.5);
        logger.update("b", 3.0);

        assert_eq!(logger.keys().collect::<Vec<_>>(), ["b", "a", "c"]);
        assert_eq!(
            logger.format(),
            "b: 2.0000 (2.0000) | a: 2.0000 (2.0000) | c: 0.5000 (0.5000)"
        );
    }

    #[test]
    fn keys_may_vary_between_updates() {
        let mut logger = MetricLogger::with_window(",", NonZeroUsize::new(2).unwrap());
        logger.update("loss", 4.0);
        logger.update_many([("loss", 2.0), ("extra", 1.0)]);
        logger.update("loss", 0.0);

        assert_eq!(logger.get("loss").unwrap().avg(), 1.0);
        assert_eq!(logger.get("loss").unwrap().global_avg(), 2.0);
        assert_eq!(logger.get("extra").unwrap().count(), 1);
        assert!(logger.get("missing").is_none());
    }

    #[test]
    fn empty_logger_renders_nothing() {
        assert_eq!(MetricLogger::new("  ").to_string(), "");
    }
}
