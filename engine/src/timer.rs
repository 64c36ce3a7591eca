use std::time::{Duration, Instant};

use crate::{EngineErr, Result};

const SECS_PER_DAY: u64 = 86_400;

/// Accumulated state of a `Timer`.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TimerState {
    pub total_time: Duration,
    pub count: usize,
}

impl TimerState {
    /// Returns the mean interval length, zero when nothing was measured.
    pub fn average(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_time / count,
            Err(_) => self.total_time.div_f64(self.count as f64),
        }
    }
}

/// Monotonic accumulator of sequential, non nested intervals.
#[derive(Debug, Default)]
pub struct Timer {
    start: Option<Instant>,
    state: TimerState,
}

impl Timer {
    /// Creates a new timer with no accumulated time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new interval.
    pub fn tic(&mut self) {
        self.start = Some(Instant::now());
    }

    /// Stops the running interval and accumulates it.
    ///
    /// # Returns
    /// The length of the interval just closed.
    ///
    /// # Errors
    /// `EngineErr::IllegalState` if there was no preceding `tic`.
    pub fn toc(&mut self) -> Result<Duration> {
        let start = self
            .start
            .take()
            .ok_or(EngineErr::IllegalState("toc called without a matching tic"))?;

        let elapsed = start.elapsed();
        self.state.total_time += elapsed;
        self.state.count += 1;
        Ok(elapsed)
    }

    pub fn total_time(&self) -> Duration {
        self.state.total_time
    }

    pub fn count(&self) -> usize {
        self.state.count
    }

    pub fn average_time(&self) -> Duration {
        self.state.average()
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Drops the accumulated time and any running interval.
    pub fn reset(&mut self) {
        self.start = None;
        self.state = TimerState::default();
    }
}

/// Renders a duration as `H:MM:SS`, adding `.ffffff` when there are leftover microseconds
/// and a `N day(s), ` prefix past 24 hours.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (days, rem) = (secs / SECS_PER_DAY, secs % SECS_PER_DAY);
    let (hours, mins, secs) = (rem / 3600, rem % 3600 / 60, rem % 60);

    let mut out = match days {
        0 => String::new(),
        1 => "1 day, ".to_string(),
        n => format!("{n} days, "),
    };

    out.push_str(&format!("{hours}:{mins:02}:{secs:02}"));

    let micros = duration.subsec_micros();
    if micros != 0 {
        out.push_str(&format!(".{micros:06}"));
    }

    out
}
