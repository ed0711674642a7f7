//! Application clock
//!
//! A clock is bound to the platform's monotonic absolute time, expressed in
//! seconds. Callers sample the platform and feed the value in, which keeps
//! the type pure and testable.

/// Elapsed-time tracker driven by platform absolute time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    start_time: f64,
    /// Elapsed seconds since the last `start`, as of the last `update`.
    pub elapsed: f64,
}

impl Clock {
    /// Creates a stopped clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the clock at `now` and zeroes the elapsed time.
    pub fn start(&mut self, now: f64) {
        self.start_time = now;
        self.elapsed = 0.0;
    }

    /// Recomputes elapsed time. Has no effect on a stopped clock.
    pub fn update(&mut self, now: f64) {
        if self.start_time != 0.0 {
            self.elapsed = now - self.start_time;
        }
    }

    /// Stops the clock, leaving the elapsed value untouched.
    pub fn stop(&mut self) {
        self.start_time = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_start_zeroes_elapsed() {
        let mut clock = Clock::new();
        clock.start(10.0);
        clock.update(12.5);
        assert_relative_eq!(clock.elapsed, 2.5);

        clock.start(20.0);
        assert_relative_eq!(clock.elapsed, 0.0);
    }

    #[test]
    fn test_stop_preserves_elapsed() {
        let mut clock = Clock::new();
        clock.start(1.0);
        clock.update(4.0);
        clock.stop();
        assert_relative_eq!(clock.elapsed, 3.0);

        // updates after stop do nothing
        clock.update(100.0);
        assert_relative_eq!(clock.elapsed, 3.0);
    }

    #[test]
    fn test_update_before_start_is_noop() {
        let mut clock = Clock::new();
        clock.update(50.0);
        assert_relative_eq!(clock.elapsed, 0.0);
    }
}
