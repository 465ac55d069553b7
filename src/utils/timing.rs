//! Wall-clock timing for CLI operations.

use log::{info, warn};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Timer {
    start_time: Instant,
    operation_name: String,
}

impl Timer {
    pub fn start(operation_name: &str) -> Self {
        Self {
            start_time: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Logs the total duration, warning when it exceeds `threshold`.
    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let total = self.start_time.elapsed();
        if total > threshold {
            warn!(
                "⚠️ {} took {}ms (exceeds threshold of {}ms)",
                self.operation_name,
                total.as_millis(),
                threshold.as_millis()
            );
        } else {
            info!("🕐 {} completed in {}ms", self.operation_name, total.as_millis());
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_measures_elapsed_time() {
        let timer = Timer::start("sleep");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed() >= Duration::from_millis(5));
        assert!(timer.finish_with_threshold(Duration::from_secs(60)) >= Duration::from_millis(5));
    }
}
