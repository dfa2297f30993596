//! Download progress sampling and byte formatting.

use std::time::Duration;

/// One observation of aggregate download progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub completed: u64,
    pub total: u64,
    /// Completion percentage, 0 when the total is unknown
    pub percentage: f64,
    /// Bytes per second since the previous sample
    pub throughput: f64,
}

impl ProgressSample {
    /// Whether every byte has been downloaded.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }

    /// Throughput rendered as `"<size>/s"`.
    pub fn speed(&self) -> String {
        format!("{}/s", format_bytes(self.throughput as u64))
    }
}

/// Derives throughput from successive bytes-completed samples.
///
/// Only the previous sample is retained. The first sample measures from
/// zero, so it reports everything downloaded so far as one interval.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    previous: u64,
}

impl ProgressReporter {
    /// Creates a reporter with no prior sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `completed` out of `total` bytes observed `interval` after
    /// the previous sample.
    pub fn sample(&mut self, completed: u64, total: u64, interval: Duration) -> ProgressSample {
        let delta = completed.saturating_sub(self.previous);
        self.previous = completed;

        let seconds = interval.as_secs_f64();
        let throughput = if seconds > 0.0 {
            delta as f64 / seconds
        } else {
            0.0
        };
        let percentage = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        ProgressSample {
            completed,
            total,
            percentage,
            throughput,
        }
    }
}

/// Formats a byte count in SI units, e.g. `"512 B"`, `"1.2 MB"`, `"83 MB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 10 {
        return format!("{bytes} B");
    }

    let exponent = ((bytes as f64).log10() / 3.0).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1000f64.powi(exponent as i32);
    // Round to one decimal first so 9.96 renders as "10 kB", not "10.0 kB"
    let value = (value * 10.0).round() / 10.0;

    if value < 10.0 {
        format!("{value:.1} {}", UNITS[exponent])
    } else {
        format!("{value:.0} {}", UNITS[exponent])
    }
}
