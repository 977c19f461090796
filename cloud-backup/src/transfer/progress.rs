//! Byte-level progress reporting for uploads and downloads.
//!
//! Transfers report the running byte total to a [`ProgressObserver`]. The
//! console observer draws an `indicatif` bar and logs a throughput summary
//! when the transfer finishes.

use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Receives the cumulative number of bytes moved so far.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, bytes_transferred: u64);

    /// Called once after the last byte.
    fn finish(&self) {}
}

impl<F> ProgressObserver for F
where
    F: Fn(u64) + Send + Sync,
{
    fn on_progress(&self, bytes_transferred: u64) {
        self(bytes_transferred)
    }
}

/// Observer that ignores every update
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _bytes_transferred: u64) {}
}

/// Time-based throughput calculation for a single transfer
#[derive(Debug)]
pub struct ProgressTracker {
    start_time: Instant,
    total_bytes: u64,
    transferred_bytes: u64,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes,
            transferred_bytes: 0,
        }
    }

    pub fn update(&mut self, transferred_bytes: u64) {
        self.transferred_bytes = transferred_bytes;
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since start, in bytes/second
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Terminal progress bar labelled "<verb> <file name>".
pub struct ConsoleProgress {
    label: String,
    bar: ProgressBar,
    tracker: Mutex<ProgressTracker>,
}

impl ConsoleProgress {
    pub fn new(verb: &str, path: &Path, total_bytes: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let label = format!("{verb} {name}");

        let bar = ProgressBar::new(total_bytes);
        let style = ProgressStyle::default_bar()
            .template("{msg} {percent:>3}% [{wide_bar}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .map(|s| s.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(label.clone());

        Self {
            label,
            bar,
            tracker: Mutex::new(ProgressTracker::new(total_bytes)),
        }
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&self, bytes_transferred: u64) {
        self.bar.set_position(bytes_transferred);
        if let Ok(mut tracker) = self.tracker.lock() {
            tracker.update(bytes_transferred);
        }
    }

    fn finish(&self) {
        self.bar.finish();
        if let Ok(tracker) = self.tracker.lock() {
            debug!(
                "{}: {} of {} in {:.1}s ({})",
                self.label,
                format_bytes(tracker.transferred_bytes()),
                format_bytes(tracker.total_bytes()),
                tracker.elapsed().as_secs_f64(),
                format_speed(tracker.average_speed())
            );
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}
