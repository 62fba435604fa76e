//! Progress reporting for the command-line stages.
//!
//! Bars and spinners are hidden in log-only mode; periodic progress then
//! goes through `tracing` so output stays tail-friendly.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::info;

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// Progress bar with the shared style, hidden when `log_only` is set.
pub fn create_progress_bar(len: u64, msg: &str, log_only: bool) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if log_only {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} (ETA: {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Spinner for steps of unknown length, hidden when `log_only` is set.
pub fn create_spinner(msg: &str, log_only: bool) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if log_only {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        if let Ok(style) = ProgressStyle::default_spinner().template("{msg} {spinner} [{elapsed_precise}]") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Log progress every `interval` steps and at the last one.
pub fn log_progress(phase: &str, current: u64, total: u64, interval: u64) {
    if should_log(current, total, interval) {
        let pct = if total == 0 { 100.0 } else { 100.0 * current as f64 / total as f64 };
        info!(phase, current, total, "progress {:.1}%", pct);
    }
}

fn should_log(current: u64, total: u64, interval: u64) -> bool {
    current == total || (interval > 0 && current % interval == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
    }

    #[test]
    fn test_should_log() {
        assert!(should_log(10, 100, 10));
        assert!(!should_log(11, 100, 10));
        assert!(should_log(100, 100, 7));
        assert!(!should_log(3, 100, 0));
    }

    #[test]
    fn test_hidden_bar_tracks_position() {
        let pb = create_progress_bar(5, "Fetching", true);
        pb.inc(2);
        assert_eq!(pb.position(), 2);
        assert!(pb.is_hidden());
    }
}
