//! Terminal progress dashboard

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use streamtide_core::config::DisplayConfig;
use streamtide_core::session::{SessionStatus, StreamSession};
use streamtide_core::streaming::{ProgressReporter, ProgressSample, format_bytes};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";
const SEPARATOR_WIDTH: usize = 61;

/// Samples session progress every refresh interval until `shutdown`.
///
/// Logs the stream URL once when playback readiness is first reached and
/// redraws the dashboard on each tick unless it is disabled.
pub async fn run(
    session: Arc<StreamSession>,
    stream_url: String,
    display: DisplayConfig,
    shutdown: CancellationToken,
) {
    let mut reporter = ProgressReporter::new();
    let mut ticker = tokio::time::interval(display.refresh_interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        let status = session.status();
        let sample = reporter.sample(status.completed_bytes, status.total_bytes, now - last_tick);
        last_tick = now;

        if session.became_ready() {
            tracing::info!("Stream ready at {}", stream_url);
            if !display.enabled {
                println!("Stream: {stream_url}");
            }
        }

        if display.enabled {
            let mut stdout = std::io::stdout().lock();
            let drawn = stdout
                .write_all(render(&status, &sample, &stream_url).as_bytes())
                .and_then(|()| stdout.flush());
            if let Err(e) = drawn {
                tracing::debug!("Dashboard write failed: {}", e);
            }
        }
    }
}

/// One full dashboard frame, starting with a clear-screen sequence.
pub fn render(status: &SessionStatus, sample: &ProgressSample, stream_url: &str) -> String {
    let mut frame = String::from(CLEAR_SCREEN);
    frame.push_str(&format!("{}\n", status.name));
    frame.push_str(&format!("{}\n", "=".repeat(SEPARATOR_WIDTH)));

    if status.ready {
        frame.push_str(&format!("Stream: \t{stream_url}\n"));
    }
    if status.completed_bytes > 0 {
        frame.push_str(&format!(
            "Progress: \t{} / {}  {:.2}%\n",
            format_bytes(status.completed_bytes),
            format_bytes(status.total_bytes),
            sample.percentage
        ));
    }
    if status.completed_bytes < status.total_bytes {
        frame.push_str(&format!("Download speed: {}\n", sample.speed()));
    }
    frame.push_str(&format!("Connections: \t{}\n", status.connections));
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(completed: u64, total: u64, ready: bool) -> SessionStatus {
        SessionStatus {
            name: "Big Buck Bunny".to_string(),
            total_bytes: total,
            completed_bytes: completed,
            connections: 4,
            ready,
        }
    }

    fn sample_for(status: &SessionStatus) -> ProgressSample {
        ProgressReporter::new().sample(
            status.completed_bytes,
            status.total_bytes,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_render_while_downloading() {
        let status = status(12_340_000, 100_000_000, true);
        let frame = render(&status, &sample_for(&status), "http://localhost:8080");

        assert!(frame.starts_with(CLEAR_SCREEN));
        let lines: Vec<&str> = frame[CLEAR_SCREEN.len()..].lines().collect();
        assert_eq!(lines[0], "Big Buck Bunny");
        assert_eq!(lines[1], "=".repeat(SEPARATOR_WIDTH));
        assert_eq!(lines[2], "Stream: \thttp://localhost:8080");
        assert_eq!(lines[3], "Progress: \t12 MB / 100 MB  12.34%");
        assert_eq!(lines[4], "Download speed: 12 MB/s");
        assert_eq!(lines[5], "Connections: \t4");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn test_render_before_anything_arrives() {
        let status = status(0, 0, false);
        let frame = render(&status, &sample_for(&status), "http://localhost:8080");

        assert!(!frame.contains("Stream:"));
        assert!(!frame.contains("Progress:"));
        assert!(!frame.contains("Download speed:"));
        assert!(frame.ends_with("Connections: \t4\n"));
    }

    #[test]
    fn test_render_when_complete() {
        let status = status(5_000, 5_000, true);
        let frame = render(&status, &sample_for(&status), "http://localhost:8080");

        assert!(frame.contains("Progress: \t5.0 kB / 5.0 kB  100.00%"));
        assert!(!frame.contains("Download speed:"));
    }
}
