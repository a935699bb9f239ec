//! Single-line progress display for a running dispatch.
//!
//! The ticker task owns the terminal line: it repaints elapsed time and the
//! current activity on a timer. Output lines only update shared state, so
//! raw agent text never reaches the terminal through here.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::queue;
use tokio::task::JoinHandle;

use crate::workspace::bootstrap::{parse_marker, MarkerKind};

const SPINNER: &[char] = &['|', '/', '-', '\\'];

/// Activity implied by a line of agent output, if recognisable.
pub fn activity_for(line: &str) -> Option<&'static str> {
    let line = line.trim();
    let lower = line.to_ascii_lowercase();
    if lower.starts_with("switched to a new branch") || lower.contains("checkout -b") {
        Some("Creating feature branch")
    } else if lower.contains("git commit") || (line.starts_with('[') && lower.contains("] ")) {
        Some("Committing changes")
    } else if lower.contains("git push") {
        Some("Pushing branch")
    } else if lower.contains("gh pr create") || lower.contains("/pull/") {
        Some("Opening pull request")
    } else if ["npm test", "npm run", "cargo test", "cargo clippy", "pytest", "pnpm ", "yarn "]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        Some("Running quality checks")
    } else {
        None
    }
}

#[derive(Debug)]
struct ProgressState {
    activity: String,
    lines_seen: usize,
    failed_step: Option<String>,
}

/// Progress shared between the stream consumer and the ticker.
#[derive(Clone)]
pub struct Progress {
    state: Arc<Mutex<ProgressState>>,
    started: Instant,
    interactive: bool,
}

impl Progress {
    pub fn new(interactive: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProgressState {
                activity: "Starting".to_string(),
                lines_seen: 0,
                failed_step: None,
            })),
            started: Instant::now(),
            interactive,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_activity(&self, activity: &str) {
        let mut state = self.lock();
        if state.activity != activity {
            tracing::debug!(activity, "Progress");
            state.activity = activity.to_string();
        }
    }

    /// Feed one output line.
    pub fn observe(&self, line: &str) {
        tracing::debug!(target: "spindle::agent_output", "{line}");
        self.lock().lines_seen += 1;

        if let Some(marker) = parse_marker(line) {
            match marker.kind {
                MarkerKind::Begin => self.set_activity(marker.label()),
                MarkerKind::Ok => {}
                MarkerKind::Failed => {
                    tracing::debug!(step = %marker.step, "Bootstrap step failed");
                    self.lock().failed_step = Some(marker.step);
                }
            }
        } else if let Some(activity) = activity_for(line) {
            self.set_activity(activity);
        }
    }

    pub fn activity(&self) -> String {
        self.lock().activity.clone()
    }

    pub fn failed_step(&self) -> Option<String> {
        self.lock().failed_step.clone()
    }

    pub fn lines_seen(&self) -> usize {
        self.lock().lines_seen
    }

    fn render_line(&self, tick: usize) -> String {
        let elapsed = self.started.elapsed().as_secs();
        let state = self.lock();
        format!(
            "{} {} [{:02}:{:02}] {} lines",
            SPINNER[tick % SPINNER.len()],
            state.activity,
            elapsed / 60,
            elapsed % 60,
            state.lines_seen
        )
    }

    fn paint(&self, text: &str) {
        let mut err = std::io::stderr();
        let _ = queue!(err, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(text));
        let _ = err.flush();
    }

    /// Start repainting on `interval`. A no-op task when not interactive.
    pub fn spawn_ticker(&self, interval: Duration) -> Ticker {
        if !self.interactive {
            return Ticker { handle: None };
        }
        let progress = self.clone();
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            let mut tick = 0usize;
            loop {
                timer.tick().await;
                progress.paint(&progress.render_line(tick));
                tick = tick.wrapping_add(1);
            }
        });
        Ticker {
            handle: Some(handle),
        }
    }

    /// Stop painting and leave a final line.
    pub fn finish(&self, ticker: Ticker, message: &str) {
        ticker.stop();
        if self.interactive {
            self.paint(message);
            eprintln!();
        }
    }
}

pub struct Ticker {
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn stop(self) {
        if let Some(handle) = self.handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_for_known_lines() {
        assert_eq!(
            activity_for("Switched to a new branch 'feat/x'"),
            Some("Creating feature branch")
        );
        assert_eq!(activity_for("[feat/x 1a2b3c4] fix it"), Some("Committing changes"));
        assert_eq!(activity_for("$ git push -u origin feat/x"), Some("Pushing branch"));
        assert_eq!(
            activity_for("https://github.com/a/b/pull/3"),
            Some("Opening pull request")
        );
        assert_eq!(activity_for("Running cargo test --all"), Some("Running quality checks"));
        assert_eq!(activity_for("Thinking about the problem"), None);
    }

    #[test]
    fn test_markers_drive_activity_and_failure() {
        let progress = Progress::new(false);
        progress.observe("::spindle-step::fetch-branch::begin");
        assert_eq!(progress.activity(), "Fetching working branch");

        progress.observe("fatal: couldn't find remote ref staging");
        progress.observe("::spindle-step::fetch-branch::failed");
        assert_eq!(progress.failed_step().as_deref(), Some("fetch-branch"));
        assert_eq!(progress.lines_seen(), 3);
    }

    #[test]
    fn test_render_line_shape() {
        let progress = Progress::new(false);
        progress.set_activity("Agent working");
        let line = progress.render_line(1);
        assert!(line.starts_with("/ Agent working [00:0"));
        assert!(line.ends_with("0 lines"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stream_updates_stay_below_default_log_level() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let progress = Progress::new(true);
            progress.observe("::spindle-step::run-agent::begin");
            progress.observe("Switched to a new branch 'feat/x'");
            progress.observe("::spindle-step::run-agent::failed");
        });

        assert!(captured.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_interactive_ticker_is_inert() {
        let progress = Progress::new(false);
        let ticker = progress.spawn_ticker(Duration::from_millis(10));
        assert!(ticker.handle.is_none());
        progress.finish(ticker, "done");
    }
}
