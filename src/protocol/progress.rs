//! Progress sinks for remote side-band text
//!
//! Decouples the demultiplexer from how progress is shown (indicatif, raw
//! stderr, or nothing).

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

/// Receives channel-2 progress text from the remote
pub trait ProgressSink: Send + Sync {
    fn message(&self, text: &[u8]);

    /// Called once the fetch is over, whether or not it succeeded
    fn finish(&self) {}
}

/// Relays progress text verbatim to stderr
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn message(&self, text: &[u8]) {
        let _ = std::io::stderr().write_all(text);
    }
}

/// Indicatif spinner showing the latest remote progress line
pub struct SpinnerProgress(ProgressBar);

impl SpinnerProgress {
    pub fn new(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template(&format!("{{spinner:.green}} {}: {{wide_msg}}", label))
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        Self(pb)
    }
}

/// Last non-empty line of a chunk; git redraws progress with `\r`
fn last_line(text: &[u8]) -> Option<String> {
    text.split(|&b| b == b'\r' || b == b'\n')
        .rev()
        .find(|line| !line.is_empty())
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
}

impl ProgressSink for SpinnerProgress {
    fn message(&self, text: &[u8]) {
        if let Some(line) = last_line(text) {
            self.0.set_message(line);
        }
    }

    fn finish(&self) {
        self.0.finish_and_clear();
    }
}

/// Discards progress (tests and quiet mode)
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn message(&self, _text: &[u8]) {}
}

/// How the worker should surface remote progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Spinner,
    Raw,
    Quiet,
}

impl ProgressMode {
    pub fn sink(self, label: &str) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Spinner => Box::new(SpinnerProgress::new(label)),
            ProgressMode::Raw => Box::new(StderrProgress),
            ProgressMode::Quiet => Box::new(NoopProgress),
        }
    }
}
