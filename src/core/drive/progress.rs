// Progress snapshots and the throttled reporter.
//
// The numbers here are pure functions of (bytes done, bytes total, elapsed
// seconds) so the same byte/time sequence always renders the same message.
// The reporter decides which of those messages reach the status channel,
// since an editable chat message has its own rate limits.

use std::sync::Arc;

use super::drive_ports::StatusChannel;
use super::formatting::{human_bytes, human_duration, human_rate};

/// Default spacing between status edits.
pub const DEFAULT_PROGRESS_INTERVAL_SECS: f64 = 15.0;

const BAR_SEGMENTS: u64 = 10;

/// Derived view of a transfer at one instant. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub elapsed_seconds: f64,
    /// Status tag, e.g. `[FILE - UPLOAD]`.
    pub label: String,
    /// Verb in the progress line, e.g. `Uploading`.
    pub verb: String,
    pub file_name: String,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.bytes_done == self.bytes_total
    }

    /// `bytes_done / bytes_total × 100`. An empty transfer is complete.
    pub fn percentage(&self) -> f64 {
        if self.bytes_total == 0 {
            return 100.0;
        }
        self.bytes_done as f64 / self.bytes_total as f64 * 100.0
    }

    /// Filled segments of the 10-segment bar (percentage floored to tens).
    pub fn filled_segments(&self) -> u64 {
        ((self.percentage() / 10.0).floor() as u64).min(BAR_SEGMENTS)
    }

    /// Average speed in bytes per second, rounded to 2 decimals.
    pub fn speed(&self) -> f64 {
        if self.elapsed_seconds <= 0.0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.elapsed_seconds * 100.0).round() / 100.0
    }

    /// Remaining bytes over the current average speed, rounded to whole seconds.
    /// `None` until some bytes have moved.
    pub fn eta_seconds(&self) -> Option<u64> {
        let speed = self.speed();
        if speed <= 0.0 {
            return None;
        }
        let remaining = self.bytes_total.saturating_sub(self.bytes_done) as f64;
        Some((remaining / speed).round() as u64)
    }

    pub fn bar(&self) -> String {
        let filled = self.filled_segments() as usize;
        format!(
            "{}{}",
            "●".repeat(filled),
            "○".repeat(BAR_SEGMENTS as usize - filled)
        )
    }

    /// The status message text.
    pub fn render(&self) -> String {
        let eta = self
            .eta_seconds()
            .map(human_duration)
            .unwrap_or_else(|| "-".to_string());
        format!(
            "`{label}`\n\n`{name}`\n`Status`\n`{verb}` | [{bar}] `{pct:.2}%`\n`{done} of {total} @ {speed}`\n`ETA` -> {eta}",
            label = self.label,
            name = self.file_name,
            verb = self.verb,
            bar = self.bar(),
            pct = self.percentage(),
            done = human_bytes(self.bytes_done),
            total = human_bytes(self.bytes_total),
            speed = human_rate(self.speed()),
        )
    }
}

/// Rate-limits progress edits for one transfer.
pub struct ProgressReporter {
    channel: Arc<dyn StatusChannel>,
    interval_secs: f64,
    last_message: Option<String>,
}

impl ProgressReporter {
    pub fn new(channel: Arc<dyn StatusChannel>, interval_secs: f64) -> Self {
        Self {
            channel,
            interval_secs: if interval_secs > 0.0 {
                interval_secs
            } else {
                DEFAULT_PROGRESS_INTERVAL_SECS
            },
            last_message: None,
        }
    }

    /// Emit on an interval boundary when the text changed, or always on completion.
    pub fn should_emit(&self, snapshot: &ProgressSnapshot, message: &str) -> bool {
        if snapshot.is_complete() {
            return true;
        }
        let on_boundary = (snapshot.elapsed_seconds % self.interval_secs).round() == 0.0;
        on_boundary && self.last_message.as_deref() != Some(message)
    }

    /// Offer a snapshot; returns whether an update was sent.
    ///
    /// Channel failures are logged and swallowed so a flaky chat edit never
    /// aborts a transfer.
    pub async fn observe(&mut self, snapshot: &ProgressSnapshot) -> bool {
        let message = snapshot.render();
        if !self.should_emit(snapshot, &message) {
            return false;
        }

        if let Err(e) = self.channel.update(&message).await {
            tracing::warn!(file = %snapshot.file_name, "Failed to update status message: {}", e);
        }
        self.last_message = Some(message);
        true
    }

    /// Free-form status line (e.g. "Processing upload..."). Bypasses throttling.
    pub async fn announce(&mut self, text: &str) {
        if let Err(e) = self.channel.update(text).await {
            tracing::warn!("Failed to update status message: {}", e);
        }
        self.last_message = Some(text.to_string());
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }
}
