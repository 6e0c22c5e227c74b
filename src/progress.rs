/*!
 * Progress display for batch workflows
 */

use indicatif::{ProgressBar, ProgressStyle};
use scanlink_core_interface::PrepareStatus;

/// Progress bar over the items of one batch.
///
/// Hidden when progress display is disabled, so callers update it
/// unconditionally.
pub struct BatchProgress {
    bar: ProgressBar,
}

impl BatchProgress {
    pub fn new(total: usize, show_progress: bool) -> Self {
        let bar = if show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg:<10} [{bar:40.cyan/blue}] {pos}/{len} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        Self { bar }
    }

    /// Switch to a new phase, resetting the position
    pub fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
        self.bar.set_position(0);
    }

    pub fn inc(&self) {
        self.bar.inc(1);
    }

    /// Reflect a prepare notification
    pub fn prepare_status(&self, status: &PrepareStatus) {
        self.bar.set_position(status.processed() as u64);
        if status.failed_count > 0 {
            self.bar
                .set_message(format!("preparing ({} failed)", status.failed_count));
        }
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}
