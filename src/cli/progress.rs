//! CLI-specific progress handling for butterfly-compare
//!
//! Counts finished (backend, pair, mode) units on stderr so stdout stays
//! reserved for result rows.

use std::sync::Arc;

use butterfly_compare::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg} ETA: {eta}";

/// Creates a progress bar counting units of work
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    pub fn new(total: u64, message: &str) -> Self {
        let pb = create_progress_bar(total);
        pb.set_message(message.to_string());
        Self { pb }
    }

    /// Callback for [`butterfly_compare::Session::with_progress`]
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.pb.clone();
        Arc::new(move |done, total| {
            if pb.length().unwrap_or(0) != total {
                pb.set_length(total);
            }
            pb.set_position(done);
        })
    }

    pub fn finish(&self, message: &str) {
        self.pb.finish_with_message(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar_template() {
        let pb = create_progress_bar(12);
        assert_eq!(pb.length().unwrap(), 12);
        pb.set_position(3);
        pb.finish();
    }

    #[test]
    fn test_callback_tracks_units() {
        let manager = ProgressManager::new(0, "compare");
        let callback = manager.callback();
        callback(4, 10);
        assert_eq!(manager.pb.length().unwrap(), 10);
        assert_eq!(manager.pb.position(), 4);
    }
}
