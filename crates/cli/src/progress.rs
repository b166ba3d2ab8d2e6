use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress display for the kind of work being done
#[derive(Debug, Clone, Copy)]
pub enum ProgressType {
    /// Single request against the org (query, describe)
    Request,
    /// Record-by-record load with a known total
    Records,
}

impl ProgressType {
    fn tick_interval(self) -> Duration {
        match self {
            ProgressType::Request => Duration::from_millis(80),
            ProgressType::Records => Duration::from_millis(120),
        }
    }

    pub fn create_spinner(self, message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(self.tick_interval());
        spinner
    }

    pub fn create_bar(self, total: u64, message: &str) -> ProgressBar {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(message.to_string());
        bar.enable_steady_tick(self.tick_interval());
        bar
    }
}
