//! Progress bar driven by download events

use crate::output::format_bytes;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use resumio_types::DownloadEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Renders the events of one download
pub struct DownloadProgress {
    bar: ProgressBar,
    /// Offset the download started at; the bar counts from here
    start: u64,
}

impl DownloadProgress {
    pub fn new(label: &str, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };

        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ");
        bar.set_style(style);
        bar.set_message(label.to_string());

        Self { bar, start: 0 }
    }

    /// Consume events until the download ends or the sender goes away
    pub fn spawn(mut self, mut event_rx: broadcast::Receiver<DownloadEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        self.handle_event(&event);
                        if event.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Progress display skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => {
                        self.bar.finish_and_clear();
                        break;
                    }
                }
            }
        })
    }

    /// Update the bar from an event
    pub fn handle_event(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Started {
                offset,
                remaining,
                total_size,
                ..
            } => {
                self.start = *offset;
                let length = remaining.or_else(|| total_size.map(|t| t.saturating_sub(*offset)));
                if let Some(length) = length {
                    self.bar.set_length(length);
                }
                self.bar.set_position(0);
            }

            DownloadEvent::Progress { offset, .. } => {
                self.bar.set_position(offset.saturating_sub(self.start));
            }

            DownloadEvent::Resuming {
                attempt,
                offset,
                error,
                ..
            } => {
                self.bar.set_position(offset.saturating_sub(self.start));
                self.bar.println(format!(
                    "{} Resuming at {} (attempt {}): {}",
                    style("↻").yellow(),
                    format_bytes(*offset),
                    attempt,
                    error
                ));
            }

            DownloadEvent::Completed { offset, .. } => {
                self.bar.set_position(offset.saturating_sub(self.start));
                self.bar.finish_with_message(format!(
                    "{} Download complete",
                    style("✓").green().bold()
                ));
            }

            DownloadEvent::Failed { error, .. } => {
                self.bar.abandon_with_message(format!(
                    "{} Failed: {}",
                    style("✗").red().bold(),
                    error
                ));
            }

            DownloadEvent::Cancelled { .. } => {
                self.bar
                    .abandon_with_message(format!("{} Cancelled", style("○").dim()));
            }
        }
    }
}
