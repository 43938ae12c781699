//! Terminal rendering of pipeline events.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use lineage_core::events::{EventSink, PipelineEvent, TracingSink};
use std::io::IsTerminal;
use std::sync::Mutex;

/// Drives one progress bar per load label; everything else goes to the log.
pub struct ProgressSink {
    enabled: bool,
    current: Mutex<Option<(String, ProgressBar)>>,
    log: TracingSink,
}

impl ProgressSink {
    /// Bars are drawn only on an interactive stderr.
    pub fn new(show: bool) -> Self {
        Self {
            enabled: show && std::io::stderr().is_terminal(),
            current: Mutex::new(None),
            log: TracingSink,
        }
    }

    fn bar(label: &str, total: usize) -> ProgressBar {
        let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.cyan} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix(label.to_string());
        bar
    }

    fn advance(&self, label: &str, processed: usize, total: usize, message: String) {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let same = matches!(current.as_ref(), Some((l, _)) if l == label);
        if !same {
            if let Some((_, old)) = current.take() {
                old.finish_and_clear();
            }
            *current = Some((label.to_string(), Self::bar(label, total)));
        }
        if let Some((_, bar)) = current.as_ref() {
            bar.set_position(processed as u64);
            bar.set_message(message);
            if processed >= total {
                bar.finish_and_clear();
            }
        }
        if processed >= total {
            *current = None;
        }
    }
}

impl EventSink for ProgressSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::BatchWritten(p) if self.enabled => {
                let eta = p
                    .eta_secs
                    .map(|s| format!("eta {:.0}s", s))
                    .unwrap_or_default();
                self.advance(
                    &p.label,
                    p.processed,
                    p.total,
                    format!("{:.0}/s {}", p.batch_rate, eta),
                );
            }
            PipelineEvent::BatchFailed {
                label,
                processed,
                total,
                ..
            } if self.enabled => {
                self.advance(label, *processed, *total, "batch discarded".to_string());
                self.log.emit(event);
            }
            _ => self.log.emit(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_core::LoadProgress;
    use std::time::Duration;

    #[test]
    fn test_disabled_sink_only_logs() {
        let sink = ProgressSink::new(false);
        let progress = LoadProgress::compute(
            "nodes",
            10,
            20,
            10,
            Duration::from_millis(5),
            Duration::from_millis(5),
        );
        sink.emit(&PipelineEvent::BatchWritten(progress));
        assert!(sink.current.lock().unwrap().is_none());
    }
}
