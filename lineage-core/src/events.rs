//! Structured pipeline telemetry.
//!
//! Stages never print. They emit [`PipelineEvent`]s into an [`EventSink`]
//! supplied by the caller; the CLI renders them as log lines and progress
//! bars, tests record them.

use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clean::FilterOutcome;
use crate::loader::LoadProgress;

/// One observable step of a pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted {
        stage: String,
    },
    StageFinished {
        stage: String,
        success: bool,
        items: usize,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// A batch was written; carries the cumulative progress snapshot.
    BatchWritten(LoadProgress),
    /// A batch was rejected by the store and discarded.
    BatchFailed {
        label: String,
        offset: usize,
        size: usize,
        processed: usize,
        total: usize,
        error: String,
    },
    /// Deliberate throttling pause between batches.
    Paused {
        label: String,
        processed: usize,
        pause_ms: u64,
    },
    /// A record-level filter finished.
    FilterApplied(FilterOutcome),
    /// Non-fatal data quality finding.
    QualityWarning {
        stage: String,
        message: String,
    },
    /// An individually written relationship failed and was skipped.
    LinkSkipped {
        from: String,
        to: String,
        error: String,
    },
}

/// Receiver of pipeline events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Renders events as `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { stage } => info!(stage = %stage, "Stage started"),
            PipelineEvent::StageFinished {
                stage,
                success,
                items,
                duration_ms,
                detail,
            } => {
                if *success {
                    info!(stage = %stage, items, duration_ms, "Stage finished");
                } else {
                    warn!(
                        stage = %stage,
                        items,
                        duration_ms,
                        detail = detail.as_deref().unwrap_or(""),
                        "Stage failed"
                    );
                }
            }
            PipelineEvent::BatchWritten(p) => info!(
                "[{}] {}/{} ({:.1}%) batch {}ms, {:.0}/s, avg {:.0}/s, eta {}, elapsed {:.1}s",
                p.label,
                p.processed,
                p.total,
                p.percent,
                p.batch_ms,
                p.batch_rate,
                p.avg_rate,
                p.eta_secs
                    .map(|s| format!("{:.1}s", s))
                    .unwrap_or_else(|| "-".to_string()),
                p.elapsed_ms as f64 / 1000.0
            ),
            PipelineEvent::BatchFailed {
                label,
                offset,
                size,
                processed,
                total,
                error,
            } => warn!(
                "[{}] discarded batch at offset {} ({} records, progress {}/{}): {}",
                label, offset, size, processed, total, error
            ),
            PipelineEvent::Paused {
                label,
                processed,
                pause_ms,
            } => debug!("[{}] pausing {}ms after {} records", label, pause_ms, processed),
            PipelineEvent::FilterApplied(outcome) => {
                if outcome.removed > 0 {
                    info!(
                        "[{}] {}: removed {}/{} rows ({:.2}%)",
                        outcome.table,
                        outcome.filter,
                        outcome.removed,
                        outcome.before,
                        outcome.rate * 100.0
                    );
                    for sample in &outcome.samples {
                        debug!("[{}] {} dropped: {}", outcome.table, outcome.filter, sample);
                    }
                } else {
                    debug!("[{}] {}: no rows removed", outcome.table, outcome.filter);
                }
            }
            PipelineEvent::QualityWarning { stage, message } => {
                warn!(stage = %stage, "{}", message)
            }
            PipelineEvent::LinkSkipped { from, to, error } => {
                warn!("Skipped link {} -> {}: {}", from, to, error)
            }
        }
    }
}

/// Collects every event; used by tests and by callers that summarize afterwards.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &PipelineEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Forwards every event to two sinks.
pub struct Tee<'a> {
    first: &'a dyn EventSink,
    second: &'a dyn EventSink,
}

impl<'a> Tee<'a> {
    pub fn new(first: &'a dyn EventSink, second: &'a dyn EventSink) -> Self {
        Self { first, second }
    }
}

impl EventSink for Tee<'_> {
    fn emit(&self, event: &PipelineEvent) {
        self.first.emit(event);
        self.second.emit(event);
    }
}
