//! Field cleaning.
//!
//! A [`CleaningPlan`] maps raw source columns onto target fields and classifies
//! each one as datetime, numeric, string or special-null. [`FieldCleaner`]
//! applies the plan row by row, then runs the record-level filters in a fixed
//! order:
//!
//! 1. negative numeric values
//! 2. control characters / `@` anywhere in the row
//! 3. illegal process identifiers
//! 4. short process identifiers
//! 5. start time after end time
//!
//! Every stage reports its removed count, so
//! `input_rows == output_rows + Σ removed` always holds.

mod datetime;
mod filters;
pub mod presets;

pub use datetime::{
    clean_datetime, known_time, parse_cleaned, parse_datetime, DATETIME_FORMAT, UNKNOWN_TIME,
};
pub use filters::{
    is_legal_identifier, IllegalPattern, ILLEGAL_PATTERNS, MAX_PROCESS_LEN, MIN_PROCESS_LEN,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{EventSink, PipelineEvent};
use crate::record::{Cell, Record, Table};

/// Placeholder tokens normalized by special-null fields.
pub const NULL_PLACEHOLDERS: [&str; 8] = ["", "nan", "None", "NULL", "*", "null", "NaN", "NAN"];

/// Canonical marker for placeholder values.
pub const NULL_MARKER: &str = "NULL";

/// Default minimum length a process identifier must exceed.
pub const DEFAULT_MIN_PROCESS_LEN: usize = 5;

/// How a mapped field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Datetime,
    Numeric,
    String,
    SpecialNull,
}

/// One `source → target` mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub source: String,
    /// Defaults to `source`.
    #[serde(default)]
    pub target: Option<String>,
    pub kind: FieldKind,
    /// Round numeric values to 3 decimals.
    #[serde(default)]
    pub round: bool,
}

impl FieldRule {
    pub fn new(source: &str, kind: FieldKind) -> Self {
        Self {
            source: source.to_string(),
            target: None,
            kind,
            round: false,
        }
    }

    pub fn datetime(source: &str) -> Self {
        Self::new(source, FieldKind::Datetime)
    }

    pub fn numeric(source: &str) -> Self {
        Self::new(source, FieldKind::Numeric)
    }

    pub fn string(source: &str) -> Self {
        Self::new(source, FieldKind::String)
    }

    pub fn special_null(source: &str) -> Self {
        Self::new(source, FieldKind::SpecialNull)
    }

    pub fn renamed(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn rounded(mut self) -> Self {
        self.round = true;
        self
    }

    pub fn target_name(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.source)
    }
}

/// Start/end target fields compared by the time-logic filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCheck {
    pub start: String,
    pub end: String,
}

/// Declarative cleaning rules for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningPlan {
    pub table: String,
    pub fields: Vec<FieldRule>,
    /// Source columns whose absence fails the whole table.
    pub required: Vec<String>,
    /// Extra target fields filled with a constant.
    pub defaults: BTreeMap<String, String>,
    /// Target field checked by the identifier filters.
    pub process_field: Option<String>,
    pub min_process_len: usize,
    pub time_check: Option<TimeCheck>,
    pub reject_control_chars: bool,
}

impl Default for CleaningPlan {
    fn default() -> Self {
        Self {
            table: String::new(),
            fields: Vec::new(),
            required: Vec::new(),
            defaults: BTreeMap::new(),
            process_field: None,
            min_process_len: DEFAULT_MIN_PROCESS_LEN,
            time_check: None,
            reject_control_chars: true,
        }
    }
}

impl CleaningPlan {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn field(mut self, rule: FieldRule) -> Self {
        self.fields.push(rule);
        self
    }

    /// Add a rule and mark its source column required.
    pub fn required_field(mut self, rule: FieldRule) -> Self {
        self.required.push(rule.source.clone());
        self.fields.push(rule);
        self
    }

    pub fn default_field(mut self, target: &str, value: &str) -> Self {
        self.defaults.insert(target.to_string(), value.to_string());
        self
    }

    pub fn with_process_field(mut self, field: &str) -> Self {
        self.process_field = Some(field.to_string());
        self
    }

    pub fn with_min_process_len(mut self, len: usize) -> Self {
        self.min_process_len = len;
        self
    }

    pub fn with_time_check(mut self, start: &str, end: &str) -> Self {
        self.time_check = Some(TimeCheck {
            start: start.to_string(),
            end: end.to_string(),
        });
        self
    }
}

/// Record-level filter stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    NegativeNumeric,
    ControlCharacters,
    IllegalIdentifier,
    ShortIdentifier,
    TimeLogic,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::NegativeNumeric => "negative_numeric",
            FilterKind::ControlCharacters => "control_characters",
            FilterKind::IllegalIdentifier => "illegal_identifier",
            FilterKind::ShortIdentifier => "short_identifier",
            FilterKind::TimeLogic => "time_logic",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Matches of one illegal identifier pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternHit {
    pub pattern: String,
    pub count: usize,
    pub samples: Vec<String>,
}

/// Length statistics of surviving identifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LengthStats {
    pub min: usize,
    pub max: usize,
    pub average: f64,
}

/// Result of one filter stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOutcome {
    pub table: String,
    pub filter: FilterKind,
    pub before: usize,
    pub removed: usize,
    /// `removed / before`, 0 for an empty input.
    pub rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pattern_hits: Vec<PatternHit>,
    /// Identifier length → number of removed rows.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub removed_lengths: BTreeMap<usize, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept_lengths: Option<LengthStats>,
}

impl FilterOutcome {
    pub(crate) fn new(table: &str, filter: FilterKind, before: usize, removed: usize) -> Self {
        Self {
            table: table.to_string(),
            filter,
            before,
            removed,
            rate: cleanup_rate(before, removed),
            warning: None,
            samples: Vec::new(),
            pattern_hits: Vec::new(),
            removed_lengths: BTreeMap::new(),
            kept_lengths: None,
        }
    }

    pub fn after(&self) -> usize {
        self.before - self.removed
    }
}

pub(crate) fn cleanup_rate(before: usize, removed: usize) -> f64 {
    if before == 0 {
        0.0
    } else {
        removed as f64 / before as f64
    }
}

/// Summary of cleaning one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanReport {
    pub table: String,
    pub input_rows: usize,
    pub output_rows: usize,
    /// Source field → rows dropped for a negative value in it.
    pub negative_drops: BTreeMap<String, usize>,
    /// Mapped source columns absent from the raw table.
    pub skipped_fields: Vec<String>,
    pub filters: Vec<FilterOutcome>,
}

impl CleanReport {
    pub fn dropped(&self) -> usize {
        self.filters.iter().map(|f| f.removed).sum()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().filter_map(|f| f.warning.as_deref())
    }
}

/// Cleaned table plus its report.
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub table: Table,
    pub report: CleanReport,
}

/// Applies cleaning plans and reports every drop to an event sink.
pub struct FieldCleaner<'a> {
    sink: &'a dyn EventSink,
}

impl<'a> FieldCleaner<'a> {
    pub fn new(sink: &'a dyn EventSink) -> Self {
        Self { sink }
    }

    /// Clean `raw` according to `plan`.
    ///
    /// Fails only when a required source column is missing.
    pub fn clean(&self, plan: &CleaningPlan, raw: &Table) -> Result<CleanOutcome> {
        let required: Vec<&str> = plan.required.iter().map(String::as_str).collect();
        raw.require(&required)?;

        let table_name = if plan.table.is_empty() {
            raw.name.clone()
        } else {
            plan.table.clone()
        };

        let mut skipped_fields = Vec::new();
        let rules: Vec<&FieldRule> = plan
            .fields
            .iter()
            .filter(|rule| {
                let present = raw.has_column(&rule.source);
                if !present {
                    warn!("[{}] field '{}' not in source, skipping", table_name, rule.source);
                    skipped_fields.push(rule.source.clone());
                }
                present
            })
            .collect();

        let mut columns: Vec<String> = rules.iter().map(|r| r.target_name().to_string()).collect();
        columns.extend(plan.defaults.keys().cloned());

        // 1. Field mapping and negative exclusion
        let mut negative_drops: BTreeMap<String, usize> = BTreeMap::new();
        let mut negative_samples = Vec::new();
        let mut rows = Vec::with_capacity(raw.len());
        for record in &raw.rows {
            match map_record(record, &rules, &plan.defaults) {
                Ok(cleaned) => rows.push(cleaned),
                Err(field) => {
                    if negative_samples.len() < filters::SAMPLE_ROWS {
                        negative_samples.push(record.summary(&raw.columns));
                    }
                    *negative_drops.entry(field.to_string()).or_default() += 1;
                }
            }
        }
        let negatives: usize = negative_drops.values().sum();
        let mut negative = FilterOutcome::new(
            &table_name,
            FilterKind::NegativeNumeric,
            raw.len(),
            negatives,
        );
        negative.samples = negative_samples;

        let mut outcomes = vec![negative];

        // 2. Control characters anywhere in the row
        if plan.reject_control_chars {
            let (kept, outcome) = filters::reject_control_characters(&table_name, rows, &columns);
            rows = kept;
            outcomes.push(outcome);
        }

        // 3-4. Process identifier checks
        match plan.process_field.as_deref() {
            Some(field) if columns.iter().any(|c| c == field) => {
                let (kept, outcome) = filters::reject_illegal_identifiers(&table_name, rows, field);
                rows = kept;
                outcomes.push(outcome);

                let (kept, outcome) = filters::reject_short_identifiers(
                    &table_name,
                    rows,
                    field,
                    plan.min_process_len,
                );
                rows = kept;
                outcomes.push(outcome);
            }
            Some(field) => self.sink.emit(&PipelineEvent::QualityWarning {
                stage: format!("clean:{}", table_name),
                message: format!(
                    "process field '{}' not present, identifier checks skipped",
                    field
                ),
            }),
            None => {}
        }

        // 5. Time logic
        if let Some(check) = &plan.time_check {
            if columns.contains(&check.start) && columns.contains(&check.end) {
                let (kept, outcome) =
                    filters::reject_time_inversions(&table_name, rows, check, &columns);
                rows = kept;
                outcomes.push(outcome);
            } else {
                debug!(
                    "[{}] time check {} <= {} skipped, fields not present",
                    table_name, check.start, check.end
                );
            }
        }

        for outcome in &outcomes {
            self.sink.emit(&PipelineEvent::FilterApplied(outcome.clone()));
            if let Some(warning) = &outcome.warning {
                self.sink.emit(&PipelineEvent::QualityWarning {
                    stage: format!("clean:{}", table_name),
                    message: warning.clone(),
                });
            }
        }

        let report = CleanReport {
            table: table_name.clone(),
            input_rows: raw.len(),
            output_rows: rows.len(),
            negative_drops,
            skipped_fields,
            filters: outcomes,
        };
        let table = Table {
            name: table_name,
            columns,
            rows,
        };
        Ok(CleanOutcome { table, report })
    }
}

/// Map one raw record; `Err` names the first field holding a negative number.
fn map_record<'r>(
    record: &Record,
    rules: &[&'r FieldRule],
    defaults: &BTreeMap<String, String>,
) -> std::result::Result<Record, &'r str> {
    let mut cleaned = Record::new();
    for rule in rules {
        let raw = record.get(&rule.source).unwrap_or(&Cell::Null);
        let value = match rule.kind {
            FieldKind::Datetime => clean_datetime(raw),
            FieldKind::Numeric => {
                let n = coerce_number(raw);
                if n < 0.0 {
                    return Err(rule.source.as_str());
                }
                Cell::Number(if rule.round { round3(n) } else { n })
            }
            FieldKind::String => Cell::Text(raw.to_text()),
            FieldKind::SpecialNull => Cell::Text(normalize_placeholder(raw)),
        };
        cleaned.insert(rule.target_name(), value);
    }
    for (field, value) in defaults {
        cleaned.insert(field.as_str(), value.as_str());
    }
    Ok(cleaned)
}

/// Coerce to `f64`; anything unparsable or non-finite becomes `0.0`.
pub fn coerce_number(cell: &Cell) -> f64 {
    let n = match cell {
        Cell::Null => 0.0,
        Cell::Number(n) => *n,
        Cell::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

pub fn round3(n: f64) -> f64 {
    (n * 1000.0).round() / 1000.0
}

/// Text of a special-null field with placeholders collapsed to [`NULL_MARKER`].
pub fn normalize_placeholder(cell: &Cell) -> String {
    let text = match cell {
        Cell::Null => return NULL_MARKER.to_string(),
        other => other.to_text(),
    };
    if NULL_PLACEHOLDERS.contains(&text.as_str()) {
        NULL_MARKER.to_string()
    } else {
        text
    }
}
