//! Record-level filters applied after field mapping.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{
    cleanup_rate, datetime::parse_cleaned, FilterKind, FilterOutcome, LengthStats, PatternHit,
    TimeCheck,
};
use crate::record::{Cell, Record};

/// Shortest legal process identifier.
pub const MIN_PROCESS_LEN: usize = 2;
/// Longest legal process identifier.
pub const MAX_PROCESS_LEN: usize = 50;

/// Offending rows kept per filter for control characters and time logic.
pub(crate) const SAMPLE_ROWS: usize = 5;
/// Offending rows kept for the short identifier filter.
const SHORT_SAMPLE_ROWS: usize = 10;
/// Sample values kept per illegal pattern.
const PATTERN_SAMPLES: usize = 3;

/// Cleanup rate above which the general filters raise a warning.
const GENERAL_WARN_RATE: f64 = 0.15;
/// Cleanup rate logged for information only.
const GENERAL_NOTICE_RATE: f64 = 0.05;
const SHORT_CRITICAL_RATE: f64 = 0.20;
const SHORT_WARN_RATE: f64 = 0.10;

/// A named illegal identifier pattern.
pub struct IllegalPattern {
    pub name: &'static str,
    pub regex: &'static Lazy<Regex>,
}

static ROW_CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\x9F@]").unwrap());

static AT_SIGN: Lazy<Regex> = Lazy::new(|| Regex::new(r"@").unwrap());
static LONE_UPPERCASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[A-Z]\s*$").unwrap());
static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x00-\x1f\x7f-\x9f]").unwrap());
static WHITESPACE_CONTROL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\t\n\r\f\v]").unwrap());
static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[#$%^&*()+=\[\]{}|\\:";'<>?,]"#).unwrap());
static BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*$").unwrap());
static NULL_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^NULL$|^null$|^Null$").unwrap());
static ASTERISKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*+$").unwrap());
static DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-+$").unwrap());

/// Patterns that disqualify a process identifier.
pub static ILLEGAL_PATTERNS: &[IllegalPattern] = &[
    IllegalPattern {
        name: "at_sign",
        regex: &AT_SIGN,
    },
    IllegalPattern {
        name: "lone_uppercase_letter",
        regex: &LONE_UPPERCASE,
    },
    IllegalPattern {
        name: "control_characters",
        regex: &CONTROL_CHARS,
    },
    IllegalPattern {
        name: "whitespace_control",
        regex: &WHITESPACE_CONTROL,
    },
    IllegalPattern {
        name: "punctuation",
        regex: &PUNCTUATION,
    },
    IllegalPattern {
        name: "blank",
        regex: &BLANK,
    },
    IllegalPattern {
        name: "null_word",
        regex: &NULL_WORD,
    },
    IllegalPattern {
        name: "all_asterisks",
        regex: &ASTERISKS,
    },
    IllegalPattern {
        name: "all_dashes",
        regex: &DASHES,
    },
];

const LENGTH_OUT_OF_RANGE: &str = "length_out_of_range";

/// Whether `value` is a legal process identifier.
pub fn is_legal_identifier(value: &str) -> bool {
    let len = value.chars().count();
    (MIN_PROCESS_LEN..=MAX_PROCESS_LEN).contains(&len)
        && !ILLEGAL_PATTERNS.iter().any(|p| p.regex.is_match(value))
}

fn general_warning(filter: FilterKind, rate: f64) -> Option<String> {
    if rate > GENERAL_WARN_RATE {
        Some(format!(
            "{} cleanup rate {:.2}% exceeds {:.0}%, check source data quality",
            filter,
            rate * 100.0,
            GENERAL_WARN_RATE * 100.0
        ))
    } else {
        None
    }
}

fn notice(table: &str, outcome: &FilterOutcome) {
    if outcome.rate > GENERAL_NOTICE_RATE && outcome.warning.is_none() {
        info!(
            "[{}] {} removed {:.2}% of rows",
            table,
            outcome.filter,
            outcome.rate * 100.0
        );
    }
}

/// Drop rows where any text field contains a control character or `@`.
pub(crate) fn reject_control_characters(
    table: &str,
    rows: Vec<Record>,
    columns: &[String],
) -> (Vec<Record>, FilterOutcome) {
    let before = rows.len();
    let mut samples = Vec::new();
    let kept: Vec<Record> = rows
        .into_iter()
        .filter(|row| {
            let dirty = row
                .iter()
                .any(|(_, cell)| matches!(cell, Cell::Text(s) if ROW_CONTROL.is_match(s)));
            if dirty && samples.len() < SAMPLE_ROWS {
                samples.push(row.summary(columns));
            }
            !dirty
        })
        .collect();

    let mut outcome = FilterOutcome::new(
        table,
        FilterKind::ControlCharacters,
        before,
        before - kept.len(),
    );
    outcome.warning = general_warning(outcome.filter, outcome.rate);
    outcome.samples = samples;
    notice(table, &outcome);
    (kept, outcome)
}

/// Drop rows whose identifier matches an illegal pattern or has an
/// out-of-range length.
pub(crate) fn reject_illegal_identifiers(
    table: &str,
    rows: Vec<Record>,
    field: &str,
) -> (Vec<Record>, FilterOutcome) {
    let before = rows.len();
    let mut hits: Vec<PatternHit> = ILLEGAL_PATTERNS
        .iter()
        .map(|p| PatternHit {
            pattern: p.name.to_string(),
            count: 0,
            samples: Vec::new(),
        })
        .collect();
    hits.push(PatternHit {
        pattern: LENGTH_OUT_OF_RANGE.to_string(),
        count: 0,
        samples: Vec::new(),
    });
    let mut samples = Vec::new();

    let kept: Vec<Record> = rows
        .into_iter()
        .filter(|row| {
            let value = row.get(field).map(Cell::to_text).unwrap_or_default();
            let mut illegal = false;
            // Each pattern is counted on its own; one value may hit several.
            for (pattern, hit) in ILLEGAL_PATTERNS.iter().zip(hits.iter_mut()) {
                if pattern.regex.is_match(&value) {
                    illegal = true;
                    hit.count += 1;
                    if hit.samples.len() < PATTERN_SAMPLES {
                        hit.samples.push(value.clone());
                    }
                }
            }
            let len = value.chars().count();
            if !(MIN_PROCESS_LEN..=MAX_PROCESS_LEN).contains(&len) {
                illegal = true;
                if let Some(hit) = hits.last_mut() {
                    hit.count += 1;
                    if hit.samples.len() < PATTERN_SAMPLES {
                        hit.samples.push(value.clone());
                    }
                }
            }
            if illegal && samples.len() < SAMPLE_ROWS {
                samples.push(value);
            }
            !illegal
        })
        .collect();

    for hit in hits.iter().filter(|h| h.count > 0) {
        debug!(
            "[{}] {} matched {} values, e.g. {:?}",
            table, hit.pattern, hit.count, hit.samples
        );
    }

    let mut outcome = FilterOutcome::new(
        table,
        FilterKind::IllegalIdentifier,
        before,
        before - kept.len(),
    );
    outcome.warning = general_warning(outcome.filter, outcome.rate);
    outcome.samples = samples;
    outcome.pattern_hits = hits.into_iter().filter(|h| h.count > 0).collect();
    notice(table, &outcome);
    (kept, outcome)
}

/// Drop rows whose identifier is at most `min_len` characters long.
pub(crate) fn reject_short_identifiers(
    table: &str,
    rows: Vec<Record>,
    field: &str,
    min_len: usize,
) -> (Vec<Record>, FilterOutcome) {
    let before = rows.len();
    let mut samples = Vec::new();
    let mut removed_lengths: BTreeMap<usize, usize> = BTreeMap::new();

    let kept: Vec<Record> = rows
        .into_iter()
        .filter(|row| {
            let value = row.get(field).map(Cell::to_text).unwrap_or_default();
            let len = value.chars().count();
            let short = len <= min_len;
            if short {
                *removed_lengths.entry(len).or_default() += 1;
                if samples.len() < SHORT_SAMPLE_ROWS {
                    samples.push(format!("{} (len {})", value, len));
                }
            }
            !short
        })
        .collect();

    let lengths: Vec<usize> = kept
        .iter()
        .map(|row| row.get(field).map(Cell::to_text).unwrap_or_default().chars().count())
        .collect();
    let kept_lengths = match (lengths.iter().min(), lengths.iter().max()) {
        (Some(&min), Some(&max)) => Some(LengthStats {
            min,
            max,
            average: lengths.iter().sum::<usize>() as f64 / lengths.len() as f64,
        }),
        _ => None,
    };

    let removed = before - kept.len();
    let rate = cleanup_rate(before, removed);
    let mut outcome = FilterOutcome::new(table, FilterKind::ShortIdentifier, before, removed);
    outcome.warning = if rate > SHORT_CRITICAL_RATE {
        Some(format!(
            "short identifier cleanup rate {:.2}% is very high (> {:.0}%), check the minimum length of {}",
            rate * 100.0,
            SHORT_CRITICAL_RATE * 100.0,
            min_len
        ))
    } else if rate > SHORT_WARN_RATE {
        Some(format!(
            "short identifier cleanup rate {:.2}% is high (> {:.0}%)",
            rate * 100.0,
            SHORT_WARN_RATE * 100.0
        ))
    } else {
        None
    };
    outcome.samples = samples;
    outcome.removed_lengths = removed_lengths;
    outcome.kept_lengths = kept_lengths;
    (kept, outcome)
}

/// Drop rows whose start time is after their end time; rows where either
/// side is null or unknown are kept.
pub(crate) fn reject_time_inversions(
    table: &str,
    rows: Vec<Record>,
    check: &TimeCheck,
    columns: &[String],
) -> (Vec<Record>, FilterOutcome) {
    let before = rows.len();
    let mut samples = Vec::new();
    let kept: Vec<Record> = rows
        .into_iter()
        .filter(|row| {
            let start = row.get(&check.start).and_then(parse_cleaned);
            let end = row.get(&check.end).and_then(parse_cleaned);
            let inverted = matches!((start, end), (Some(s), Some(e)) if s > e);
            if inverted && samples.len() < SAMPLE_ROWS {
                samples.push(row.summary(columns));
            }
            !inverted
        })
        .collect();

    let mut outcome = FilterOutcome::new(table, FilterKind::TimeLogic, before, before - kept.len());
    outcome.warning = general_warning(outcome.filter, outcome.rate);
    outcome.samples = samples;
    notice(table, &outcome);
    (kept, outcome)
}
