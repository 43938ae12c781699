//! Tolerant datetime coercion.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound};

use crate::record::{format_number, Cell};

/// Rendering of every cleaned datetime.
pub const DATETIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Marker for datetime values that were present but unusable.
pub const UNKNOWN_TIME: &str = "unknown time";

const DATETIME_PATTERNS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
    "%Y%m%d%H%M%S",
];

const DATE_PATTERNS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Parse the formats MES exports actually contain. Offsets are dropped and the
/// wall-clock time kept.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    DATETIME_PATTERNS
        .iter()
        .find_map(|p| NaiveDateTime::parse_from_str(raw, p).ok())
        .or_else(|| {
            DATE_PATTERNS
                .iter()
                .find_map(|p| NaiveDate::parse_from_str(raw, p).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Parse a value that was already cleaned; the unknown marker parses as `None`.
pub fn parse_cleaned(cell: &Cell) -> Option<NaiveDateTime> {
    match cell {
        Cell::Text(s) if s != UNKNOWN_TIME => parse_datetime(s),
        _ => None,
    }
}

/// Text of a cleaned datetime usable as an edge timestamp.
///
/// Null, empty text and the unknown marker all read as `None`.
pub fn known_time(cell: Option<&Cell>) -> Option<String> {
    match cell {
        Some(Cell::Text(s)) if !s.is_empty() && s != UNKNOWN_TIME => Some(s.clone()),
        _ => None,
    }
}

/// Clean one datetime field.
///
/// Null stays null. Anything else is parsed, truncated to whole seconds and
/// rendered with [`DATETIME_FORMAT`]; text that does not parse (including the
/// empty string) becomes [`UNKNOWN_TIME`].
pub fn clean_datetime(cell: &Cell) -> Cell {
    let raw = match cell {
        Cell::Null => return Cell::Null,
        Cell::Number(n) => format_number(*n),
        Cell::Text(s) => s.clone(),
    };
    match parse_datetime(&raw) {
        Some(dt) => Cell::Text(dt.trunc_subsecs(0).format(DATETIME_FORMAT).to_string()),
        None => Cell::text(UNKNOWN_TIME),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_variants_render_uniformly() {
        for raw in [
            "2024-03-05 08:09:10",
            "2024-03-05T08:09:10",
            "2024/03/05 08:09:10",
            "2024-03-05 08:09:10.987654",
            "2024-03-05T08:09:10+08:00",
        ] {
            assert_eq!(
                clean_datetime(&Cell::text(raw)),
                Cell::text("2024/03/05 08:09:10"),
                "input {raw}"
            );
        }
    }

    #[test]
    fn test_fraction_is_truncated_not_rounded() {
        assert_eq!(
            clean_datetime(&Cell::text("2024-03-05 08:09:10.999")),
            Cell::text("2024/03/05 08:09:10")
        );
    }

    #[test]
    fn test_date_only_is_midnight() {
        assert_eq!(
            clean_datetime(&Cell::text("2024-03-05")),
            Cell::text("2024/03/05 00:00:00")
        );
        assert_eq!(
            clean_datetime(&Cell::Number(20240305.0)),
            Cell::text("2024/03/05 00:00:00")
        );
    }

    #[test]
    fn test_unparsable_becomes_unknown_time() {
        assert_eq!(clean_datetime(&Cell::text("not-a-date")), Cell::text(UNKNOWN_TIME));
        assert_eq!(clean_datetime(&Cell::text("")), Cell::text(UNKNOWN_TIME));
    }

    #[test]
    fn test_null_stays_null() {
        assert_eq!(clean_datetime(&Cell::Null), Cell::Null);
    }

    #[test]
    fn test_parse_cleaned_skips_marker() {
        assert!(parse_cleaned(&Cell::text(UNKNOWN_TIME)).is_none());
        assert!(parse_cleaned(&Cell::text("2024/03/05 08:09:10")).is_some());
        assert!(parse_cleaned(&Cell::Null).is_none());
    }

    #[test]
    fn test_known_time_drops_marker_and_blank() {
        assert_eq!(known_time(Some(&Cell::text(UNKNOWN_TIME))), None);
        assert_eq!(known_time(Some(&Cell::text(""))), None);
        assert_eq!(known_time(Some(&Cell::Null)), None);
        assert_eq!(known_time(None), None);
        assert_eq!(
            known_time(Some(&Cell::text("2024/03/05 08:09:10"))).as_deref(),
            Some("2024/03/05 08:09:10")
        );
    }
}
