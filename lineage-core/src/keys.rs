//! Natural key extraction from composite identifier columns.
//!
//! Several MES columns store composite identifiers such as
//! `"PLANT01,SO-1001,MAT-77"`. Joins only need the trailing segment(s), so each
//! source column that is split has a [`KeySpec`] naming how many trailing
//! segments form its natural key. Changing a segment count changes which
//! rows join; the specs are pinned by tests below.

/// Delimiter used inside composite identifier columns.
pub const KEY_DELIMITER: char = ',';

/// Return the last `n` `delimiter`-separated segments of `value`.
///
/// Mirrors SQL `substring_index(value, delimiter, -n)`: when `value` has fewer
/// than `n` delimiters the whole value is returned, and `n == 0` yields `""`.
pub fn last_segments(value: &str, delimiter: char, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match value.rmatch_indices(delimiter).nth(n - 1) {
        Some((idx, sep)) => &value[idx + sep.len()..],
        None => value,
    }
}

/// How a natural key is cut from one composite column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    /// Logical source table.
    pub table: &'static str,
    /// Composite column.
    pub column: &'static str,
    /// Number of trailing segments that form the key.
    pub segments: usize,
}

impl KeySpec {
    pub fn extract<'a>(&self, value: &'a str) -> &'a str {
        last_segments(value, KEY_DELIMITER, self.segments)
    }
}

/// SFC that was split or merged: last segment of the lot history source reference.
pub const SPLIT_SOURCE: KeySpec = KeySpec {
    table: "lot_history",
    column: "source_reference_value",
    segments: 1,
};

/// Resulting SFC or inventory id: last segment of the lot history target.
pub const LOT_TARGET: KeySpec = KeySpec {
    table: "lot_history",
    column: "target_value",
    segments: 1,
};

/// Sales order number plus customer material code: last two segments of the
/// sales order detail primary key.
pub const SALES_ORDER: KeySpec = KeySpec {
    table: "sales_order_detail",
    column: "primary_key",
    segments: 2,
};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_last_segments_examples() {
        assert_eq!(last_segments("A,B,C", ',', 1), "C");
        assert_eq!(last_segments("A,B,C", ',', 2), "B,C");
        assert_eq!(last_segments("A,B,C", ',', 3), "A,B,C");
        assert_eq!(last_segments("A,B,C", ',', 4), "A,B,C");
        assert_eq!(last_segments("A,B,C", ',', 0), "");
        assert_eq!(last_segments("SFC001", ',', 1), "SFC001");
        assert_eq!(last_segments("A,B,", ',', 1), "");
        assert_eq!(last_segments("", ',', 1), "");
    }

    #[test]
    fn test_key_specs_pinned() {
        assert_eq!(SPLIT_SOURCE.extract("W1,LINE3,SFC202401010001"), "SFC202401010001");
        assert_eq!(LOT_TARGET.extract("W1,INV-000123"), "INV-000123");
        assert_eq!(
            SALES_ORDER.extract("PLANT01,SO-1001,CM-77"),
            "SO-1001,CM-77"
        );
        assert_eq!(SALES_ORDER.extract("SO-1001"), "SO-1001");
    }

    #[test]
    fn test_multibyte_segments() {
        assert_eq!(last_segments("工厂,订单一,物料", ',', 2), "订单一,物料");
    }

    proptest! {
        #[test]
        fn prop_last_segments_matches_split(
            parts in proptest::collection::vec("[A-Za-z0-9_-]{0,8}", 1..8),
            n in 1usize..10,
        ) {
            let joined = parts.join(",");
            let expected = if n >= parts.len() {
                joined.clone()
            } else {
                parts[parts.len() - n..].join(",")
            };
            prop_assert_eq!(last_segments(&joined, ',', n), expected.as_str());
        }

        #[test]
        fn prop_single_segment_has_no_delimiter(value in "[A-Z0-9,]{0,24}") {
            prop_assert!(!last_segments(&value, ',', 1).contains(','));
        }
    }
}
