//! Best-effort classification of columns by name.
//!
//! Nothing here inspects declared types or data; a column is "amount-like"
//! simply because its name says so. Callers must tolerate guesses that turn
//! out to be wrong (missing column, non-numeric data).

/// Column names containing any of these are treated as monetary amounts.
pub const AMOUNT_KEYWORDS: &[&str] = &["amount", "total", "price", "value", "cost", "sum"];

/// Column names containing any of these (or ending in `_at`) are treated as
/// dates or timestamps.
pub const DATE_KEYWORDS: &[&str] = &["date", "time", "timestamp", "created", "modified"];

/// Column names containing any of these are treated as categories.
pub const CATEGORY_KEYWORDS: &[&str] = &["category", "type", "class", "group", "kind"];

/// Fallback column names used when no column matches a role. Aggregates
/// against a fallback are expected to fail when the column does not exist.
pub const AMOUNT_FALLBACK: &str = "amount";
pub const DATE_FALLBACK: &str = "timestamp";
pub const CATEGORY_FALLBACK: &str = "category";

/// Columns matched per role, preserving table declaration order. A column
/// may appear in more than one role.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RoleMatches {
    pub amount: Vec<String>,
    pub date: Vec<String>,
    pub category: Vec<String>,
}

impl RoleMatches {
    /// First amount-like column, or the fixed fallback name.
    pub fn amount_column(&self) -> &str {
        self.amount.first().map(String::as_str).unwrap_or(AMOUNT_FALLBACK)
    }

    /// First date-like column, or the fixed fallback name.
    pub fn date_column(&self) -> &str {
        self.date.first().map(String::as_str).unwrap_or(DATE_FALLBACK)
    }

    /// First category-like column, or the fixed fallback name.
    pub fn category_column(&self) -> &str {
        self.category.first().map(String::as_str).unwrap_or(CATEGORY_FALLBACK)
    }
}

fn matches_any(name: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| name.contains(kw))
}

/// Classify column names into the three role sets, case-insensitively.
pub fn classify_columns<S: AsRef<str>>(columns: &[S]) -> RoleMatches {
    let mut roles = RoleMatches::default();
    for column in columns {
        let name = column.as_ref();
        let lower = name.to_lowercase();
        if matches_any(&lower, AMOUNT_KEYWORDS) {
            roles.amount.push(name.to_string());
        }
        if matches_any(&lower, DATE_KEYWORDS) || lower.ends_with("_at") {
            roles.date.push(name.to_string());
        }
        if matches_any(&lower, CATEGORY_KEYWORDS) {
            roles.category.push(name.to_string());
        }
    }
    roles
}

/// Position of the first column whose name equals one of `candidates`,
/// case-insensitively, scanning candidates in priority order.
pub fn resolve_column<S: AsRef<str>>(columns: &[S], candidates: &[&str]) -> Option<usize> {
    for candidate in candidates {
        let found = columns
            .iter()
            .position(|c| c.as_ref().eq_ignore_ascii_case(candidate));
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Parse the leading numeric prefix of a string, ignoring leading
/// whitespace and any trailing garbage: `"10abc"` is 10, `"abc"` is None.
/// Matches the permissive number coercion the viewer uses for sorting and
/// amount extraction.
pub fn leading_number(s: &str) -> Option<f64> {
    let trimmed = s.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }

    let mut saw_digit = false;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        saw_digit = true;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            saw_digit = true;
        }
    }
    if !saw_digit {
        return None;
    }

    // Optional exponent; only consumed when it carries digits.
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut cursor = end + 1;
        if cursor < bytes.len() && matches!(bytes[cursor], b'+' | b'-') {
            cursor += 1;
        }
        let exp_digits_start = cursor;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }
        if cursor > exp_digits_start {
            end = cursor;
        }
    }

    trimmed[..end].parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_keyword_case_insensitively() {
        let columns = ["id", "Total", "CREATED_AT", "ProductType"];
        let roles = classify_columns(&columns);
        assert_eq!(roles.amount, vec!["Total"]);
        assert_eq!(roles.date, vec!["CREATED_AT"]);
        assert_eq!(roles.category, vec!["ProductType"]);
    }

    #[test]
    fn column_may_match_several_roles() {
        let roles = classify_columns(&["total_by_category"]);
        assert_eq!(roles.amount, vec!["total_by_category"]);
        assert_eq!(roles.category, vec!["total_by_category"]);
    }

    #[test]
    fn matches_preserve_column_order() {
        let roles = classify_columns(&["price", "cost", "amount"]);
        assert_eq!(roles.amount, vec!["price", "cost", "amount"]);
        assert_eq!(roles.amount_column(), "price");
    }

    #[test]
    fn at_suffix_counts_as_date() {
        let roles = classify_columns(&["sold_at"]);
        assert_eq!(roles.date, vec!["sold_at"]);
    }

    #[test]
    fn fallback_names_when_nothing_matches() {
        let roles = classify_columns(&["id", "name"]);
        assert_eq!(roles.amount_column(), "amount");
        assert_eq!(roles.date_column(), "timestamp");
        assert_eq!(roles.category_column(), "category");
    }

    #[test]
    fn resolves_columns_in_priority_order() {
        let columns = ["Date", "ID", "Name"];
        assert_eq!(resolve_column(&columns, &["id"]), Some(1));
        assert_eq!(resolve_column(&columns, &["timestamp", "date"]), Some(0));
        assert_eq!(resolve_column(&columns, &["category"]), None);
    }

    #[test]
    fn leading_number_parses_prefixes() {
        assert_eq!(leading_number("10.5"), Some(10.5));
        assert_eq!(leading_number("10abc"), Some(10.0));
        assert_eq!(leading_number("  -3.5"), Some(-3.5));
        assert_eq!(leading_number("+.5"), Some(0.5));
        assert_eq!(leading_number("2e3"), Some(2000.0));
        assert_eq!(leading_number("2e"), Some(2.0));
        assert_eq!(leading_number("1e-2x"), Some(0.01));
    }

    #[test]
    fn leading_number_rejects_non_numeric() {
        assert_eq!(leading_number("abc"), None);
        assert_eq!(leading_number(""), None);
        assert_eq!(leading_number("."), None);
        assert_eq!(leading_number("-"), None);
    }
}
