//! In-memory filter/sort/paginate pipeline over a table snapshot. The
//! pipeline is a pure function of its inputs and recomputes fresh on every
//! call; it cannot fail, it only ignores inputs that make no sense (an
//! unknown sort column applies no sort).

use std::cmp::Ordering;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::heuristics::leading_number;
use crate::session::{cell_text, TableSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Tri-state sort toggle: repeated clicks on one column cycle
/// none -> ascending -> descending -> none; a click on a different column
/// restarts at ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortState {
    pub column: Option<String>,
    pub direction: Option<SortDirection>,
}

impl SortState {
    pub fn toggle(&mut self, column: &str) {
        let same_column = self.column.as_deref() == Some(column);
        match (same_column, self.direction) {
            (true, Some(SortDirection::Asc)) => {
                self.direction = Some(SortDirection::Desc);
            }
            (true, Some(SortDirection::Desc)) => {
                self.column = None;
                self.direction = None;
            }
            _ => {
                self.column = Some(column.to_string());
                self.direction = Some(SortDirection::Asc);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ViewQuery<'a> {
    /// Case-insensitive substring filter; empty keeps every row.
    pub search: &'a str,
    pub sort_column: Option<&'a str>,
    pub sort_direction: Option<SortDirection>,
    /// 1-based page number; values below 1 are clamped to 1.
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Serialize)]
pub struct RowView {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub total_matched: usize,
    /// Number of pages covering the matched rows; zero when nothing matched.
    pub total_pages: usize,
}

/// Ascending comparison of two cells: nulls sort last, then numeric when
/// both string forms carry a numeric prefix, then lexicographic. Descending
/// order is the exact reverse, which puts nulls first.
fn compare_cells(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let a_text = cell_text(a);
            let b_text = cell_text(b);
            match (leading_number(&a_text), leading_number(&b_text)) {
                (Some(a_num), Some(b_num)) => {
                    a_num.partial_cmp(&b_num).unwrap_or(Ordering::Equal)
                }
                _ => a_text.cmp(&b_text),
            }
        }
    }
}

/// Apply filter, sort, and page slice to a snapshot, strictly in that order.
pub fn build_view(snapshot: &TableSnapshot, query: &ViewQuery<'_>) -> RowView {
    let mut rows: Vec<&Vec<Value>> = snapshot.rows.iter().collect();

    if !query.search.is_empty() {
        let needle = query.search.to_lowercase();
        rows.retain(|row| {
            row.iter()
                .any(|cell| !cell.is_null() && cell_text(cell).to_lowercase().contains(&needle))
        });
    }

    if let (Some(column), Some(direction)) = (query.sort_column, query.sort_direction) {
        if let Some(idx) = snapshot.columns.iter().position(|c| c == column) {
            // sort_by is stable, so ties keep their filtered order.
            rows.sort_by(|a, b| {
                let ordering = compare_cells(&a[idx], &b[idx]);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }
    }

    let total_matched = rows.len();
    let page_size = query.page_size.max(1);
    let page = query.page.max(1);
    let total_pages = total_matched.div_ceil(page_size);
    let start = (page - 1).saturating_mul(page_size);

    let rows = rows
        .into_iter()
        .skip(start)
        .take(page_size)
        .cloned()
        .collect();

    RowView {
        columns: snapshot.columns.clone(),
        rows,
        total_matched,
        total_pages,
    }
}

/// Stateful wrapper over one snapshot: holds the search term, sort state,
/// and current page the way a table widget would, resetting to the first
/// page whenever the filter or sort changes.
#[derive(Debug)]
pub struct TableBrowser {
    snapshot: TableSnapshot,
    search: String,
    sort: SortState,
    page: usize,
    page_size: usize,
}

impl TableBrowser {
    pub fn new(snapshot: TableSnapshot, page_size: usize) -> Self {
        Self {
            snapshot,
            search: String::new(),
            sort: SortState::default(),
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
        self.page = 1;
    }

    pub fn toggle_sort(&mut self, column: &str) {
        self.sort.toggle(column);
        self.page = 1;
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.page = 1;
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn sort(&self) -> &SortState {
        &self.sort
    }

    pub fn view(&self) -> RowView {
        build_view(
            &self.snapshot,
            &ViewQuery {
                search: &self.search,
                sort_column: self.sort.column.as_deref(),
                sort_direction: self.sort.direction,
                page: self.page,
                page_size: self.page_size,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales_snapshot() -> TableSnapshot {
        TableSnapshot {
            columns: vec![
                "id".to_string(),
                "item_name".to_string(),
                "total".to_string(),
                "sold_at".to_string(),
            ],
            rows: vec![
                vec![json!(1), json!("A"), json!(10), json!("2024-01-01")],
                vec![json!(2), json!("B"), json!(20), json!("2024-01-02")],
                vec![json!(3), json!("C"), json!(30), Value::Null],
            ],
        }
    }

    fn unpaged(search: &str, sort: Option<(&str, SortDirection)>) -> RowView {
        let snapshot = sales_snapshot();
        build_view(
            &snapshot,
            &ViewQuery {
                search,
                sort_column: sort.map(|(c, _)| c),
                sort_direction: sort.map(|(_, d)| d),
                page: 1,
                page_size: 100,
            },
        )
    }

    #[test]
    fn search_matches_substring_case_insensitively() {
        let view = unpaged("b", None);
        assert_eq!(view.total_matched, 1);
        assert_eq!(view.rows[0][1], json!("B"));
    }

    #[test]
    fn search_scans_every_cell_and_skips_nulls() {
        let view = unpaged("2024", None);
        assert_eq!(view.total_matched, 2);
    }

    #[test]
    fn filtering_never_grows_the_row_set() {
        let all = unpaged("", None).total_matched;
        for term in ["a", "2024", "zzz", "1"] {
            assert!(unpaged(term, None).total_matched <= all);
        }
    }

    #[test]
    fn sort_by_total_descending() {
        let view = unpaged("", Some(("total", SortDirection::Desc)));
        let totals: Vec<&Value> = view.rows.iter().map(|r| &r[2]).collect();
        assert_eq!(totals, vec![&json!(30), &json!(20), &json!(10)]);
    }

    #[test]
    fn sort_compares_numerically_when_both_parse() {
        let snapshot = TableSnapshot {
            columns: vec!["v".to_string()],
            rows: vec![vec![json!("10")], vec![json!("9")]],
        };
        let view = build_view(
            &snapshot,
            &ViewQuery {
                search: "",
                sort_column: Some("v"),
                sort_direction: Some(SortDirection::Asc),
                page: 1,
                page_size: 10,
            },
        );
        assert_eq!(view.rows[0][0], json!("9"));
        assert_eq!(view.rows[1][0], json!("10"));
    }

    #[test]
    fn sort_falls_back_to_lexicographic() {
        let snapshot = TableSnapshot {
            columns: vec!["v".to_string()],
            rows: vec![vec![json!("pear")], vec![json!("apple")], vec![json!("10")]],
        };
        let view = build_view(
            &snapshot,
            &ViewQuery {
                search: "",
                sort_column: Some("v"),
                sort_direction: Some(SortDirection::Asc),
                page: 1,
                page_size: 10,
            },
        );
        let values: Vec<&Value> = view.rows.iter().map(|r| &r[0]).collect();
        assert_eq!(values, vec![&json!("10"), &json!("apple"), &json!("pear")]);
    }

    #[test]
    fn nulls_sort_last_ascending_first_descending() {
        let asc = unpaged("", Some(("sold_at", SortDirection::Asc)));
        assert_eq!(asc.rows[2][0], json!(3));

        let desc = unpaged("", Some(("sold_at", SortDirection::Desc)));
        assert_eq!(desc.rows[0][0], json!(3));
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let snapshot = TableSnapshot {
            columns: vec!["k".to_string(), "v".to_string()],
            rows: vec![
                vec![json!(1), json!("first")],
                vec![json!(1), json!("second")],
                vec![json!(0), json!("third")],
            ],
        };
        let view = build_view(
            &snapshot,
            &ViewQuery {
                search: "",
                sort_column: Some("k"),
                sort_direction: Some(SortDirection::Asc),
                page: 1,
                page_size: 10,
            },
        );
        assert_eq!(view.rows[0][1], json!("third"));
        assert_eq!(view.rows[1][1], json!("first"));
        assert_eq!(view.rows[2][1], json!("second"));
    }

    #[test]
    fn sorting_is_idempotent() {
        let once = unpaged("", Some(("total", SortDirection::Desc)));
        let resorted = build_view(
            &TableSnapshot {
                columns: once.columns.clone(),
                rows: once.rows.clone(),
            },
            &ViewQuery {
                search: "",
                sort_column: Some("total"),
                sort_direction: Some(SortDirection::Desc),
                page: 1,
                page_size: 100,
            },
        );
        assert_eq!(once.rows, resorted.rows);
    }

    #[test]
    fn unknown_sort_column_applies_no_sort() {
        let view = unpaged("", Some(("missing", SortDirection::Asc)));
        let ids: Vec<&Value> = view.rows.iter().map(|r| &r[0]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3)]);
    }

    #[test]
    fn pages_partition_the_matched_rows() {
        let snapshot = sales_snapshot();
        let mut seen = 0;
        let mut page = 1;
        loop {
            let view = build_view(
                &snapshot,
                &ViewQuery {
                    search: "",
                    sort_column: None,
                    sort_direction: None,
                    page,
                    page_size: 2,
                },
            );
            assert!(view.rows.len() <= 2);
            if view.rows.is_empty() {
                break;
            }
            seen += view.rows.len();
            page += 1;
        }
        let full = unpaged("", None);
        assert_eq!(seen, full.total_matched);
        assert_eq!(full.total_matched.div_ceil(2), 2);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let snapshot = sales_snapshot();
        let view = build_view(
            &snapshot,
            &ViewQuery {
                search: "",
                sort_column: None,
                sort_direction: None,
                page: 9,
                page_size: 2,
            },
        );
        assert!(view.rows.is_empty());
        assert_eq!(view.total_matched, 3);
        assert_eq!(view.total_pages, 2);
    }

    #[test]
    fn zero_matches_means_zero_pages() {
        let view = unpaged("no-such-needle", None);
        assert_eq!(view.total_matched, 0);
        assert_eq!(view.total_pages, 0);
        assert!(view.rows.is_empty());
    }

    #[test]
    fn tri_state_cycle_returns_to_none() {
        let mut sort = SortState::default();
        sort.toggle("total");
        assert_eq!(sort.column.as_deref(), Some("total"));
        assert_eq!(sort.direction, Some(SortDirection::Asc));

        sort.toggle("total");
        assert_eq!(sort.direction, Some(SortDirection::Desc));

        sort.toggle("total");
        assert_eq!(sort, SortState::default());
    }

    #[test]
    fn toggling_a_different_column_restarts_ascending() {
        let mut sort = SortState::default();
        sort.toggle("total");
        sort.toggle("total");
        sort.toggle("item_name");
        assert_eq!(sort.column.as_deref(), Some("item_name"));
        assert_eq!(sort.direction, Some(SortDirection::Asc));
    }

    #[test]
    fn browser_resets_page_when_inputs_change() {
        let mut browser = TableBrowser::new(sales_snapshot(), 1);
        browser.set_page(3);
        assert_eq!(browser.page(), 3);

        browser.set_search("a");
        assert_eq!(browser.page(), 1);

        browser.set_page(2);
        browser.toggle_sort("total");
        assert_eq!(browser.page(), 1);
    }

    #[test]
    fn browser_view_applies_the_full_pipeline() {
        let mut browser = TableBrowser::new(sales_snapshot(), 50);
        browser.set_search("2024");
        browser.toggle_sort("total");
        browser.toggle_sort("total");

        let view = browser.view();
        assert_eq!(view.total_matched, 2);
        assert_eq!(view.rows[0][2], json!(20));
        assert_eq!(view.rows[1][2], json!(10));
    }
}
