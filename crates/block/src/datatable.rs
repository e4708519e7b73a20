//! Datatable projection for `element = "table"` blocks.
//!
//! Rebuilt after every successful refresh. Columns come from the explicit
//! block metadata when present, else from the first row's lowercase-first
//! keys. Sorting toggles direction based on the current row order.

use std::cmp::Ordering;

use livemark_core::{lookup_field, Row, Value};
use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableColumn {
    pub key: String,
    pub label: String,
    pub sortable: bool,
}

impl TableColumn {
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            sortable: true,
        }
    }
}

/// Parse a `"key:Label,key2:Label2"` column spec. A bare key labels itself.
pub fn parse_columns(spec: &str) -> Vec<TableColumn> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|part| match part.split_once(':') {
            Some((key, label)) => TableColumn::new(key.trim(), label.trim()),
            None => TableColumn::new(part, part),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRow {
    pub id: String,
    pub cells: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct DataTable {
    pub columns: Vec<TableColumn>,
    rows: Vec<TableRow>,
    pub page: usize,
    pub page_size: usize,
}

impl DataTable {
    /// Build from the block's current data.
    pub fn build(data: &[Row], explicit_columns: &[TableColumn], page: usize, page_size: usize) -> Self {
        let columns = if !explicit_columns.is_empty() {
            explicit_columns.to_vec()
        } else {
            auto_columns(data)
        };

        let rows = data
            .iter()
            .enumerate()
            .map(|(i, row)| TableRow {
                id: lookup_field(row, "id")
                    .filter(|v| !matches!(v, Value::Null))
                    .map(|v| v.display())
                    .unwrap_or_else(|| format!("row-{i}")),
                cells: columns
                    .iter()
                    .map(|c| lookup_field(row, &c.key).cloned().unwrap_or(Value::Null))
                    .collect(),
            })
            .collect();

        let mut table = Self {
            columns,
            rows,
            page: 0,
            page_size: page_size.max(1),
        };
        table.page = page.min(table.max_page());
        table
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn page_count(&self) -> usize {
        if self.rows.is_empty() {
            1
        } else {
            self.rows.len().div_ceil(self.page_size)
        }
    }

    fn max_page(&self) -> usize {
        self.page_count() - 1
    }

    /// Rows of the current page.
    pub fn page_rows(&self) -> &[TableRow] {
        let start = self.page * self.page_size;
        let end = (start + self.page_size).min(self.rows.len());
        if start >= self.rows.len() {
            &[]
        } else {
            &self.rows[start..end]
        }
    }

    pub fn next_page(&mut self) {
        self.page = (self.page + 1).min(self.max_page());
    }

    pub fn prev_page(&mut self) {
        self.page = self.page.saturating_sub(1);
    }

    /// Sort by a column key, toggling direction: if the column currently
    /// reads ascending (first ≤ last), sort descending, else ascending.
    /// Unknown keys are ignored.
    pub fn sort_by(&mut self, key: &str) {
        let idx = match self.columns.iter().position(|c| c.key == key) {
            Some(i) => i,
            None => return,
        };
        if self.rows.len() < 2 {
            return;
        }

        let first = &self.rows[0].cells[idx];
        let last = &self.rows[self.rows.len() - 1].cells[idx];
        let currently_ascending = compare_cells(first, last) != Ordering::Greater;

        self.rows.sort_by(|a, b| compare_cells(&a.cells[idx], &b.cells[idx]));
        if currently_ascending {
            self.rows.reverse();
        }
        self.page = 0;
    }
}

/// Cell ordering: nulls first, string equality first, then numeric
/// coercion, then lexicographic.
fn compare_cells(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => {
            let (sa, sb) = (a.display(), b.display());
            if sa == sb {
                return Ordering::Equal;
            }
            match (a.as_f64(), b.as_f64()) {
                (Some(fa), Some(fb)) => fa.partial_cmp(&fb).unwrap_or(Ordering::Equal),
                _ => sa.cmp(&sb),
            }
        }
    }
}

fn auto_columns(data: &[Row]) -> Vec<TableColumn> {
    let first = match data.first() {
        Some(r) => r,
        None => return Vec::new(),
    };
    first
        .keys()
        .filter(|k| k.chars().next().map(char::is_lowercase).unwrap_or(false))
        .map(|k| TableColumn::new(k, k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use livemark_core::value::row;

    fn data() -> Vec<Row> {
        vec![
            row([("id", Value::Int(1)), ("title", Value::from("b-task")), ("score", Value::Int(5))]),
            row([("id", Value::Int(2)), ("title", Value::from("a-task")), ("score", Value::Int(10))]),
            row([("id", Value::Int(3)), ("title", Value::from("c-task")), ("score", Value::Null)]),
        ]
    }

    #[test]
    fn auto_columns_from_first_row() {
        let t = DataTable::build(&data(), &[], 0, 10);
        let keys: Vec<&str> = t.columns.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, ["id", "title", "score"]);
    }

    #[test]
    fn explicit_columns_win() {
        let cols = parse_columns("title:Title,score:Score");
        let t = DataTable::build(&data(), &cols, 0, 10);
        assert_eq!(t.columns.len(), 2);
        assert_eq!(t.columns[0].label, "Title");
    }

    #[test]
    fn row_ids_prefer_id_field() {
        let t = DataTable::build(&data(), &[], 0, 10);
        assert_eq!(t.page_rows()[0].id, "1");

        let anon = vec![row([("x", Value::Int(9))])];
        let t = DataTable::build(&anon, &[], 0, 10);
        assert_eq!(t.page_rows()[0].id, "row-0");
    }

    #[test]
    fn sort_toggles_direction() {
        let mut t = DataTable::build(&data(), &[], 0, 10);
        // score column currently reads ascending-ish (5 … null)? First=5,
        // last=null → null sorts first → descending toggle applies.
        t.sort_by("title");
        let titles: Vec<String> = t.page_rows().iter().map(|r| r.cells[1].display()).collect();
        assert_eq!(titles, ["c-task", "b-task", "a-task"]);

        t.sort_by("title");
        let titles: Vec<String> = t.page_rows().iter().map(|r| r.cells[1].display()).collect();
        assert_eq!(titles, ["a-task", "b-task", "c-task"]);
    }

    #[test]
    fn nulls_sort_first_ascending() {
        let mut t = DataTable::build(&data(), &[], 0, 10);
        // Current order by score: 5, 10, null → first=5 vs last=null reads
        // descending, so the first toggle sorts ascending.
        t.sort_by("score");
        let scores: Vec<String> = t.page_rows().iter().map(|r| r.cells[2].display()).collect();
        assert_eq!(scores, ["", "5", "10"]);
    }

    #[test]
    fn numeric_coercion_beats_lexicographic() {
        let rows = vec![
            row([("n", Value::from("9"))]),
            row([("n", Value::from("10"))]),
        ];
        let mut t = DataTable::build(&rows, &[], 0, 10);
        // "9" vs "10": numerically ascending means 9 < 10, current order
        // reads descending lexicographically? compare_cells coerces: 9 < 10
        // so current order is ascending → toggle sorts descending.
        t.sort_by("n");
        let ns: Vec<String> = t.page_rows().iter().map(|r| r.cells[0].display()).collect();
        assert_eq!(ns, ["10", "9"]);
    }

    #[test]
    fn pagination_clamps() {
        let rows: Vec<Row> = (0..25).map(|i| row([("id", Value::Int(i))])).collect();
        let mut t = DataTable::build(&rows, &[], 0, 10);
        assert_eq!(t.page_count(), 3);
        assert_eq!(t.page_rows().len(), 10);

        t.next_page();
        t.next_page();
        assert_eq!(t.page, 2);
        assert_eq!(t.page_rows().len(), 5);

        t.next_page();
        assert_eq!(t.page, 2);

        t.prev_page();
        assert_eq!(t.page, 1);
    }

    #[test]
    fn empty_table() {
        let t = DataTable::build(&[], &[], 0, 10);
        assert!(t.columns.is_empty());
        assert_eq!(t.page_count(), 1);
        assert!(t.page_rows().is_empty());
    }
}
