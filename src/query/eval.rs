//! In-memory evaluation of a descriptor: filter, stable sort, page slice.
//!
//! The local adapter and the test doubles both evaluate through here, so
//! ordering rules live in exactly one place.

use std::cmp::Ordering;

use super::descriptor::{QueryDescriptor, SortDirection};
use crate::schema::{display_value, Column, Row};
use serde_json::Value;

#[derive(Debug, PartialEq)]
enum SortKey {
    Missing,
    Number(f64),
    Text(String),
}

impl SortKey {
    fn of(row: &Row, column: Column) -> SortKey {
        let value = match row.get(column) {
            None | Some(Value::Null) => return SortKey::Missing,
            Some(v) => v,
        };
        if column.is_numeric() {
            if matches!(value, Value::String(s) if s.trim().is_empty()) {
                return SortKey::Missing;
            }
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            if let Some(n) = parsed {
                return SortKey::Number(n);
            }
        }
        SortKey::Text(display_value(value))
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Missing => 0,
            SortKey::Number(_) => 1,
            SortKey::Text(_) => 2,
        }
    }

    fn cmp(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Compare two rows on one column. Missing values sort first ascending.
pub fn compare_rows(a: &Row, b: &Row, column: Column, direction: SortDirection) -> Ordering {
    let ord = SortKey::of(a, column).cmp(&SortKey::of(b, column));
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

/// Stable sort: ties keep their incoming order in both directions.
pub fn sort_rows(rows: &mut [Row], column: Column, direction: SortDirection) {
    rows.sort_by(|a, b| compare_rows(a, b, column, direction));
}

/// Half-open row range of the descriptor's page within `len` rows.
pub fn page_window(descriptor: &QueryDescriptor, len: usize) -> std::ops::Range<usize> {
    let start = descriptor.offset().min(len);
    let end = start.saturating_add(descriptor.effective_page_size()).min(len);
    start..end
}

/// Filter, sort and slice. Returns the filtered total and the page rows.
pub fn apply<I>(rows: I, descriptor: &QueryDescriptor) -> (u64, Vec<Row>)
where
    I: IntoIterator<Item = Row>,
{
    let mut matched: Vec<Row> = rows
        .into_iter()
        .filter(|row| descriptor.filters.matches(row))
        .collect();
    let total = matched.len() as u64;
    sort_rows(&mut matched, descriptor.sort_column, descriptor.sort_direction);
    let window = page_window(descriptor, matched.len());
    let page = matched.drain(window).collect();
    (total, page)
}
