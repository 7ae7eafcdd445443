//! Raw request parameters → [`QueryDescriptor`].
//!
//! Planning is total: malformed values are normalized rather than rejected.
//! The sort column is checked against the known-column allow-list before it
//! can reach any backend query string.

use std::collections::{BTreeMap, HashMap};

use super::descriptor::{
    clamp_page_size, Filters, QueryDescriptor, SortDirection, DEFAULT_PAGE_SIZE,
};
use crate::error::{MirrorError, MirrorResult};
use crate::schema::Column;

const PAGE_KEYS: &[&str] = &["page"];
const PAGE_SIZE_KEYS: &[&str] = &["pageSize", "page_size"];
const SORT_COLUMN_KEYS: &[&str] = &["sortBy", "sortColumn", "sort_by"];
const SORT_DIRECTION_KEYS: &[&str] = &["sortDir", "sortDirection", "sort_dir"];

pub type RawParams = HashMap<String, String>;

pub fn plan(raw: &RawParams) -> QueryDescriptor {
    let page = lookup(raw, PAGE_KEYS)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(1)
        .max(1) as u64;

    let page_size = lookup(raw, PAGE_SIZE_KEYS)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|n| n.clamp(1, i64::MAX) as usize)
        .map(clamp_page_size)
        .unwrap_or(DEFAULT_PAGE_SIZE);

    let sort_column = match lookup(raw, SORT_COLUMN_KEYS) {
        Some(requested) => Column::resolve(requested).unwrap_or_else(|| {
            tracing::debug!(
                "Unknown sort column {:?}, falling back to {}",
                requested,
                Column::DEFAULT_SORT
            );
            Column::DEFAULT_SORT
        }),
        None => Column::DEFAULT_SORT,
    };

    let sort_direction = lookup(raw, SORT_DIRECTION_KEYS)
        .map(SortDirection::parse)
        .unwrap_or_default();

    let filters = plan_filters(raw);

    QueryDescriptor {
        page,
        page_size,
        sort_column,
        sort_direction,
        filters,
    }
}

/// Plan from an urlencoded query string. Fails only when the string cannot be
/// decoded at all; later duplicates of a key win.
pub fn plan_query_string(query: &str) -> MirrorResult<QueryDescriptor> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query.trim_start_matches('?'))
        .map_err(|e| MirrorError::Validation(format!("undecodable query string: {}", e)))?;
    let raw: RawParams = pairs.into_iter().collect();
    Ok(plan(&raw))
}

/// Case variants of a column name can arrive together. The canonical spelling
/// wins, otherwise the first non-blank variant in key order. Blank values never
/// displace a pattern.
fn plan_filters(raw: &RawParams) -> Filters {
    let mut keys: Vec<&String> = raw.keys().collect();
    keys.sort();

    let mut chosen: BTreeMap<Column, (bool, &str)> = BTreeMap::new();
    for key in keys {
        let Some(column) = Column::from_name(key) else {
            continue;
        };
        let value = raw[key].as_str();
        if value.trim().is_empty() {
            continue;
        }
        let exact = key.trim() == column.name();
        match chosen.get(&column) {
            Some((true, _)) => {}
            Some((false, _)) if !exact => {}
            _ => {
                chosen.insert(column, (exact, value));
            }
        }
    }

    let mut filters = Filters::new();
    for (column, (_, value)) in chosen {
        filters.insert(column, value);
    }
    filters
}

fn lookup<'a>(raw: &'a RawParams, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| raw.get(*k))
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}
