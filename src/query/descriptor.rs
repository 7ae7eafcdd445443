use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::{Column, Row};

pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 10_000;
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Anything other than a case-insensitive `desc` sorts ascending.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Case-insensitive substring patterns per known column.
///
/// Patterns are stored trimmed and lowercased; blank patterns are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filters(BTreeMap<Column, String>);

impl Filters {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a pattern. Returns false when the pattern is blank and was ignored.
    pub fn insert(&mut self, column: Column, pattern: &str) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            self.0.remove(&column);
            return false;
        }
        self.0.insert(column, pattern.to_lowercase());
        true
    }

    pub fn with(mut self, column: Column, pattern: &str) -> Self {
        self.insert(column, pattern);
        self
    }

    pub fn get(&self, column: Column) -> Option<&str> {
        self.0.get(&column).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Column, &str)> {
        self.0.iter().map(|(c, p)| (*c, p.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A row matches when every pattern is a substring of the column's
    /// lowercased display text. A missing column never matches a pattern.
    pub fn matches(&self, row: &Row) -> bool {
        self.0.iter().all(|(column, pattern)| {
            row.text(*column)
                .map(|text| text.to_lowercase().contains(pattern.as_str()))
                .unwrap_or(false)
        })
    }
}

/// Validated filter/sort/pagination request, shared by every operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    pub page: u64,
    pub page_size: usize,
    pub sort_column: Column,
    pub sort_direction: SortDirection,
    pub filters: Filters,
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_column: Column::DEFAULT_SORT,
            sort_direction: SortDirection::Asc,
            filters: Filters::new(),
        }
    }
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = clamp_page_size(page_size);
        self
    }

    pub fn with_sort(mut self, column: Column, direction: SortDirection) -> Self {
        self.sort_column = column;
        self.sort_direction = direction;
        self
    }

    pub fn with_filter(mut self, column: Column, pattern: &str) -> Self {
        self.filters.insert(column, pattern);
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Page size in the valid range, even for a hand-built or deserialized
    /// descriptor.
    pub fn effective_page_size(&self) -> usize {
        clamp_page_size(self.page_size)
    }

    /// Zero-based index of the first row on this page.
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.effective_page_size())
    }

    /// `ceil(total / page_size)`; zero for an empty result.
    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.effective_page_size() as u64)
    }

    /// Pull the page back to the last valid one for `total` rows.
    pub fn clamped_to(&self, total: u64) -> Self {
        let last = self.total_pages(total).max(1);
        let mut clamped = self.clone();
        clamped.page = self.page.clamp(1, last);
        clamped
    }

    /// Same filters and sort, first page, `chunk_size` rows per page.
    pub fn chunked(&self, chunk_size: usize) -> Self {
        let mut chunk = self.clone();
        chunk.page = 1;
        chunk.page_size = clamp_page_size(chunk_size);
        chunk
    }

    /// Wire parameters, in a fixed order. Used for remote URLs and as the
    /// page cache key.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("pageSize".to_string(), self.effective_page_size().to_string()),
            ("sortBy".to_string(), self.sort_column.name().to_string()),
            ("sortDir".to_string(), self.sort_direction.as_str().to_string()),
        ];
        pairs.extend(
            self.filters
                .iter()
                .map(|(column, pattern)| (column.name().to_string(), pattern.to_string())),
        );
        pairs
    }

    /// Filter parameters only, for count requests.
    pub fn filter_pairs(filters: &Filters) -> Vec<(String, String)> {
        filters
            .iter()
            .map(|(column, pattern)| (column.name().to_string(), pattern.to_string()))
            .collect()
    }

    /// Canonical serialized form.
    pub fn cache_key(&self) -> String {
        let pairs = self.query_pairs();
        serde_urlencoded::to_string(&pairs).unwrap_or_else(|_| format!("{:?}", pairs))
    }
}

pub fn clamp_page_size(page_size: usize) -> usize {
    page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}
