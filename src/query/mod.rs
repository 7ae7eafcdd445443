pub mod descriptor;
pub mod eval;
pub mod planner;

pub use descriptor::{
    clamp_page_size, Filters, QueryDescriptor, SortDirection, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    MIN_PAGE_SIZE,
};
pub use eval::{apply, compare_rows, page_window, sort_rows};
pub use planner::{plan, plan_query_string, RawParams};
