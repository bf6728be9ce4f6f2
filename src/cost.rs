//! Token prices for inbound requests.
//!
//! A price tracks how expensive an operation is to serve, not how often it
//! is called. Paths nobody routes still cost something so that scanning
//! for endpoints is never free.

use std::collections::HashMap;

pub const STATIC_COST: u64 = 1;
pub const DEFAULT_COST: u64 = 5;
pub const LOOKUP_COST: u64 = 5;
pub const CODE_LOOKUP_COST: u64 = 10;
pub const LISTING_COST: u64 = 20;
pub const FILTERED_LISTING_COST: u64 = 30;
pub const SEARCH_COST: u64 = 50;
pub const EXPORT_COST: u64 = 200;

/// Price of serving `path` with the given query parameters.
///
/// A `/records` request carrying both `q` and `page` is ambiguous; it is
/// charged [`DEFAULT_COST`] and left for the handler to reject.
pub fn cost(path: &str, params: &HashMap<String, String>) -> u64 {
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    match segments.as_slice() {
        [] | ["health"] => STATIC_COST,
        ["quality"] => LOOKUP_COST,
        ["export"] => EXPORT_COST,
        ["records"] => records_listing_cost(params),
        ["records", "alias" | "legacy", _] => CODE_LOOKUP_COST,
        ["records", _] | ["groups", _] => LOOKUP_COST,
        ["groups"] => LISTING_COST,
        _ => DEFAULT_COST,
    }
}

fn records_listing_cost(params: &HashMap<String, String>) -> u64 {
    let search = params.contains_key("q");
    let paged = params.contains_key("page");

    match (search, paged) {
        (true, true) => DEFAULT_COST,
        (true, false) => SEARCH_COST,
        (false, _) if params.contains_key("group") => FILTERED_LISTING_COST,
        (false, _) => LISTING_COST,
    }
}
