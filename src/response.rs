use serde::Serialize;

use crate::snapshot::{Group, QualityReport, Record};

/// One page of a listing.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub generation: u64,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub items: Vec<Record>,
    pub total: usize,
    pub generation: u64,
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    #[serde(flatten)]
    pub group: Group,
    pub member_count: usize,
}

#[derive(Debug, Serialize)]
pub struct QualityResponse {
    pub generation: u64,
    pub last_updated: Option<u64>,
    #[serde(flatten)]
    pub report: QualityReport,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse<'a> {
    pub generation: u64,
    pub last_updated: Option<u64>,
    pub records: &'a [Record],
    pub groups: &'a [Group],
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: &'static [&'static str],
}

impl IndexResponse {
    pub fn new() -> Self {
        Self {
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            endpoints: &[
                "/health",
                "/quality",
                "/records",
                "/records/:id",
                "/records/alias/:code",
                "/records/legacy/:code",
                "/groups",
                "/groups/:id",
                "/export",
            ],
        }
    }
}

impl Default for IndexResponse {
    fn default() -> Self {
        Self::new()
    }
}
