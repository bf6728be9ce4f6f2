use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::admission::AdmissionRegistry;
use crate::error::{Error, Result};
use crate::health::HealthReport;
use crate::response::{
    ExportResponse, GroupResponse, IndexResponse, Page, QualityResponse, SearchResponse,
};
use crate::snapshot::{unix_seconds, Record, SnapshotStore};
use crate::validation::ListQuery;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub admission: AdmissionRegistry,
    pub stale_after: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<SnapshotStore>, admission: AdmissionRegistry, stale_after: Duration) -> Self {
        Self {
            store,
            admission,
            stale_after,
            started_at: Instant::now(),
        }
    }
}

pub async fn index() -> impl IntoResponse {
    Json(IndexResponse::new())
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthReport::collect(&state, SystemTime::now()))
}

pub async fn quality(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();
    Json(QualityResponse {
        generation: snapshot.generation(),
        last_updated: snapshot.last_updated().map(unix_seconds),
        report: snapshot.quality().as_ref().clone(),
    })
}

/// Pages through records, optionally restricted to one group, or runs a
/// case-insensitive name search when `q` is given.
pub async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse> {
    query.check()?;
    let snapshot = state.store.snapshot();

    if let Some(term) = &query.q {
        let needle = term.to_lowercase();
        let matches: Vec<&Record> = snapshot
            .records()
            .iter()
            .filter(|record| query.group.map_or(true, |g| record.group_id == g))
            .filter(|record| record.name.to_lowercase().contains(&needle))
            .collect();
        let total = matches.len();
        let items = matches
            .into_iter()
            .take(query.per_page())
            .cloned()
            .collect();

        return Ok(Json(SearchResponse {
            query: term.clone(),
            items,
            total,
            generation: snapshot.generation(),
        })
        .into_response());
    }

    let matching: Vec<&Record> = snapshot
        .records()
        .iter()
        .filter(|record| query.group.map_or(true, |g| record.group_id == g))
        .collect();

    let items = matching
        .iter()
        .skip(query.offset())
        .take(query.per_page())
        .map(|record| (*record).clone())
        .collect();

    Ok(Json(Page {
        items,
        page: query.page(),
        per_page: query.per_page(),
        total: matching.len(),
        generation: snapshot.generation(),
    })
    .into_response())
}

pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Record>> {
    state
        .store
        .record_index()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("record {id}")))
}

pub async fn get_record_by_alias(
    State(state): State<AppState>,
    Path(code): Path<u64>,
) -> Result<Json<Record>> {
    state
        .store
        .snapshot()
        .record_by_alias(code)
        .cloned()
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("alias code {code}")))
}

pub async fn get_record_by_legacy_code(
    State(state): State<AppState>,
    Path(code): Path<u64>,
) -> Result<Json<Record>> {
    state
        .store
        .snapshot()
        .record_by_legacy_code(code)
        .cloned()
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("legacy code {code}")))
}

pub async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse> {
    query.check()?;
    if query.q.is_some() || query.group.is_some() {
        return Err(Error::InvalidRequest(
            "groups can only be paged".to_string(),
        ));
    }

    let snapshot = state.store.snapshot();
    let groups = snapshot.groups();
    Ok(Json(Page {
        items: groups
            .iter()
            .skip(query.offset())
            .take(query.per_page())
            .cloned()
            .collect(),
        page: query.page(),
        per_page: query.per_page(),
        total: groups.len(),
        generation: snapshot.generation(),
    }))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<GroupResponse>> {
    let snapshot = state.store.snapshot();
    let group = snapshot
        .group(id)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("group {id}")))?;
    let member_count = snapshot
        .records()
        .iter()
        .filter(|record| record.group_id == id)
        .count();

    Ok(Json(GroupResponse {
        group,
        member_count,
    }))
}

/// Full dataset dump of the current generation.
pub async fn export(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();
    let body = ExportResponse {
        generation: snapshot.generation(),
        last_updated: snapshot.last_updated().map(unix_seconds),
        records: snapshot.records(),
        groups: snapshot.groups(),
    };

    match serde_json::to_vec(&body) {
        Ok(bytes) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(err) => Error::from(err).into_response(),
    }
}
