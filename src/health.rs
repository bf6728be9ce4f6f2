use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use crate::handlers::AppState;
use crate::snapshot::unix_seconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStatus {
    /// Fresh data is being served.
    Ok,
    /// The last successful refresh is older than the staleness threshold.
    Stale,
    /// No refresh has succeeded yet.
    Empty,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: DataStatus,
    pub refreshing: bool,
    pub generation: u64,
    pub last_updated: Option<u64>,
    pub staleness_seconds: Option<u64>,
    pub tracked_clients: usize,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthReport {
    pub fn collect(state: &AppState, now: SystemTime) -> Self {
        let snapshot = state.store.snapshot();
        let last_updated = snapshot.last_updated();
        let staleness = last_updated.map(|t| now.duration_since(t).unwrap_or_default());

        Self {
            status: classify(staleness, state.stale_after),
            refreshing: state.store.is_refreshing(),
            generation: snapshot.generation(),
            last_updated: last_updated.map(unix_seconds),
            staleness_seconds: staleness.map(|age| age.as_secs()),
            tracked_clients: state.admission.len(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
        }
    }
}

fn classify(staleness: Option<Duration>, stale_after: Duration) -> DataStatus {
    match staleness {
        None => DataStatus::Empty,
        Some(age) if age > stale_after => DataStatus::Stale,
        Some(_) => DataStatus::Ok,
    }
}
