//! Replacing the served dataset.
//!
//! A refresh claims the store's refresh flag, runs the producer on the
//! blocking pool and publishes the result only if production succeeded.
//! A failed or panicked producer leaves the previous generation in place.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::producer::DatasetProducer;
use crate::snapshot::SnapshotStore;
use crate::task::{PeriodicTask, TaskState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another refresh held the flag.
    Skipped,
    /// The producer failed; nothing was published.
    Aborted(String),
    Replaced { generation: u64, records: usize },
}

#[derive(Clone)]
pub struct RefreshOrchestrator {
    store: Arc<SnapshotStore>,
    producer: Arc<dyn DatasetProducer>,
}

impl RefreshOrchestrator {
    pub fn new(store: Arc<SnapshotStore>, producer: Arc<dyn DatasetProducer>) -> Self {
        Self { store, producer }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_guard) = self.store.try_begin_refresh() else {
            info!("Refresh already in progress, skipping");
            return RefreshOutcome::Skipped;
        };

        info!("Dataset refresh started");
        let producer = Arc::clone(&self.producer);
        let produced = tokio::task::spawn_blocking(move || producer.produce()).await;

        let snapshot = match produced {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                error!(error = %err, "Dataset refresh aborted, keeping previous data");
                return RefreshOutcome::Aborted(err.to_string());
            }
            Err(err) => {
                error!(error = %err, "Dataset producer panicked, keeping previous data");
                return RefreshOutcome::Aborted(err.to_string());
            }
        };

        let records = snapshot.records().len();
        let quality = Arc::clone(snapshot.quality());
        let generation = self.store.replace(snapshot);

        info!(generation, records, groups = quality.group_count, "Dataset replaced");
        if !quality.is_clean() {
            warn!(
                generation,
                duplicate_record_ids = quality.duplicate_record_ids,
                duplicate_group_ids = quality.duplicate_group_ids,
                orphan_records = quality.orphan_records,
                dangling_aliases = quality.dangling_aliases,
                dangling_legacy_codes = quality.dangling_legacy_codes,
                duplicate_codes = quality.duplicate_codes,
                "Dataset has quality issues"
            );
        }

        RefreshOutcome::Replaced {
            generation,
            records,
        }
    }
}

/// Periodic trigger for [`RefreshOrchestrator::refresh`].
///
/// The first refresh runs as soon as the scheduler starts.
pub struct RefreshScheduler {
    orchestrator: RefreshOrchestrator,
    every: Duration,
    task: PeriodicTask,
}

impl RefreshScheduler {
    pub fn new(orchestrator: RefreshOrchestrator, every: Duration) -> Self {
        Self {
            orchestrator,
            every,
            task: PeriodicTask::new("dataset_refresh"),
        }
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Spawns the trigger loop. Returns false if already started or stopped.
    pub fn start(&self) -> bool {
        let orchestrator = self.orchestrator.clone();
        self.task.start(self.every, move || {
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator.refresh().await;
            }
        })
    }

    /// Stops the trigger loop and waits for an in-flight refresh to finish.
    pub async fn stop(&self) {
        self.task.stop().await;
    }
}
