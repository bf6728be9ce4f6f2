use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::snapshot::{Snapshot, SourceTables};

/// Produces a complete dataset generation or fails as a whole.
///
/// Implementations may block; callers run them off the async workers.
pub trait DatasetProducer: Send + Sync {
    fn produce(&self) -> Result<Snapshot>;
}

/// Reads the dataset from a JSON document with `records`, `groups`,
/// `aliases` and `legacy_codes` arrays.
#[derive(Debug, Clone)]
pub struct JsonFileProducer {
    path: PathBuf,
}

impl JsonFileProducer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetProducer for JsonFileProducer {
    fn produce(&self) -> Result<Snapshot> {
        debug!(path = %self.path.display(), "Reading dataset file");
        let reader = BufReader::new(File::open(&self.path)?);
        let source: SourceTables = serde_json::from_reader(reader)?;
        Ok(Snapshot::build(source))
    }
}
