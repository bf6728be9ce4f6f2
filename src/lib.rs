pub mod admission;
pub mod clock;
pub mod config;
pub mod cost;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod producer;
pub mod refresh;
pub mod response;
pub mod server;
pub mod snapshot;
pub mod task;
pub mod token_bucket;
pub mod validation;

pub use admission::{Admission, AdmissionRegistry};
pub use config::Config;
pub use error::{Error, Result};
pub use server::{create_app, Server};
pub use snapshot::{Snapshot, SnapshotStore};
