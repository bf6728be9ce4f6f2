use envconfig::Envconfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::token_bucket::BucketPolicy;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// JSON dataset file read on every refresh
    #[envconfig(from = "DATA_FILE", default = "data/dataset.json")]
    pub data_file: PathBuf,

    /// Seconds between dataset refreshes (twice daily by default)
    #[envconfig(from = "REFRESH_INTERVAL_SECS", default = "43200")]
    pub refresh_interval_secs: u64,

    /// Token bucket capacity per client
    #[envconfig(from = "BUCKET_CAPACITY", default = "1000")]
    pub bucket_capacity: u64,

    /// Tokens added per second to each client bucket
    #[envconfig(from = "BUCKET_FILL_RATE", default = "3")]
    pub bucket_fill_rate: f64,

    /// Seconds between idle bucket sweeps
    #[envconfig(from = "SWEEP_INTERVAL_SECS", default = "300")]
    pub sweep_interval_secs: u64,

    /// Age after which health reports the data as stale
    #[envconfig(from = "STALE_AFTER_SECS", default = "93600")]
    pub stale_after_secs: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket_capacity == 0 {
            return Err(Error::Configuration(
                "BUCKET_CAPACITY must be greater than 0".to_string(),
            ));
        }
        if !(self.bucket_fill_rate.is_finite() && self.bucket_fill_rate > 0.0) {
            return Err(Error::Configuration(
                "BUCKET_FILL_RATE must be a positive number".to_string(),
            ));
        }
        if self.refresh_interval_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(Error::Configuration(
                "Refresh and sweep intervals must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bucket_policy(&self) -> BucketPolicy {
        BucketPolicy {
            capacity: self.bucket_capacity,
            fill_rate: self.bucket_fill_rate,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_file: PathBuf::from("data/dataset.json"),
            refresh_interval_secs: 12 * 60 * 60,
            bucket_capacity: 1000,
            bucket_fill_rate: 3.0,
            sweep_interval_secs: 300,
            stale_after_secs: 26 * 60 * 60,
            log_level: "info".to_string(),
        }
    }
}
