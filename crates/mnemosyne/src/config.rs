//! Event-interface configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mnemosyne_dag::{LoggerConfig, LoggerError};
use mnemosyne_types::Name;

/// Full logger configuration: the DAG engine settings plus everything the
/// event interface needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DAG engine configuration.
    pub logger: LoggerConfig,

    /// Pub/sub groups events arrive on.
    pub ps_interface_prefixes: Vec<Name>,

    /// Raw sync groups events arrive on.
    pub sync_interface_prefixes: Vec<Name>,

    /// Lower bound of the randomized publish delay, milliseconds.
    pub insert_backoff_min_ms: u64,

    /// Upper bound of the randomized publish delay, milliseconds.
    pub insert_backoff_max_ms: u64,

    /// Operations between self-inserted-set resets.
    pub self_insert_reset_freq: u32,

    /// Window of the seen-event deduplication set.
    pub seen_event_ttl: Duration,

    /// Grace period before events are accepted after startup.
    pub startup_delay: Duration,

    /// Fetch retries on the interface sync groups.
    pub interface_sync_retries: u32,
}

impl Config {
    /// Interface defaults around the given engine configuration.
    pub fn new(logger: LoggerConfig) -> Self {
        Config {
            logger,
            ps_interface_prefixes: Vec::new(),
            sync_interface_prefixes: Vec::new(),
            insert_backoff_min_ms: 0,
            insert_backoff_max_ms: 1000,
            self_insert_reset_freq: 100,
            seen_event_ttl: Duration::from_secs(60),
            startup_delay: Duration::from_secs(5),
            interface_sync_retries: 3,
        }
    }

    /// Check interface settings on top of the engine's own validation.
    pub fn validate(&self) -> Result<(), LoggerError> {
        self.logger.validate()?;
        if self.insert_backoff_min_ms > self.insert_backoff_max_ms {
            return Err(LoggerError::Config(format!(
                "insert backoff bounds are inverted: {} > {}",
                self.insert_backoff_min_ms, self.insert_backoff_max_ms
            )));
        }
        Ok(())
    }
}
