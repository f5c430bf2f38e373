//! Configuration module
//!
//! This module contains the configuration for one harness run: node identity,
//! which scenario to execute, the queue and counter settings and how nodes
//! synchronize. The configuration is loaded from a YAML file using the serde
//! library, then environment variables set by the launcher override the node
//! identity and the session directory.

use crate::queue::QueueOrder;
use crate::scenario::Scenario;
use crate::HarnessError;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable carrying the 0-based node index
pub const ENV_NODE_ID: &str = "HARNESS_NODE_ID";
/// Environment variable carrying the number of participating nodes
pub const ENV_NODE_COUNT: &str = "HARNESS_NODE_COUNT";
/// Environment variable carrying the session directory shared by the nodes
pub const ENV_WORK_DIR: &str = "HARNESS_WORK_DIR";
/// Environment variable that keeps the session directory after a launch
pub const ENV_KEEP_WORK_DIR: &str = "HARNESS_KEEP_WORK_DIR";

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Configuration for a harness run
pub struct HarnessConfig {
    /// Index of this node, 0 is the reporting node
    pub node_id: u32,
    /// Total number of nodes taking part in the run
    pub participant_count: u32,
    /// Fixture to execute
    pub scenario: Scenario,
    /// Capacity of the scenario queue
    pub queue_capacity: usize,
    /// Removal order of the scenario queue
    pub queue_order: QueueOrder,
    /// File holding the shared counter
    pub counter_path: PathBuf,
    /// Session directory holding barrier state
    pub work_dir: PathBuf,
    /// Keep the session directory after a launch finishes
    pub keep_work_dir: bool,
    /// Synchronization configuration
    pub sync: SyncConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            node_id: 0,
            participant_count: 1,
            scenario: Scenario::QueueInt,
            queue_capacity: 10,
            queue_order: QueueOrder::Fifo,
            counter_path: std::env::temp_dir().join("_node_harness_counter.dat"),
            work_dir: std::env::temp_dir().join("node_harness"),
            keep_work_dir: false,
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
/// How nodes reach each other
pub enum SyncMode {
    /// Hooks do nothing; only meaningful for a single node
    #[default]
    Noop,
    /// Barrier state and locks live in files under the session directory
    File,
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Configuration for barriers and locks
pub struct SyncConfig {
    /// Which hook implementation to use
    pub mode: SyncMode,
    /// Delay between polls of a file barrier in milliseconds
    pub poll_interval_ms: u64,
    /// Optional barrier deadline in milliseconds; absent means wait forever
    pub timeout_ms: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            mode: SyncMode::Noop,
            poll_interval_ms: 10,
            timeout_ms: None,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Implementation of the HarnessConfig struct
impl HarnessConfig {
    /// Load configuration from a YAML file.
    /// # Arguments
    /// * `filename` - The name of the file to load.
    /// # Returns
    /// * The configuration object, not yet validated.
    /// # Errors
    /// * If the file cannot be read or the YAML cannot be parsed.
    pub fn from_yaml(filename: &str) -> Result<Self, HarnessError> {
        let contents = std::fs::read_to_string(filename)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// The node id the launcher assigned to this process, if any
    pub fn node_id_from_env() -> Option<u32> {
        std::env::var(ENV_NODE_ID).ok()?.trim().parse().ok()
    }

    /// Override fields from the process environment
    pub fn apply_env(&mut self) -> Result<(), HarnessError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override fields from any key lookup; split out so tests need not touch
    /// the process environment.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), HarnessError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup(ENV_NODE_ID) {
            self.node_id = parse_var(ENV_NODE_ID, &id)?;
        }
        if let Some(count) = lookup(ENV_NODE_COUNT) {
            self.participant_count = parse_var(ENV_NODE_COUNT, &count)?;
        }
        if let Some(dir) = lookup(ENV_WORK_DIR) {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(keep) = lookup(ENV_KEEP_WORK_DIR) {
            self.keep_work_dir = keep.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    /// Reject configurations no run can satisfy
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.participant_count == 0 {
            return Err(HarnessError::InvalidConfig(
                "participant_count must be at least 1".to_string(),
            ));
        }
        if self.node_id >= self.participant_count {
            return Err(HarnessError::InvalidConfig(format!(
                "node_id {} is out of range for {} participants",
                self.node_id, self.participant_count
            )));
        }
        if self.queue_capacity == 0 {
            return Err(HarnessError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.participant_count > 1 && self.sync.mode == SyncMode::Noop {
            return Err(HarnessError::InvalidConfig(format!(
                "{} participants need `sync.mode: file`; noop hooks neither lock nor wait",
                self.participant_count
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, HarnessError> {
    value
        .trim()
        .parse()
        .map_err(|_| HarnessError::InvalidConfig(format!("{key}={value:?} is not a number")))
}
