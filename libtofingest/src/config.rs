use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

/// How many decode workers the engine should use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parallelism {
    /// Pick serial or parallel from the event count and the hardware
    #[default]
    Auto,
    /// One worker, blocks processed in index order
    Serial,
    /// One worker per available hardware thread
    Parallel,
}

/// Structure representing one ingestion run's configuration. Contains pathing
/// and decode options. Configs are serializable and deserializable to YAML
/// using serde and serde_yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub event_file_path: PathBuf,
    pub pulse_file_path: Option<PathBuf>,
    pub sensor_map_path: Option<PathBuf>,
    /// Largest logical sensor id the instrument declares; anything above
    /// this is routed to the attribution-failure bucket
    pub max_sensor_id: u32,
    /// Fail the run if the pulse file is missing or malformed
    pub require_pulse_file: bool,
    /// Restrict ingestion to one contiguous slice of the event file
    pub chunk_index: Option<usize>,
    pub total_chunks: Option<usize>,
    /// Allow-list of logical sensor ids; events on other sensors are counted
    /// as ignored
    pub selected_sensor_ids: Option<Vec<u32>>,
    pub parallelism: Parallelism,
    pub max_events_override: Option<u64>,
    /// Where to write the per-sensor event count summary, if anywhere
    pub summary_path: Option<PathBuf>,
}

impl Default for Config {
    /// Generate a new Config object. All fields will be empty/invalid
    fn default() -> Self {
        Self {
            event_file_path: PathBuf::from("None"),
            pulse_file_path: None,
            sensor_map_path: None,
            max_sensor_id: 0,
            require_pulse_file: false,
            chunk_index: None,
            total_chunks: None,
            selected_sensor_ids: None,
            parallelism: Parallelism::Auto,
            max_events_override: None,
            summary_path: None,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// The chunk slice this run is restricted to, if any.
    ///
    /// chunk_index and total_chunks must be given together, and the index
    /// must be inside the chunk count.
    pub fn chunk(&self) -> Result<Option<(usize, usize)>, ConfigError> {
        match (self.chunk_index, self.total_chunks) {
            (None, None) => Ok(None),
            (Some(index), Some(total)) if total > 0 && index < total => Ok(Some((index, total))),
            (index, total) => Err(ConfigError::BadChunkSelection(
                index.unwrap_or(usize::MAX),
                total.unwrap_or(0),
            )),
        }
    }
}
