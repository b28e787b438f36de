use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordFileError {
    #[error("Could not open record file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Record file {path:?} is {length} bytes, not a multiple of the {record_size} byte record size")]
    NotARecordMultiple {
        path: PathBuf,
        length: u64,
        record_size: usize,
    },
    #[error("Record file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PulseFileError {
    #[error("Pulse file failed due to record file error: {0}")]
    FileError(#[from] RecordFileError),
}

#[derive(Debug, Error)]
pub enum SensorMapError {
    #[error("Sensor map failed due to record file error: {0}")]
    FileError(#[from] RecordFileError),
    #[error("Sensor map entry {entry} exceeds the map's own bound of {bound} entries")]
    EntryOutOfBounds { entry: u32, bound: u32 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config chunk selection is invalid -- chunk_index: {0}, total_chunks: {1}")]
    BadChunkSelection(usize, usize),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Ingestion failed due to record file error: {0}")]
    RecordFile(#[from] RecordFileError),
    #[error("Ingestion failed due to pulse file error: {0}")]
    PulseFile(#[from] PulseFileError),
    #[error("Ingestion failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Ingestion failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("An ingestion worker panicked")]
    WorkerPanic,
}
