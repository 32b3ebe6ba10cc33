use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("Failed to read MIB header: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Malformed MIB header: found {0} fields, expected at least {1}")]
    MissingFields(usize, usize),
    #[error("Malformed MIB header: field {index} ({value:?}) is not a valid integer")]
    BadInteger { index: usize, value: String },
    #[error("Malformed MIB header: field {index} ({value:?}) is not a valid number")]
    BadFloat { index: usize, value: String },
    #[error("Malformed MIB header: unsupported sensor layout {0:?}; expected 1x1 or 2x2")]
    UnsupportedLayout(String),
    #[error("Unsupported MIB encoding: pixel depth code {0:?}; expected R64, U16 or U08")]
    UnsupportedEncoding(String),
    #[error("Unsupported MIB encoding: counter depth {0}; expected 1, 6, 12 or 24")]
    UnsupportedCounterDepth(u32),
    #[error("Malformed MIB header: data offset {0} is out of range")]
    DataOffsetOutOfRange(usize),
    #[error("Could not parse MIB acquisition timestamp {0:?}")]
    TimestampParse(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to decode MIB frames due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Failed to decode MIB frames due to header error: {0}")]
    HeaderError(#[from] HeaderError),
    #[error("MIB file of {file_size} bytes is too small to hold a single {frame_size} byte frame")]
    ShortFile { file_size: usize, frame_size: usize },
    #[error("Failed to shape decoded MIB frames: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlyBackError {
    #[error("Fly-back detection received an empty intensity signal")]
    EmptySignal,
    #[error("Fly-back detection found {0} peaks; at least 2 are required to measure a line")]
    TooFewPeaks(usize),
    #[error("Fly-back detection found {lines} complete lines of {line_length} frames after skipping {skip}; at least 2 are required")]
    TooFewLines {
        skip: usize,
        line_length: usize,
        lines: usize,
    },
}

#[derive(Debug, Error)]
pub enum ReshapeError {
    #[error("Scan of {scan_x}x{scan_y} needs {requested} frames but only {available} are available")]
    InsufficientFrames {
        scan_x: usize,
        scan_y: usize,
        requested: usize,
        available: usize,
    },
    #[error("Scan size {0}x{1} is not valid")]
    InvalidScanSize(usize, usize),
    #[error("Fly-back detection failed: {0}")]
    FlyBack(#[from] FlyBackError),
    #[error("Failed to reshape frame stack: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Sink failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Sink could not store attribute {name}: {reason}")]
    InvalidAttribute { name: String, reason: String },
    #[error("Sink failed to read frames: {0}")]
    DecodeError(#[from] DecodeError),
    #[cfg(feature = "hdf5")]
    #[error("Sink failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Conversion failed due to header error: {0}")]
    HeaderError(#[from] HeaderError),
    #[error("Conversion failed due to decode error: {0}")]
    DecodeError(#[from] DecodeError),
    #[error("Conversion failed due to reshape error: {0}")]
    ReshapeError(#[from] ReshapeError),
    #[error("Conversion failed due to sink error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Conversion failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Acquisition directory {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Discovery failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Discovery failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Discovery error: {0}")]
    DiscoveryError(#[from] DiscoveryError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watcher failed due to Discovery error: {0}")]
    DiscoveryError(#[from] DiscoveryError),
    #[error("Watcher failed due to Processor error: {0}")]
    ProcessorError(#[from] ProcessorError),
}
