use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::reshape::ReshapePolicy;

/// How a STEM acquisition is folded into a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReshapeMode {
    /// Find the fly-back spike, falling back to the frame size strategy
    #[default]
    FlyBack,
    /// Use scan_x * scan_y anchored to the end of the stack
    FrameSize,
}

/// Structure representing the application configuration. Contains pathing and conversion information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub raw_path: PathBuf,
    pub processing_path: PathBuf,
    pub folder: Option<PathBuf>,
    pub stem: bool,
    pub reshape: ReshapeMode,
    pub scan_x: Option<usize>,
    pub scan_y: Option<usize>,
    pub bin_factor: usize,
    pub n_threads: i32,
    pub poll_interval_secs: u64,
    pub copy_wait_secs: u64,
    pub copy_wait_attempts: u32,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            raw_path: PathBuf::from("None"),
            processing_path: PathBuf::from("None"),
            folder: None,
            stem: true,
            reshape: ReshapeMode::FlyBack,
            scan_x: None,
            scan_y: None,
            bin_factor: 4,
            n_threads: 1,
            poll_interval_secs: 60,
            copy_wait_secs: 20,
            copy_wait_attempts: 30,
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

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// The directory searched for acquisitions: the raw path, or the configured folder inside it
    pub fn acquisition_root(&self) -> Result<PathBuf, ConfigError> {
        let root = match &self.folder {
            Some(folder) => self.raw_path.join(folder),
            None => self.raw_path.clone(),
        };
        if root.exists() {
            Ok(root)
        } else {
            Err(ConfigError::BadFilePath(root))
        }
    }

    /// Output directory mirroring an acquisition directory relative to the raw path
    pub fn output_directory(&self, relative: &Path) -> PathBuf {
        self.processing_path.join(relative)
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    /// Scan size (lines, positions per line) to use for frame_count frames.
    /// Explicit values win; otherwise a square scan is assumed.
    pub fn scan_size(&self, frame_count: usize) -> (usize, usize) {
        let scan_x = self
            .scan_x
            .unwrap_or_else(|| (frame_count as f64).sqrt().floor() as usize);
        let scan_y = match (self.scan_y, scan_x) {
            (Some(scan_y), _) => scan_y,
            (None, 0) => 0,
            (None, scan_x) => frame_count / scan_x,
        };
        (scan_x, scan_y)
    }

    /// The reshape policy for an acquisition of frame_count frames
    pub fn reshape_policy(&self, frame_count: usize) -> ReshapePolicy {
        let (scan_x, scan_y) = self.scan_size(frame_count);
        match self.reshape {
            ReshapeMode::FlyBack => ReshapePolicy::FlyBack {
                scan_x_hint: scan_x,
                fallback_scan_x: scan_x,
                fallback_scan_y: scan_y,
            },
            ReshapeMode::FrameSize => ReshapePolicy::FixedSize { scan_x, scan_y },
        }
    }
}
