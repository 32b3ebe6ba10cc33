use fxhash::FxHashMap;
use std::path::{Path, PathBuf};

use super::config::Config;
use super::error::DiscoveryError;

const MIB_EXTENSION: &str = "mib";

/// One acquisition: a directory holding one or more .mib files.
///
/// Built once by discovery and handed to the converter, which never lists
/// directories itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionDescriptor {
    /// Name of the acquisition directory (usually its timestamp)
    pub name: String,
    /// Acquisition directory relative to the raw path
    pub relative_path: PathBuf,
    pub raw_dir: PathBuf,
    pub output_dir: PathBuf,
    /// .mib files sorted by name, with their sizes in bytes
    pub mib_files: Vec<(PathBuf, u64)>,
    /// Reshape to a 4-D scan (STEM) or keep as a frame stack (TEM)
    pub stem: bool,
}

impl AcquisitionDescriptor {
    /// An acquisition is pending until its output directory exists
    pub fn is_pending(&self) -> bool {
        !self.output_dir.exists()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.mib_files.iter().map(|(_, size)| size).sum()
    }

    /// Current sizes of the .mib files on disk, in the same order as mib_files
    pub fn current_sizes(&self) -> Result<Vec<u64>, DiscoveryError> {
        let mut sizes = Vec::with_capacity(self.mib_files.len());
        for (path, _) in self.mib_files.iter() {
            sizes.push(path.metadata()?.len());
        }
        Ok(sizes)
    }
}

fn is_mib_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MIB_EXTENSION))
}

/// Recursively collect .mib files below dir, grouped by their parent directory
fn collect_mib_files(
    dir: &Path,
    groups: &mut FxHashMap<PathBuf, Vec<(PathBuf, u64)>>,
) -> Result<(), DiscoveryError> {
    for item in dir.read_dir()? {
        let item_path = item?.path();
        if item_path.is_dir() {
            collect_mib_files(&item_path, groups)?;
        } else if is_mib_file(&item_path) {
            let bytes = item_path.metadata()?.len();
            groups
                .entry(dir.to_path_buf())
                .or_default()
                .push((item_path, bytes));
        }
    }
    Ok(())
}

/// Find every acquisition below the configured acquisition root
pub fn discover_acquisitions(config: &Config) -> Result<Vec<AcquisitionDescriptor>, DiscoveryError> {
    let root = config.acquisition_root()?;
    if !root.is_dir() {
        return Err(DiscoveryError::BadFilePath(root));
    }

    let mut groups: FxHashMap<PathBuf, Vec<(PathBuf, u64)>> = FxHashMap::default();
    collect_mib_files(&root, &mut groups)?;

    let mut acquisitions: Vec<AcquisitionDescriptor> = groups
        .into_iter()
        .map(|(raw_dir, mut mib_files)| {
            mib_files.sort();
            let relative_path = raw_dir
                .strip_prefix(&config.raw_path)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(raw_dir.file_name().unwrap_or_default()));
            let name = raw_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            AcquisitionDescriptor {
                name,
                output_dir: config.output_directory(&relative_path),
                relative_path,
                raw_dir,
                mib_files,
                stem: config.stem,
            }
        })
        .collect();
    acquisitions.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(acquisitions)
}

/// Acquisitions that have not been converted yet
pub fn find_pending(config: &Config) -> Result<Vec<AcquisitionDescriptor>, DiscoveryError> {
    let pending: Vec<AcquisitionDescriptor> = discover_acquisitions(config)?
        .into_iter()
        .filter(|acq| acq.is_pending())
        .collect();
    log::info!("Found {} acquisitions to convert", pending.len());
    Ok(pending)
}
