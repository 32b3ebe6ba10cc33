//! # mib_converter
//!
//! mib_converter converts the .mib files written by a pixelated electron detector
//! (single chip or 2x2 quad assembly) into typed frame stacks, and folds the frames of
//! a 4D-STEM acquisition into a (scan_row, scan_col, row, col) volume. The scan geometry
//! is recovered from the over exposed fly-back frame that starts every scan line, with a
//! fixed scan size as the fallback.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation instructions.
//!
//! To build and install the CLI use `cargo install --path ./mib_converter_cli` from the
//! top level repository.
//!
//! ### HDF5
//!
//! HDF5 output is behind the `hdf5` cargo feature
//! (`cargo install --path ./mib_converter_cli --features hdf5`). HDF5 must then be
//! installed; if it is not found automatically, write the following snippet into
//! `.cargo/config.toml`:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! Without the feature only the YAML summaries are written.
//!
//! ## Configuration
//!
//! ```yaml
//! raw_path: /dls/e02/data/2020/em12345-1/Merlin
//! processing_path: /dls/e02/data/2020/em12345-1/processing/Merlin
//! folder: null
//! stem: true
//! reshape: fly_back
//! scan_x: null
//! scan_y: null
//! bin_factor: 4
//! n_threads: 1
//! poll_interval_secs: 60
//! copy_wait_secs: 20
//! copy_wait_attempts: 30
//! ```
//!
//! - raw_path: root of the acquisition tree. Every directory below it holding .mib files
//! is one acquisition.
//! - processing_path: root of the output tree. Outputs mirror the acquisition directories;
//! an acquisition whose output directory exists is considered converted.
//! - folder: optional sub-folder of raw_path to restrict the search to.
//! - stem: reshape single-file acquisitions into a scan. When false frames are kept as a
//! stack and summed.
//! - reshape: `fly_back` to detect the scan lines, `frame_size` to use scan_x and scan_y.
//! - scan_x, scan_y: lines and positions per line. When null a square scan is assumed.
//! - bin_factor: detector binning of the saved binned volume, 0 to disable.
//! - n_threads: number of acquisitions converted in parallel.
//! - poll_interval_secs, copy_wait_secs, copy_wait_attempts: timing of the watcher.
//!
//! ## Output
//!
//! For every .mib file a `<name>.yml` summary (header, shape, geometry, warnings) and,
//! with the `hdf5` feature, a `<name>.hdf5` holding the data, binned data, bright-field
//! image and summed diffraction patterns.
pub mod acquisition;
pub mod config;
pub mod constants;
pub mod conversion;
pub mod error;
pub mod frame_decoder;
#[cfg(feature = "hdf5")]
pub mod hdf_writer;
pub mod header;
pub mod mib_file;
pub mod pixel;
pub mod process;
pub mod reshape;
pub mod sink;
pub mod summary;
#[cfg(test)]
mod test_utils;
pub mod watcher;
pub mod worker_status;
