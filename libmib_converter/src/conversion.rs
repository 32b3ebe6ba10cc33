use std::path::Path;

use super::config::Config;
use super::error::{ConversionError, DecodeError};
use super::frame_decoder::TruncatedData;
use super::header::HeaderInfo;
use super::mib_file::MibFile;
use super::pixel::FrameView;
use super::reshape::{fit_outcome, plan_reshape, ReshapeOutcome, ScanGeometry};
use super::summary::{Summaries, SummaryBuilder};

/// Where a frame of the source lands in the saved data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSlot {
    /// Index into an unreshaped (frame, row, col) stack
    Frame(usize),
    /// Scan position in a (scan_row, scan_col, row, col) volume
    Scan(usize, usize),
}

/// Everything produced from one .mib file, ready to be handed to the sinks.
///
/// The frames stay in the mapped file; sinks pull them one at a time through
/// [`ConversionOutput::for_each_frame`].
#[derive(Debug)]
pub struct ConversionOutput {
    pub file: MibFile,
    pub header: HeaderInfo,
    pub frame_count: usize,
    /// None when no reshape was attempted (TEM mode, multi-file or single frame)
    pub reshape: Option<ReshapeOutcome>,
    pub summaries: Summaries,
    /// Detector binning requested for the saved data, 0 or 1 for none
    pub bin_factor: usize,
    pub truncated: Option<TruncatedData>,
}

impl ConversionOutput {
    pub fn source(&self) -> &Path {
        self.file.path()
    }

    pub fn size_bytes(&self) -> u64 {
        self.file.size_bytes()
    }

    /// File stem of the source, used to name the outputs
    pub fn stem(&self) -> String {
        self.source()
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("converted"))
    }

    /// Geometry the saved data is folded with, if the frames were reshaped
    pub fn geometry(&self) -> Option<ScanGeometry> {
        self.reshape.as_ref().and_then(|r| r.geometry)
    }

    /// Shape of the saved data: (scan_row, scan_col, row, col) or (frame, row, col)
    pub fn shape(&self) -> Vec<usize> {
        let (width, height) = self.header.chip_layout.dimensions();
        match self.geometry() {
            Some(geometry) => {
                let (rows, cols) = geometry.scan_shape();
                vec![rows, cols, height, width]
            }
            None => vec![self.frame_count, height, width],
        }
    }

    /// Decode every frame of the saved data in order and hand it to visit with its slot
    pub fn for_each_frame<E, F>(&self, mut visit: F) -> Result<(), E>
    where
        E: From<DecodeError>,
        F: FnMut(FrameSlot, FrameView<'_>) -> Result<(), E>,
    {
        match self.geometry() {
            Some(geometry) => self.file.for_each_frame(geometry.frames(), |index, frame| {
                match geometry.position(index) {
                    Some((row, col)) => visit(FrameSlot::Scan(row, col), frame),
                    None => Ok(()),
                }
            }),
            None => self
                .file
                .for_each_frame(0..self.frame_count, |index, frame| {
                    visit(FrameSlot::Frame(index), frame)
                }),
        }
    }
}

/// Convert a single .mib file. With `stem_reshape` set the frames are folded into a
/// scan using the configured policy; otherwise they are kept as a stack.
///
/// The frames are streamed from the mapped file once to build the summaries. Only
/// fatal per-file problems are errors; failed geometry recovery degrades to an
/// unreshaped stack.
pub fn convert_file(
    config: &Config,
    path: &Path,
    stem_reshape: bool,
) -> Result<ConversionOutput, ConversionError> {
    let file = MibFile::open(path)?;
    let header = file.header().clone();
    let frame_count = file.frame_count();
    let truncated = file.truncated();
    if let Some(truncated) = truncated {
        log::warn!("{truncated}");
    }
    log::info!(
        "Converting {} ({}, {} frames of {}x{}, {}-bit counters)",
        path.display(),
        human_bytes::human_bytes(file.size_bytes() as f64),
        frame_count,
        header.width(),
        header.height(),
        header.counter_depth
    );

    let reshape = if stem_reshape && frame_count > 1 {
        let policy = config.reshape_policy(frame_count);
        let outcome = plan_reshape(&policy, frame_count, |n| file.intensity_signal(n));
        Some(fit_outcome(outcome, frame_count))
    } else {
        None
    };
    let geometry = reshape.as_ref().and_then(|r| r.geometry);

    let frame_shape = (header.height(), header.width());
    let mut builder = match geometry {
        Some(geometry) => SummaryBuilder::for_scan(geometry, frame_shape),
        None => SummaryBuilder::for_stack(frame_shape),
    };
    let frames = geometry.map_or(0..frame_count, |g| g.frames());
    file.for_each_frame(frames, |index, frame| {
        builder.add_frame(index, &frame);
        Ok::<(), DecodeError>(())
    })?;

    let output = ConversionOutput {
        file,
        header,
        frame_count,
        reshape,
        summaries: builder.finish(),
        bin_factor: config.bin_factor,
        truncated,
    };
    log::info!("Converted {} to shape {:?}", path.display(), output.shape());
    Ok(output)
}
