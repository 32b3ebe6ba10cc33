use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, Group, H5Type};
use ndarray::{s, Array2, ArrayView2};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::conversion::{ConversionOutput, FrameSlot};
use super::error::SinkError;
use super::pixel::FrameView;
use super::sink::ScanSink;
use super::summary::bin_frame;

const DATA_NAME: &str = "data";
const BINNED_NAME: &str = "binned";
const IBF_NAME: &str = "ibf";
const SUBSET_SUM_NAME: &str = "subset_sum";
const SUM_NAME: &str = "sum";

/// This is the version of the output format
const FORMAT_VERSION: &str = "1.0";

// Structure
// / - version, source, timestamp, counter_depth, shutter_time, chip_layout, strategy
// |---- data(dset) - (scan_row, scan_col, row, col) or (frame, row, col)
// |---- binned(dset) - bin_factor
// |---- ibf(dset)
// |---- subset_sum(dset)
// |---- sum(dset)

/// Sink writing every converted file to `<stem>.hdf5` using the hdf5-rust library.
///
/// The data and binned datasets are written one frame at a time.
#[derive(Debug, Default)]
pub struct HDFWriter {
    written: Vec<PathBuf>,
}

impl HDFWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

fn write_string_attr(group: &Group, name: &str, value: &str) -> Result<(), SinkError> {
    let value = VarLenUnicode::from_str(value).map_err(|e| SinkError::InvalidAttribute {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

/// An empty dataset of `shape` to be filled frame by frame
fn create_frame_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    shape: &[usize],
) -> Result<Dataset, SinkError> {
    Ok(group.new_dataset::<T>().shape(shape.to_vec()).create(name)?)
}

fn write_frame<T: H5Type>(
    dataset: &Dataset,
    slot: FrameSlot,
    frame: ArrayView2<T>,
) -> Result<(), SinkError> {
    match slot {
        FrameSlot::Frame(i) => dataset.write_slice(frame, s![i, .., ..])?,
        FrameSlot::Scan(row, col) => dataset.write_slice(frame, s![row, col, .., ..])?,
    }
    Ok(())
}

fn write_pixels(dataset: &Dataset, slot: FrameSlot, frame: &FrameView) -> Result<(), SinkError> {
    match frame {
        FrameView::U8(v) => write_frame(dataset, slot, v.view()),
        FrameView::U16(v) => write_frame(dataset, slot, v.view()),
        FrameView::U32(v) => write_frame(dataset, slot, v.view()),
    }
}

fn write_summary(group: &Group, name: &str, data: &Option<Array2<u64>>) -> Result<(), SinkError> {
    if let Some(data) = data {
        group.new_dataset_builder().with_data(data).create(name)?;
    }
    Ok(())
}

impl ScanSink for HDFWriter {
    fn write(&mut self, dir: &Path, stem: &str, output: &ConversionOutput) -> Result<(), SinkError> {
        let path = dir.join(format!("{stem}.hdf5"));
        let file = File::create(&path)?;
        let root: &Group = &file;

        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);
        write_string_attr(root, "version", &version)?;
        write_string_attr(root, "source", &output.source().to_string_lossy())?;
        write_string_attr(root, "timestamp", &output.header.timestamp)?;
        write_string_attr(root, "chip_layout", output.header.chip_layout.as_str())?;
        root.new_attr::<u32>()
            .create("counter_depth")?
            .write_scalar(&output.header.counter_depth)?;
        root.new_attr::<f64>()
            .create("shutter_time")?
            .write_scalar(&output.header.shutter_time)?;
        let strategy = output
            .reshape
            .as_ref()
            .map(|r| format!("{:?}", r.strategy))
            .unwrap_or_else(|| String::from("None"));
        write_string_attr(root, "strategy", &strategy)?;

        let shape = output.shape();
        let data = match output.header.element_bit_width {
            8 => create_frame_dataset::<u8>(root, DATA_NAME, &shape)?,
            16 => create_frame_dataset::<u16>(root, DATA_NAME, &shape)?,
            _ => create_frame_dataset::<u32>(root, DATA_NAME, &shape)?,
        };

        // Binning only applies to reshaped scans
        let factor = output.bin_factor;
        let binned = match output.geometry() {
            Some(_) if factor > 1 => {
                let mut binned_shape = shape.clone();
                let n = binned_shape.len();
                binned_shape[n - 2] /= factor;
                binned_shape[n - 1] /= factor;
                let dset = create_frame_dataset::<u64>(root, BINNED_NAME, &binned_shape)?;
                dset.new_attr::<u64>()
                    .create("bin_factor")?
                    .write_scalar(&(factor as u64))?;
                Some(dset)
            }
            _ => None,
        };

        output.for_each_frame(|slot, frame| {
            write_pixels(&data, slot, &frame)?;
            if let Some(binned) = &binned {
                write_frame(binned, slot, bin_frame(&frame, factor).view())?;
            }
            Ok::<(), SinkError>(())
        })?;

        let summaries = &output.summaries;
        write_summary(root, IBF_NAME, &summaries.ibf)?;
        write_summary(root, SUBSET_SUM_NAME, &summaries.subset_sum)?;
        write_summary(root, SUM_NAME, &summaries.frame_sum)?;

        log::info!("Wrote {}", path.display());
        self.written.push(path);
        Ok(())
    }
}
