use ndarray::{Array2, ArrayView2};

use super::constants::SUBSET_SAMPLES;
use super::pixel::{FrameView, Pixel};
use super::reshape::ScanGeometry;

/// Reductions saved next to the converted data. All sums are widened to u64.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summaries {
    /// Incoherent bright-field image, one value per scan position
    pub ibf: Option<Array2<u64>>,
    /// Diffraction pattern summed over a sparse grid of scan positions
    pub subset_sum: Option<Array2<u64>>,
    /// Sum of every frame of an unreshaped stack
    pub frame_sum: Option<Array2<u64>>,
}

/// Accumulates [`Summaries`] while the frames of a file stream past, so the scan
/// volume is never held in memory
#[derive(Debug, Clone)]
pub struct SummaryBuilder {
    geometry: Option<ScanGeometry>,
    step: usize,
    summaries: Summaries,
}

impl SummaryBuilder {
    /// Summaries of the scan that geometry folds out of frames of `frame_shape`
    pub fn for_scan(geometry: ScanGeometry, frame_shape: (usize, usize)) -> Self {
        let scan_shape = geometry.scan_shape();
        Self {
            geometry: Some(geometry),
            step: subset_step(scan_shape.0),
            summaries: Summaries {
                ibf: Some(Array2::zeros(scan_shape)),
                subset_sum: Some(Array2::zeros(frame_shape)),
                frame_sum: None,
            },
        }
    }

    /// Summaries of an unreshaped stack of frames of `frame_shape`
    pub fn for_stack(frame_shape: (usize, usize)) -> Self {
        Self {
            geometry: None,
            step: 1,
            summaries: Summaries {
                frame_sum: Some(Array2::zeros(frame_shape)),
                ..Default::default()
            },
        }
    }

    /// Fold in frame `index` of the stack. Frames cut by the geometry are ignored.
    pub fn add_frame(&mut self, index: usize, frame: &FrameView) {
        let summaries = &mut self.summaries;
        let Some(geometry) = self.geometry else {
            if let Some(sum) = summaries.frame_sum.as_mut() {
                frame.add_to(sum);
            }
            return;
        };
        let Some((row, col)) = geometry.position(index) else {
            return;
        };
        if let Some(ibf) = summaries.ibf.as_mut() {
            ibf[[row, col]] += frame.sum();
        }
        if row % self.step == 0 && col % self.step == 0 {
            if let Some(sum) = summaries.subset_sum.as_mut() {
                frame.add_to(sum);
            }
        }
    }

    pub fn finish(self) -> Summaries {
        self.summaries
    }
}

/// Stride between sampled scan positions for the subset sum
pub fn subset_step(scan_rows: usize) -> usize {
    (scan_rows / SUBSET_SAMPLES).max(1)
}

/// Sum blocks of `factor` x `factor` pixels of one frame
pub fn bin_frame(frame: &FrameView, factor: usize) -> Array2<u64> {
    let factor = factor.max(1);
    match frame {
        FrameView::U8(v) => bin_typed(v, factor),
        FrameView::U16(v) => bin_typed(v, factor),
        FrameView::U32(v) => bin_typed(v, factor),
    }
}

fn bin_typed<T: Pixel>(frame: &ArrayView2<T>, factor: usize) -> Array2<u64> {
    let (height, width) = frame.dim();
    let (bh, bw) = (height / factor, width / factor);
    let mut binned = Array2::<u64>::zeros((bh, bw));
    for ((y, x), v) in frame.indexed_iter() {
        let (by, bx) = (y / factor, x / factor);
        // Edge pixels that do not fill a whole bin are dropped
        if by < bh && bx < bw {
            binned[[by, bx]] += v.to_u64();
        }
    }
    binned
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn feed(builder: &mut SummaryBuilder, frames: usize, value: impl Fn(usize) -> u16) {
        for index in 0..frames {
            let frame = Array2::from_elem((4, 4), value(index));
            builder.add_frame(index, &FrameView::U16(frame.view()));
        }
    }

    #[test]
    fn test_ibf_follows_geometry() {
        let geometry = ScanGeometry {
            skip: 2,
            lines: 3,
            line_length: 3,
            drop_first_line: true,
        };
        let mut builder = SummaryBuilder::for_scan(geometry, (4, 4));
        feed(&mut builder, 12, |i| i as u16);
        let summaries = builder.finish();

        // Frames 5..11 fold into a 2x3 scan
        let ibf = summaries.ibf.unwrap();
        assert_eq!(ibf.dim(), (2, 3));
        assert_eq!(ibf[[0, 0]], 5 * 16);
        assert_eq!(ibf[[1, 2]], 10 * 16);
        assert!(summaries.frame_sum.is_none());
    }

    #[test]
    fn test_subset_sum_strides_scan() {
        assert_eq!(subset_step(10), 1);
        assert_eq!(subset_step(256), 5);

        let geometry = ScanGeometry {
            skip: 0,
            lines: 100,
            line_length: 100,
            drop_first_line: false,
        };
        let mut builder = SummaryBuilder::for_scan(geometry, (4, 4));
        feed(&mut builder, 100 * 100, |i| ((i / 100) * 100 + i % 100) as u16);
        let sum = builder.finish().subset_sum.unwrap();

        // Positions 0, 2, ..., 98 on both axes
        let expected: u64 = (0..100)
            .step_by(2)
            .flat_map(|i| (0..100).step_by(2).map(move |j| (i * 100 + j) as u64))
            .sum();
        assert_eq!(sum[[0, 0]], expected);
        assert_eq!(sum.dim(), (4, 4));
    }

    #[test]
    fn test_stack_frame_sum() {
        let mut builder = SummaryBuilder::for_stack((4, 4));
        feed(&mut builder, 4, |i| i as u16);
        let summaries = builder.finish();
        assert!(summaries.ibf.is_none());
        assert!(summaries.frame_sum.unwrap().iter().all(|v| *v == 6));
    }

    #[test]
    fn test_binning_sums_blocks() {
        let frame = Array2::<u8>::ones((8, 8));
        let binned = bin_frame(&FrameView::U8(frame.view()), 4);
        assert_eq!(binned.dim(), (2, 2));
        assert!(binned.iter().all(|v| *v == 16));

        // A 6 pixel edge only fills one bin of 4
        let frame = Array2::<u8>::ones((6, 6));
        assert_eq!(bin_frame(&FrameView::U8(frame.view()), 4).dim(), (1, 1));
    }
}
