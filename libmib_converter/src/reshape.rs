//! Recovery of the 2-D scan geometry from a 1-D stack of frames.
//!
//! Geometry is worked out first (from an explicit scan size or from the fly-back spike
//! in the frame intensity signal) as a [`ScanGeometry`], and only then applied to the
//! frames. A failed recovery therefore never costs the caller its frame stack.
use ndarray::{s, Array3, Array4};
use serde::Serialize;
use std::ops::Range;

use super::constants::FLYBACK_CROP_FACTOR;
use super::error::{FlyBackError, ReshapeError};
use super::pixel::{FrameStack, Pixel, ScanVolume};

/// Which frames of a stack form the scan and how they fold into lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanGeometry {
    /// Leading frames discarded before the first line
    pub skip: usize,
    /// Lines cut from the stack, the fly-back line included
    pub lines: usize,
    /// Frames (scan positions) per line
    pub line_length: usize,
    /// Whether the first cut line is the fly-back line and is discarded
    pub drop_first_line: bool,
}

impl ScanGeometry {
    /// (scan_rows, scan_cols) of the resulting volume
    pub fn scan_shape(&self) -> (usize, usize) {
        let rows = if self.drop_first_line {
            self.lines.saturating_sub(1)
        } else {
            self.lines
        };
        (rows, self.line_length)
    }

    /// One past the last frame used
    pub fn end(&self) -> usize {
        self.skip + self.lines * self.line_length
    }

    /// Frames of the stack that land in the volume
    pub fn frames(&self) -> Range<usize> {
        let first = if self.drop_first_line {
            self.skip + self.line_length
        } else {
            self.skip
        };
        first.min(self.end())..self.end()
    }

    /// (scan_row, scan_col) of stack frame `index`, or None if the frame is cut
    pub fn position(&self, index: usize) -> Option<(usize, usize)> {
        let frames = self.frames();
        if !frames.contains(&index) || self.line_length == 0 {
            return None;
        }
        let k = index - frames.start;
        Some((k / self.line_length, k % self.line_length))
    }
}

/// Keep the last `scan_x * scan_y` frames; the reshape is anchored to the end of the stack
pub fn fixed_geometry(
    frame_count: usize,
    scan_x: usize,
    scan_y: usize,
) -> Result<ScanGeometry, ReshapeError> {
    let requested = scan_x
        .checked_mul(scan_y)
        .ok_or(ReshapeError::InvalidScanSize(scan_x, scan_y))?;
    if requested == 0 {
        return Err(ReshapeError::InvalidScanSize(scan_x, scan_y));
    }
    if requested > frame_count {
        return Err(ReshapeError::InsufficientFrames {
            scan_x,
            scan_y,
            requested,
            available: frame_count,
        });
    }
    Ok(ScanGeometry {
        skip: frame_count - requested,
        lines: scan_x,
        line_length: scan_y,
        drop_first_line: false,
    })
}

/// Number of leading frames inspected for the fly-back spike (about twenty lines)
pub fn flyback_crop(frame_count: usize) -> usize {
    let crop = (FLYBACK_CROP_FACTOR * (frame_count as f64).sqrt()).floor() as usize;
    crop.min(frame_count)
}

/// Indices of the local maxima of signal, at least `distance` samples apart.
///
/// A maximum is strictly higher than its neighbours; a flat top counts once, at its
/// middle sample (rounded down), and the first and last samples never count. When two
/// maxima are closer than `distance` the higher one wins, ties going to the later one.
pub fn find_peaks(signal: &[u64], distance: usize) -> Vec<usize> {
    let mut peaks = Vec::new();
    let n = signal.len();
    let mut i = 1;
    while i + 1 < n {
        if signal[i - 1] < signal[i] {
            let mut ahead = i + 1;
            while ahead + 1 < n && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }

    let distance = distance.max(1);
    if distance == 1 || peaks.len() < 2 {
        return peaks;
    }

    // Visit from highest to lowest, dropping neighbours that sit too close
    let mut priority: Vec<usize> = (0..peaks.len()).collect();
    priority.sort_by_key(|&p| signal[peaks[p]]);
    let mut keep = vec![true; peaks.len()];
    for &current in priority.iter().rev() {
        if !keep[current] {
            continue;
        }
        let mut k = current;
        while k > 0 && peaks[current] - peaks[k - 1] < distance {
            k -= 1;
            keep[k] = false;
        }
        let mut k = current + 1;
        while k < peaks.len() && peaks[k] - peaks[current] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(peak, kept)| kept.then_some(peak))
        .collect()
}

/// Recover the scan geometry from the intensity signal of the leading frames.
///
/// The fly-back frame is over exposed and produces one spike per line. The last spike
/// spacing is taken as the line length; if any earlier spacing disagrees, everything up
/// to two spikes after the last disagreement is skipped.
pub fn detect_flyback(
    signal: &[u64],
    frame_count: usize,
    distance: usize,
) -> Result<ScanGeometry, FlyBackError> {
    if signal.is_empty() {
        return Err(FlyBackError::EmptySignal);
    }
    let peaks = find_peaks(signal, distance);
    if peaks.len() < 2 {
        return Err(FlyBackError::TooFewPeaks(peaks.len()));
    }

    let spacings: Vec<usize> = peaks.windows(2).map(|w| w[1] - w[0]).collect();
    let line_length = spacings[spacings.len() - 1];
    let skip = match spacings.iter().rposition(|&d| d != line_length) {
        Some(last_bad) => peaks[last_bad + 2],
        None => peaks[0],
    };

    let lines = frame_count.saturating_sub(skip) / line_length;
    if lines < 2 {
        return Err(FlyBackError::TooFewLines {
            skip,
            line_length,
            lines,
        });
    }
    Ok(ScanGeometry {
        skip,
        lines,
        line_length,
        drop_first_line: true,
    })
}

/// Cut and fold a frame stack according to geometry
pub fn apply_geometry<T: Pixel>(
    frames: Array3<T>,
    geometry: &ScanGeometry,
) -> Result<Array4<T>, ReshapeError> {
    let (frame_count, height, width) = frames.dim();
    if geometry.line_length == 0 || geometry.lines == 0 {
        return Err(ReshapeError::InvalidScanSize(
            geometry.lines,
            geometry.line_length,
        ));
    }
    if geometry.end() > frame_count {
        return Err(ReshapeError::InsufficientFrames {
            scan_x: geometry.lines,
            scan_y: geometry.line_length,
            requested: geometry.end(),
            available: frame_count,
        });
    }

    let volume = frames
        .slice_move(s![geometry.skip..geometry.end(), .., ..])
        .into_shape((geometry.lines, geometry.line_length, height, width))?;
    if geometry.drop_first_line {
        Ok(volume.slice_move(s![1.., .., .., ..]))
    } else {
        Ok(volume)
    }
}

impl FrameStack {
    /// Total intensity of each of the first `frames` frames
    pub fn frame_intensities(&self, frames: usize) -> Vec<u64> {
        match self {
            Self::U8(a) => typed_intensities(a, frames),
            Self::U16(a) => typed_intensities(a, frames),
            Self::U32(a) => typed_intensities(a, frames),
        }
    }

    /// Consume the stack into a scan volume
    pub fn apply_geometry(self, geometry: &ScanGeometry) -> Result<ScanVolume, ReshapeError> {
        Ok(match self {
            Self::U8(a) => ScanVolume::U8(apply_geometry(a, geometry)?),
            Self::U16(a) => ScanVolume::U16(apply_geometry(a, geometry)?),
            Self::U32(a) => ScanVolume::U32(apply_geometry(a, geometry)?),
        })
    }
}

fn typed_intensities<T: Pixel>(frames: &Array3<T>, count: usize) -> Vec<u64> {
    frames
        .outer_iter()
        .take(count)
        .map(|frame| frame.iter().map(|v| v.to_u64()).sum())
        .collect()
}

/// Reshape to (scan_x, scan_y, height, width) keeping the last scan_x * scan_y frames
pub fn reshape_fixed(
    stack: FrameStack,
    scan_x: usize,
    scan_y: usize,
) -> Result<ScanVolume, ReshapeError> {
    let geometry = fixed_geometry(stack.frame_count(), scan_x, scan_y)?;
    stack.apply_geometry(&geometry)
}

/// Reshape using the fly-back spike; `scan_x_hint` is the minimum spike spacing
pub fn reshape_flyback(stack: FrameStack, scan_x_hint: usize) -> Result<ScanVolume, ReshapeError> {
    let frame_count = stack.frame_count();
    let signal = stack.frame_intensities(flyback_crop(frame_count));
    let geometry = detect_flyback(&signal, frame_count, scan_x_hint)?;
    stack.apply_geometry(&geometry)
}

/// How the caller wants the scan geometry recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReshapePolicy {
    /// Fly-back detection, falling back to a fixed scan size
    FlyBack {
        scan_x_hint: usize,
        fallback_scan_x: usize,
        fallback_scan_y: usize,
    },
    /// Fixed scan size only
    FixedSize { scan_x: usize, scan_y: usize },
}

/// The strategy that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReshapeStrategy {
    FlyBack,
    FixedSize,
    /// Every strategy failed; the frames are kept as a stack
    Unreshaped,
}

/// Geometry picked by a policy plus the reasons earlier strategies were rejected
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReshapeOutcome {
    pub strategy: ReshapeStrategy,
    pub geometry: Option<ScanGeometry>,
    pub warnings: Vec<String>,
}

/// Pick a geometry according to policy. `signal` returns the intensity of the first n
/// frames and is only called when fly-back detection runs.
///
/// Never fails: if no strategy works the outcome is `Unreshaped`.
pub fn plan_reshape<F>(policy: &ReshapePolicy, frame_count: usize, signal: F) -> ReshapeOutcome
where
    F: FnOnce(usize) -> Vec<u64>,
{
    let mut warnings = Vec::new();
    let (scan_x, scan_y) = match *policy {
        ReshapePolicy::FlyBack {
            scan_x_hint,
            fallback_scan_x,
            fallback_scan_y,
        } => {
            let intensities = signal(flyback_crop(frame_count));
            match detect_flyback(&intensities, frame_count, scan_x_hint) {
                Ok(geometry) => {
                    log::info!(
                        "Fly-back detected: skipping {} frames, {} lines of {} positions",
                        geometry.skip,
                        geometry.scan_shape().0,
                        geometry.line_length
                    );
                    return ReshapeOutcome {
                        strategy: ReshapeStrategy::FlyBack,
                        geometry: Some(geometry),
                        warnings,
                    };
                }
                Err(e) => {
                    log::warn!("{e}; falling back to a {fallback_scan_x}x{fallback_scan_y} scan");
                    warnings.push(e.to_string());
                    (fallback_scan_x, fallback_scan_y)
                }
            }
        }
        ReshapePolicy::FixedSize { scan_x, scan_y } => (scan_x, scan_y),
    };

    match fixed_geometry(frame_count, scan_x, scan_y) {
        Ok(geometry) => {
            if geometry.skip > 0 {
                log::info!("Skipping the first {} frames", geometry.skip);
            }
            ReshapeOutcome {
                strategy: ReshapeStrategy::FixedSize,
                geometry: Some(geometry),
                warnings,
            }
        }
        Err(e) => {
            log::warn!("{e}; returning the stack without reshaping");
            warnings.push(e.to_string());
            ReshapeOutcome {
                strategy: ReshapeStrategy::Unreshaped,
                geometry: None,
                warnings,
            }
        }
    }
}

/// Either a reshaped scan or the untouched stack
#[derive(Debug, Clone, PartialEq)]
pub enum ReshapedData {
    Volume(ScanVolume),
    Stack(FrameStack),
}

impl ReshapedData {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Volume(v) => v.shape(),
            Self::Stack(s) => s.shape(),
        }
    }
}

/// Check a planned outcome against the number of frames really available. A geometry
/// that does not fit downgrades the outcome to `Unreshaped`.
pub fn fit_outcome(mut outcome: ReshapeOutcome, frame_count: usize) -> ReshapeOutcome {
    let Some(geometry) = outcome.geometry else {
        return outcome;
    };
    if geometry.end() > frame_count || geometry.scan_shape().0 == 0 || geometry.line_length == 0 {
        let message = format!(
            "Scan geometry needs {} frames but the stack holds {}",
            geometry.end(),
            frame_count
        );
        log::warn!("{message}; returning the stack without reshaping");
        outcome.warnings.push(message);
        outcome.strategy = ReshapeStrategy::Unreshaped;
        outcome.geometry = None;
    }
    outcome
}

/// Apply a planned outcome to an owned stack, handing the stack back untouched when the
/// geometry does not fit
pub fn apply_outcome(
    stack: FrameStack,
    outcome: ReshapeOutcome,
) -> Result<(ReshapedData, ReshapeOutcome), ReshapeError> {
    let outcome = fit_outcome(outcome, stack.frame_count());
    match outcome.geometry {
        Some(geometry) => {
            let volume = stack.apply_geometry(&geometry)?;
            Ok((ReshapedData::Volume(volume), outcome))
        }
        None => Ok((ReshapedData::Stack(stack), outcome)),
    }
}

/// Run a policy against a decoded stack
pub fn reshape_stack(
    stack: FrameStack,
    policy: &ReshapePolicy,
) -> Result<(ReshapedData, ReshapeOutcome), ReshapeError> {
    let outcome = plan_reshape(policy, stack.frame_count(), |n| stack.frame_intensities(n));
    apply_outcome(stack, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// A stack of 2x2 frames whose pixels all hold the frame index
    fn index_stack(frames: usize) -> FrameStack {
        FrameStack::U16(Array3::from_shape_fn((frames, 2, 2), |(f, _, _)| f as u16))
    }

    /// Frames with a baseline intensity and a spike every `line` frames from `first`
    fn spiked_stack(frames: usize, first: usize, line: usize) -> FrameStack {
        FrameStack::U32(Array3::from_shape_fn((frames, 2, 2), |(f, _, _)| {
            if f >= first && (f - first) % line == 0 {
                1000
            } else {
                10
            }
        }))
    }

    fn first_pixels(volume: &ScanVolume) -> Vec<u64> {
        match volume {
            ScanVolume::U16(v) => v.slice(s![.., .., 0, 0]).iter().map(|x| *x as u64).collect(),
            ScanVolume::U32(v) => v.slice(s![.., .., 0, 0]).iter().map(|x| *x as u64).collect(),
            ScanVolume::U8(v) => v.slice(s![.., .., 0, 0]).iter().map(|x| *x as u64).collect(),
        }
    }

    #[test]
    fn test_fixed_keeps_last_frames() {
        let volume = reshape_fixed(index_stack(20), 4, 4).unwrap();
        assert_eq!(volume.shape(), &[4, 4, 2, 2]);
        assert_eq!(first_pixels(&volume), (4..20).collect::<Vec<u64>>());
    }

    #[test]
    fn test_fixed_insufficient_frames() {
        assert!(matches!(
            reshape_fixed(index_stack(20), 10, 10),
            Err(ReshapeError::InsufficientFrames {
                requested: 100,
                available: 20,
                ..
            })
        ));
        assert!(matches!(
            fixed_geometry(20, 0, 4),
            Err(ReshapeError::InvalidScanSize(0, 4))
        ));
        assert!(matches!(
            fixed_geometry(20, usize::MAX, 2),
            Err(ReshapeError::InvalidScanSize(_, 2))
        ));
    }

    #[test]
    fn test_positions_follow_the_folded_volume() {
        let geometry = ScanGeometry {
            skip: 3,
            lines: 4,
            line_length: 5,
            drop_first_line: true,
        };
        assert_eq!(geometry.frames(), 8..23);
        assert_eq!(geometry.position(7), None);
        assert_eq!(geometry.position(23), None);

        // Every frame that survives apply_geometry sits where position says
        let volume = index_stack(30).apply_geometry(&geometry).unwrap();
        let pixels = first_pixels(&volume);
        for frame in geometry.frames() {
            let (row, col) = geometry.position(frame).unwrap();
            assert_eq!(pixels[row * 5 + col], frame as u64);
        }
    }

    #[test]
    fn test_fit_outcome_downgrades_oversized_geometry() {
        let outcome = ReshapeOutcome {
            strategy: ReshapeStrategy::FixedSize,
            geometry: fixed_geometry(20, 4, 4).ok(),
            warnings: Vec::new(),
        };
        assert_eq!(fit_outcome(outcome.clone(), 20), outcome);

        let fitted = fit_outcome(outcome, 10);
        assert_eq!(fitted.strategy, ReshapeStrategy::Unreshaped);
        assert_eq!(fitted.geometry, None);
        assert_eq!(fitted.warnings.len(), 1);
    }

    #[test]
    fn test_find_peaks_plateaus_and_edges() {
        // Edges are never peaks; the plateau 3..=4 counts once at 3
        let signal = [9, 1, 5, 7, 7, 2, 8, 3, 9];
        assert_eq!(find_peaks(&signal, 1), vec![3, 6]);
        // A rising run that ends at the border is not a peak
        assert_eq!(find_peaks(&[1, 2, 2, 2], 1), Vec::<usize>::new());
    }

    #[test]
    fn test_find_peaks_distance_prefers_higher() {
        let signal = [0, 5, 0, 9, 0, 4, 0, 0, 0, 6, 0];
        assert_eq!(find_peaks(&signal, 1), vec![1, 3, 5, 9]);
        assert_eq!(find_peaks(&signal, 3), vec![3, 9]);
    }

    #[test]
    fn test_flyback_periodic_spikes() {
        let frames = 5 + 16 * 16;
        let volume = reshape_flyback(spiked_stack(frames, 5, 16), 16).unwrap();
        // 16 lines are cut after skipping 5 frames, the fly-back line is dropped
        assert_eq!(volume.shape(), &[15, 16, 2, 2]);

        let signal = spiked_stack(frames, 5, 16).frame_intensities(frames);
        let geometry = detect_flyback(&signal, frames, 16).unwrap();
        assert_eq!(
            geometry,
            ScanGeometry {
                skip: 5,
                lines: 16,
                line_length: 16,
                drop_first_line: true
            }
        );
        // Every remaining line starts on a fly-back frame
        assert!(first_pixels(&volume)
            .chunks(16)
            .all(|line| line[0] == 1000 && line[1..].iter().all(|v| *v == 10)));
    }

    #[test]
    fn test_flyback_skips_unstable_start() {
        // Spikes at 2 and 5 are irregular, then every 10 from 12
        let mut signal = vec![1u64; 200];
        for i in [2, 5, 12, 22, 32, 42, 52, 62] {
            signal[i] = 100;
        }
        let geometry = detect_flyback(&signal[..70], 200, 2).unwrap();
        // Spacings 3, 7, 10...; the last bad one is index 1, so skip peaks[3] = 22
        assert_eq!(geometry.skip, 22);
        assert_eq!(geometry.line_length, 10);
        assert_eq!(geometry.lines, 17);
    }

    #[test]
    fn test_flyback_failures() {
        assert_eq!(detect_flyback(&[], 10, 1), Err(FlyBackError::EmptySignal));
        assert_eq!(
            detect_flyback(&[1, 1, 1, 1], 4, 1),
            Err(FlyBackError::TooFewPeaks(0))
        );
        assert_eq!(
            detect_flyback(&[0, 9, 0, 0, 9, 0], 6, 1),
            Err(FlyBackError::TooFewLines {
                skip: 1,
                line_length: 3,
                lines: 1
            })
        );
    }

    #[test]
    fn test_policy_falls_back_to_fixed_size() {
        let policy = ReshapePolicy::FlyBack {
            scan_x_hint: 4,
            fallback_scan_x: 4,
            fallback_scan_y: 4,
        };
        let (data, outcome) = reshape_stack(index_stack(20), &policy).unwrap();
        assert_eq!(outcome.strategy, ReshapeStrategy::FixedSize);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(data.shape(), &[4, 4, 2, 2]);
    }

    #[test]
    fn test_policy_returns_stack_when_nothing_fits() {
        let policy = ReshapePolicy::FixedSize {
            scan_x: 10,
            scan_y: 10,
        };
        let (data, outcome) = reshape_stack(index_stack(20), &policy).unwrap();
        assert_eq!(outcome.strategy, ReshapeStrategy::Unreshaped);
        assert_eq!(outcome.geometry, None);
        assert_eq!(data, ReshapedData::Stack(index_stack(20)));
    }

    #[test]
    fn test_policy_uses_flyback_when_detected() {
        let policy = ReshapePolicy::FlyBack {
            scan_x_hint: 8,
            fallback_scan_x: 2,
            fallback_scan_y: 2,
        };
        let (data, outcome) = reshape_stack(spiked_stack(5 + 16 * 16, 5, 16), &policy).unwrap();
        assert_eq!(outcome.strategy, ReshapeStrategy::FlyBack);
        assert!(outcome.warnings.is_empty());
        assert_eq!(data.shape(), &[15, 16, 2, 2]);
    }
}
