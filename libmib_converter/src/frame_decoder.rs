//! Decoding of the MIB payload into a typed (frame, row, col) stack.
//!
//! Every frame on disk is a record of `header_bytes + pixel_bytes`. The leading header
//! is stripped; RAW records are additionally de-interleaved and, for the quad assembly,
//! reassembled from their four chip quadrants.
use byteorder::{BigEndian, ByteOrder};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayViewMut2};
use serde::Serialize;
use std::fmt;

use super::constants::*;
use super::error::{DecodeError, HeaderError};
use super::header::{ChipLayout, HeaderInfo, StorageEncoding};
use super::pixel::{FrameStack, Pixel};

/// Recoverable condition: the file ended with an incomplete frame (or fewer whole
/// records than the canonical frame size implies), so fewer frames were decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TruncatedData {
    pub expected_frames: usize,
    pub kept_frames: usize,
    pub trailing_bytes: usize,
}

impl fmt::Display for TruncatedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MIB data is truncated: kept {} of {} frames, ignoring {} trailing bytes",
            self.kept_frames, self.expected_frames, self.trailing_bytes
        )
    }
}

/// Header and pixel bytes of one frame record as laid out by this header
fn record_parts(header: &HeaderInfo) -> Result<(usize, usize), HeaderError> {
    let (width, height) = header.chip_layout.dimensions();
    let header_bits = header
        .data_offset
        .checked_mul(8)
        .ok_or(HeaderError::DataOffsetOutOfRange(header.data_offset))?;
    let header_elements = header_bits / header.element_bit_width as usize;
    let header_bytes = header_elements * header.element_bytes();
    let pixel_bytes = if header.storage_encoding == StorageEncoding::RawPacked
        && header.counter_depth == 1
    {
        width * height / 8
    } else {
        width * height * header.element_bytes()
    };
    Ok((header_bytes, pixel_bytes))
}

/// Canonical size in bytes of one frame, header included, for this header's layout.
///
/// The size table only has 1, 6 and 12-bit buckets. A 24-bit RAW frame is sized by its
/// record: the frame header followed by 32-bit pixels.
pub fn canonical_frame_size(header: &HeaderInfo) -> Result<usize, HeaderError> {
    let table = match header.chip_layout {
        ChipLayout::Single => &SINGLE_FRAME_SIZES,
        ChipLayout::Quad => &QUAD_FRAME_SIZES,
    };
    match (header.storage_encoding, header.counter_depth) {
        (StorageEncoding::RawPacked, 24) => {
            let (header_bytes, pixel_bytes) = record_parts(header)?;
            Ok(header_bytes + pixel_bytes)
        }
        (_, depth) => {
            lookup(table, depth).ok_or(HeaderError::UnsupportedCounterDepth(header.counter_depth))
        }
    }
}

/// Where every frame lives in the file and how to turn it into an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameLayout {
    pub width: usize,
    pub height: usize,
    pub element_bytes: usize,
    pub header_bytes: usize,
    pub pixel_bytes: usize,
    pub record_bytes: usize,
    pub canonical_frame_bytes: usize,
    pub frame_count: usize,
    /// RAW read-out column block; None for processed frames
    pub column_block: Option<usize>,
    /// RAW 1-bit frames pack eight pixels per byte, most significant bit first
    pub bit_packed: bool,
    /// RAW quad frames need their quadrants reassembled
    pub reassemble_quadrants: bool,
    pub truncated: Option<TruncatedData>,
}

impl FrameLayout {
    /// Compute the layout of a file of `file_size` bytes described by header
    pub fn new(header: &HeaderInfo, file_size: usize) -> Result<Self, DecodeError> {
        let (width, height) = header.chip_layout.dimensions();
        let canonical_frame_bytes = canonical_frame_size(header)?;
        let element_bytes = header.element_bytes();
        let (header_bytes, pixel_bytes) = record_parts(header)?;
        let record_bytes = header_bytes + pixel_bytes;

        let raw = header.storage_encoding == StorageEncoding::RawPacked;
        let bit_packed = raw && header.counter_depth == 1;

        let expected_frames = file_size / canonical_frame_bytes;
        if expected_frames == 0 {
            return Err(DecodeError::ShortFile {
                file_size,
                frame_size: canonical_frame_bytes,
            });
        }
        let whole_records = file_size / record_bytes;
        let frame_count = expected_frames.min(whole_records);
        if frame_count == 0 {
            return Err(DecodeError::ShortFile {
                file_size,
                frame_size: record_bytes,
            });
        }

        let truncated = if whole_records < expected_frames || file_size % canonical_frame_bytes != 0
        {
            Some(TruncatedData {
                expected_frames: file_size.div_ceil(canonical_frame_bytes),
                kept_frames: frame_count,
                trailing_bytes: file_size - frame_count * record_bytes,
            })
        } else {
            None
        };

        let column_block = if raw {
            Some(
                lookup(&RAW_COLUMN_BLOCKS, header.counter_depth)
                    .ok_or(HeaderError::UnsupportedCounterDepth(header.counter_depth))?,
            )
        } else {
            None
        };

        Ok(Self {
            width,
            height,
            element_bytes,
            header_bytes,
            pixel_bytes,
            record_bytes,
            canonical_frame_bytes,
            frame_count,
            column_block,
            bit_packed,
            reassemble_quadrants: raw && header.chip_layout == ChipLayout::Quad,
            truncated,
        })
    }

    /// The pixel bytes of frame `index`, header stripped
    pub fn payload<'a>(&self, bytes: &'a [u8], index: usize) -> &'a [u8] {
        let start = index * self.record_bytes + self.header_bytes;
        &bytes[start..start + self.pixel_bytes]
    }

    /// Total intensity of each of the first `frames` frames.
    ///
    /// Works straight on the file bytes; pixel order does not change a sum, so no
    /// frame is ever reassembled.
    pub fn intensity_signal(&self, bytes: &[u8], frames: usize) -> Vec<u64> {
        (0..frames.min(self.frame_count))
            .map(|index| {
                let payload = self.payload(bytes, index);
                if self.bit_packed {
                    payload.iter().map(|b| b.count_ones() as u64).sum()
                } else {
                    payload
                        .chunks_exact(self.element_bytes)
                        .map(|chunk| match self.element_bytes {
                            1 => chunk[0] as u64,
                            2 => BigEndian::read_u16(chunk) as u64,
                            _ => BigEndian::read_u32(chunk) as u64,
                        })
                        .sum()
                }
            })
            .collect()
    }
}

/// The result of decoding: the frames plus any recoverable truncation
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrames {
    pub stack: FrameStack,
    pub truncated: Option<TruncatedData>,
}

/// Decode all frames of a MIB file held in memory (or memory mapped)
pub fn decode_frames_from_bytes(
    header: &HeaderInfo,
    bytes: &[u8],
) -> Result<DecodedFrames, DecodeError> {
    let layout = FrameLayout::new(header, bytes.len())?;
    decode_with_layout(header, &layout, bytes)
}

/// Decode using a precomputed layout; element type follows the header's element width
pub fn decode_with_layout(
    header: &HeaderInfo,
    layout: &FrameLayout,
    bytes: &[u8],
) -> Result<DecodedFrames, DecodeError> {
    if let Some(truncated) = layout.truncated {
        log::warn!("{truncated}");
    }
    let stack = match header.element_bit_width {
        8 => FrameStack::U8(decode_typed::<u8>(layout, bytes)?),
        16 => FrameStack::U16(decode_typed::<u16>(layout, bytes)?),
        32 => FrameStack::U32(decode_typed::<u32>(layout, bytes)?),
        _ => return Err(HeaderError::UnsupportedCounterDepth(header.counter_depth).into()),
    };
    Ok(DecodedFrames {
        stack,
        truncated: layout.truncated,
    })
}

fn decode_typed<T: Pixel>(layout: &FrameLayout, bytes: &[u8]) -> Result<Array3<T>, DecodeError> {
    let mut frames = Array3::<T>::default((layout.frame_count, layout.height, layout.width));
    let mut pixels = vec![T::default(); layout.width * layout.height];
    for (index, frame) in frames.outer_iter_mut().enumerate() {
        decode_into(layout, bytes, index, &mut pixels, frame)?;
    }
    Ok(frames)
}

/// Decode frame `index` into frame, using pixels as scratch space
fn decode_into<T: Pixel>(
    layout: &FrameLayout,
    bytes: &[u8],
    index: usize,
    pixels: &mut [T],
    mut frame: ArrayViewMut2<T>,
) -> Result<(), DecodeError> {
    let payload = layout.payload(bytes, index);
    if layout.bit_packed {
        unpack_bits(payload, pixels);
    } else {
        for (pixel, chunk) in pixels
            .iter_mut()
            .zip(payload.chunks_exact(layout.element_bytes))
        {
            *pixel = T::read_be(chunk);
        }
    }

    if let Some(cols) = layout.column_block {
        deinterleave(pixels, cols);
    }

    if layout.reassemble_quadrants {
        assemble_quadrants(pixels, &mut frame)
    } else {
        frame.assign(&ArrayView2::from_shape(
            (layout.height, layout.width),
            &*pixels,
        )?);
        Ok(())
    }
}

/// Decodes one frame at a time into buffers that are reused for every frame
#[derive(Debug)]
pub struct FrameReader<T: Pixel> {
    pixels: Vec<T>,
    frame: Array2<T>,
}

impl<T: Pixel> FrameReader<T> {
    pub fn new(layout: &FrameLayout) -> Self {
        Self {
            pixels: vec![T::default(); layout.width * layout.height],
            frame: Array2::default((layout.height, layout.width)),
        }
    }

    /// Decode frame `index`; the view is valid until the next read
    pub fn read(
        &mut self,
        layout: &FrameLayout,
        bytes: &[u8],
        index: usize,
    ) -> Result<ArrayView2<'_, T>, DecodeError> {
        decode_into(layout, bytes, index, &mut self.pixels, self.frame.view_mut())?;
        Ok(self.frame.view())
    }
}

fn unpack_bits<T: Pixel>(payload: &[u8], pixels: &mut [T]) {
    for (chunk, byte) in pixels.chunks_exact_mut(8).zip(payload) {
        for (bit, pixel) in chunk.iter_mut().enumerate() {
            *pixel = T::from_u8((byte >> (7 - bit)) & 1);
        }
    }
}

/// The chips read out in blocks of `cols` pixels in reverse order; mirror every block
fn deinterleave<T: Pixel>(pixels: &mut [T], cols: usize) {
    pixels
        .chunks_exact_mut(cols)
        .for_each(|block| block.reverse());
}

/// A RAW quad frame is a (256, 1024) strip of four chips side by side. Chips 3 and 4
/// are mounted rotated by 180 degrees and form the lower half of the sensor.
fn assemble_quadrants<T: Pixel>(
    pixels: &[T],
    frame: &mut ArrayViewMut2<T>,
) -> Result<(), DecodeError> {
    let strip = ArrayView2::from_shape((QUAD_SIZE / 2, QUAD_SIZE * 2), pixels)?;
    let c = CHIP_SIZE;
    frame
        .slice_mut(s![..c, ..c])
        .assign(&strip.slice(s![.., 0..c]));
    frame
        .slice_mut(s![..c, c..])
        .assign(&strip.slice(s![.., c..2 * c]));
    frame
        .slice_mut(s![c.., ..c])
        .assign(&strip.slice(s![..;-1, 2 * c..3 * c;-1]));
    frame
        .slice_mut(s![c.., c..])
        .assign(&strip.slice(s![..;-1, 3 * c..4 * c;-1]));
    Ok(())
}
