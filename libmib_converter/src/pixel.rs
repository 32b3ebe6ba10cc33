use byteorder::{BigEndian, ByteOrder};
use ndarray::{Array, Array2, ArrayView, Dimension, Ix2, Ix3, Ix4};

/// An unsigned pixel element as stored in a MIB file (always big-endian)
pub trait Pixel: Copy + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    const BITS: u32;

    /// Read one element from the front of a big-endian byte slice
    fn read_be(bytes: &[u8]) -> Self;

    /// Widen an unpacked 1-bit counter value
    fn from_u8(value: u8) -> Self;

    fn to_u64(self) -> u64;
}

impl Pixel for u8 {
    const BITS: u32 = 8;

    fn read_be(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn from_u8(value: u8) -> Self {
        value
    }

    fn to_u64(self) -> u64 {
        self as u64
    }
}

impl Pixel for u16 {
    const BITS: u32 = 16;

    fn read_be(bytes: &[u8]) -> Self {
        BigEndian::read_u16(bytes)
    }

    fn from_u8(value: u8) -> Self {
        u16::from(value)
    }

    fn to_u64(self) -> u64 {
        self as u64
    }
}

impl Pixel for u32 {
    const BITS: u32 = 32;

    fn read_be(bytes: &[u8]) -> Self {
        BigEndian::read_u32(bytes)
    }

    fn from_u8(value: u8) -> Self {
        u32::from(value)
    }

    fn to_u64(self) -> u64 {
        self as u64
    }
}

/// An owned array whose element type is picked at runtime from the header's element width
#[derive(Debug, Clone, PartialEq)]
pub enum PixelArray<D: Dimension> {
    U8(Array<u8, D>),
    U16(Array<u16, D>),
    U32(Array<u32, D>),
}

/// Decoded frames indexed (frame, row, col)
pub type FrameStack = PixelArray<Ix3>;
/// Reshaped frames indexed (scan_row, scan_col, row, col)
pub type ScanVolume = PixelArray<Ix4>;

impl<D: Dimension> PixelArray<D> {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::U8(a) => a.shape(),
            Self::U16(a) => a.shape(),
            Self::U32(a) => a.shape(),
        }
    }

    pub fn element_bit_width(&self) -> u32 {
        match self {
            Self::U8(_) => u8::BITS,
            Self::U16(_) => u16::BITS,
            Self::U32(_) => u32::BITS,
        }
    }
}

impl FrameStack {
    pub fn frame_count(&self) -> usize {
        self.shape()[0]
    }
}

/// A borrowed array typed by the header's element width
#[derive(Debug, Clone, Copy)]
pub enum PixelView<'a, D: Dimension> {
    U8(ArrayView<'a, u8, D>),
    U16(ArrayView<'a, u16, D>),
    U32(ArrayView<'a, u32, D>),
}

/// One decoded (row, col) frame
pub type FrameView<'a> = PixelView<'a, Ix2>;

impl<'a> FrameView<'a> {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::U8(v) => v.dim(),
            Self::U16(v) => v.dim(),
            Self::U32(v) => v.dim(),
        }
    }

    /// Total intensity of the frame
    pub fn sum(&self) -> u64 {
        match self {
            Self::U8(v) => v.iter().map(|p| p.to_u64()).sum(),
            Self::U16(v) => v.iter().map(|p| p.to_u64()).sum(),
            Self::U32(v) => v.iter().map(|p| p.to_u64()).sum(),
        }
    }

    /// Add every pixel onto acc, which must have the frame's shape
    pub fn add_to(&self, acc: &mut Array2<u64>) {
        match self {
            Self::U8(v) => acc.zip_mut_with(v, |a, p| *a += p.to_u64()),
            Self::U16(v) => acc.zip_mut_with(v, |a, p| *a += p.to_u64()),
            Self::U32(v) => acc.zip_mut_with(v, |a, p| *a += p.to_u64()),
        }
    }
}
