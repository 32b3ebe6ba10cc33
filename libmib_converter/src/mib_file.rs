use memmap2::Mmap;
use ndarray::ArrayView2;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};

use super::error::{DecodeError, HeaderError};
use super::frame_decoder::{
    decode_with_layout, DecodedFrames, FrameLayout, FrameReader, TruncatedData,
};
use super::header::{parse_header_bytes, HeaderInfo};
use super::pixel::{FrameView, Pixel};

/// Memory map a file read-only. The file must not be truncated while the map is alive.
pub fn read_binary_file_mmap(path: &Path) -> std::io::Result<Mmap> {
    let file = File::open(path)?;
    // Safety: acquisitions are only read once the detector has finished writing them
    unsafe { Mmap::map(&file) }
}

/// A memory mapped MIB file with its parsed header and frame layout.
///
/// Nothing beyond the header is touched until frames or intensities are requested.
#[derive(Debug)]
pub struct MibFile {
    path: PathBuf,
    data: Mmap,
    header: HeaderInfo,
    layout: FrameLayout,
}

impl MibFile {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let data = read_binary_file_mmap(path)?;
        let header = parse_header_bytes(&data)?;
        Self::from_parts(path, data, header)
    }

    /// Open with a header that was already parsed (by `parse_header`)
    pub fn open_with_header(path: &Path, header: HeaderInfo) -> Result<Self, DecodeError> {
        let data = read_binary_file_mmap(path)?;
        Self::from_parts(path, data, header)
    }

    fn from_parts(path: &Path, data: Mmap, header: HeaderInfo) -> Result<Self, DecodeError> {
        let layout = FrameLayout::new(&header, data.len())?;
        Ok(Self {
            path: path.to_path_buf(),
            data,
            header,
            layout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &HeaderInfo {
        &self.header
    }

    pub fn frame_count(&self) -> usize {
        self.layout.frame_count
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// Set when the file does not end on a whole frame
    pub fn truncated(&self) -> Option<TruncatedData> {
        self.layout.truncated
    }

    /// Total intensity of each of the first `frames` frames
    pub fn intensity_signal(&self, frames: usize) -> Vec<u64> {
        self.layout.intensity_signal(&self.data, frames)
    }

    /// Decode the frames in range one at a time and hand each to visit. Only one frame
    /// is held in memory; frames past the end of the file are ignored.
    pub fn for_each_frame<E, F>(&self, frames: Range<usize>, mut visit: F) -> Result<(), E>
    where
        E: From<DecodeError>,
        F: FnMut(usize, FrameView<'_>) -> Result<(), E>,
    {
        match self.header.element_bit_width {
            8 => self.visit_typed::<u8, E, _>(frames, |i, v| visit(i, FrameView::U8(v))),
            16 => self.visit_typed::<u16, E, _>(frames, |i, v| visit(i, FrameView::U16(v))),
            32 => self.visit_typed::<u32, E, _>(frames, |i, v| visit(i, FrameView::U32(v))),
            _ => Err(DecodeError::from(HeaderError::UnsupportedCounterDepth(
                self.header.counter_depth,
            ))
            .into()),
        }
    }

    fn visit_typed<T: Pixel, E, F>(&self, frames: Range<usize>, mut visit: F) -> Result<(), E>
    where
        E: From<DecodeError>,
        F: FnMut(usize, ArrayView2<'_, T>) -> Result<(), E>,
    {
        let mut reader = FrameReader::<T>::new(&self.layout);
        for index in frames.start..frames.end.min(self.frame_count()) {
            let frame = reader.read(&self.layout, &self.data, index)?;
            visit(index, frame)?;
        }
        Ok(())
    }

    /// Materialise the whole frame stack
    pub fn decode(&self) -> Result<DecodedFrames, DecodeError> {
        decode_with_layout(&self.header, &self.layout, &self.data)
    }
}

/// Decode every frame of the MIB file at path using an already parsed header
pub fn decode_frames(header: &HeaderInfo, path: &Path) -> Result<DecodedFrames, DecodeError> {
    MibFile::open_with_header(path, header.clone())?.decode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_header;
    use crate::pixel::FrameStack;
    use crate::test_utils::*;
    use ndarray::Array2;

    #[test]
    fn test_open_and_decode_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let header = make_header("U16", "2x2", 0);
        let frames: Vec<Array2<u16>> = (0..5).map(|i| pattern_frame(512, i)).collect();
        let path = write_file(dir.path(), "scan.mib", &encode_processed(&header, &frames));

        let file = MibFile::open(&path).unwrap();
        assert_eq!(file.header(), &header);
        assert_eq!(file.frame_count(), 5);
        assert_eq!(file.size_bytes(), 5 * 525056);
        assert_eq!(file.truncated(), None);

        let decoded = file.decode().unwrap();
        assert_eq!(decoded.stack.shape(), &[5, 512, 512]);
        assert_eq!(decoded.truncated, None);
    }

    #[test]
    fn test_decode_frames_with_parsed_header() {
        let dir = tempfile::tempdir().unwrap();
        let header = make_header("U08", "1x1", 0);
        let frames: Vec<Array2<u8>> = (0..3).map(|i| flat_frame(256, i as u16).mapv(|v| v as u8)).collect();
        let path = write_file(dir.path(), "tem.mib", &encode_processed(&header, &frames));

        let parsed = parse_header(&path).unwrap();
        let decoded = decode_frames(&parsed, &path).unwrap();
        match decoded.stack {
            FrameStack::U8(stack) => {
                assert_eq!(stack.shape(), &[3, 256, 256]);
                assert_eq!(stack[[2, 100, 100]], 2);
            }
            other => panic!("expected u8 frames, got {:?}", other.element_bit_width()),
        }
    }

    #[test]
    fn test_intensity_signal_is_lazy_per_frame_sum() {
        let dir = tempfile::tempdir().unwrap();
        let header = make_header("U16", "1x1", 0);
        let frames: Vec<Array2<u16>> = [1, 5, 2].iter().map(|v| flat_frame(256, *v)).collect();
        let path = write_file(dir.path(), "sig.mib", &encode_processed(&header, &frames));

        let file = MibFile::open(&path).unwrap();
        let per_frame = 256 * 256;
        assert_eq!(file.intensity_signal(2), vec![per_frame, 5 * per_frame]);
        assert_eq!(file.intensity_signal(100).len(), 3);
    }

    #[test]
    fn test_frames_are_streamed_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let header = make_header("U16", "1x1", 0);
        let frames: Vec<Array2<u16>> = (0..6).map(|i| flat_frame(256, i)).collect();
        let path = write_file(dir.path(), "stream.mib", &encode_processed(&header, &frames));
        let file = MibFile::open(&path).unwrap();
        assert_eq!(file.path(), path.as_path());

        let mut seen = Vec::new();
        file.for_each_frame(2..10, |index, frame| {
            assert_eq!(frame.dim(), (256, 256));
            seen.push((index, frame.sum()));
            Ok::<(), DecodeError>(())
        })
        .unwrap();
        let per_frame = 256 * 256;
        assert_eq!(
            seen,
            vec![(2, 2 * per_frame), (3, 3 * per_frame), (4, 4 * per_frame), (5, 5 * per_frame)]
        );
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MibFile::open(Path::new("/definitely/not/here.mib")),
            Err(DecodeError::HeaderError(_)) | Err(DecodeError::IOError(_))
        ));
    }
}
