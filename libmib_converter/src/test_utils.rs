//! Builders for synthetic MIB files used across the unit tests
use ndarray::{s, Array2};
use std::path::{Path, PathBuf};

use super::constants::{lookup, RAW_COLUMN_BLOCKS};
use super::header::{parse_header_text, ChipLayout, HeaderInfo};
use super::pixel::Pixel;

/// A parsed header for the given depth code ("R64", "U16", "U08"), layout ("1x1", "2x2")
/// and RAW counter depth (ignored by processed codes)
pub fn make_header(code: &str, layout: &str, depth: u32) -> HeaderInfo {
    let (size, offset) = match layout {
        "2x2" => (512, 768),
        _ => (256, 384),
    };
    let chips = if layout == "2x2" { 4 } else { 1 };
    let text = format!(
        "MQ1,000001,{offset:05},{chips:02},{size:04},{size:04},{code},{layout:>6},15,2020-01-02 03:04:05.000001,0.001,0,0,0,0,0,0,0,{depth},0"
    );
    match parse_header_text(&text) {
        Ok(header) => header,
        Err(e) => panic!("bad test header {text:?}: {e}"),
    }
}

/// An orientation sensitive test image
pub fn pattern_frame(size: usize, seed: usize) -> Array2<u16> {
    Array2::from_shape_fn((size, size), |(r, c)| {
        ((r * 17 + c * 3 + seed * 101) % 60000) as u16
    })
}

/// A frame where every pixel holds value
pub fn flat_frame(size: usize, value: u16) -> Array2<u16> {
    Array2::from_elem((size, size), value)
}

fn push_be<T: Pixel>(bytes: &mut Vec<u8>, value: T) {
    let width = (T::BITS / 8) as usize;
    bytes.extend_from_slice(&value.to_u64().to_be_bytes()[8 - width..]);
}

/// Frames written as processed images, each behind its own header
pub fn encode_processed<T: Pixel>(header: &HeaderInfo, frames: &[Array2<T>]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for frame in frames {
        bytes.extend(header.encode());
        for value in frame.iter() {
            push_be(&mut bytes, *value);
        }
    }
    bytes
}

/// Frames written in raw read-out order: quadrants laid side by side with the lower
/// chips rotated, column blocks mirrored and 1-bit data packed.
pub fn encode_raw<T: Pixel>(header: &HeaderInfo, frames: &[Array2<T>]) -> Vec<u8> {
    let cols = match lookup(&RAW_COLUMN_BLOCKS, header.counter_depth) {
        Some(cols) => cols,
        None => panic!("no column block for depth {}", header.counter_depth),
    };
    let mut bytes = Vec::new();
    for frame in frames {
        bytes.extend(header.encode());
        let mut pixels: Vec<T> = match header.chip_layout {
            ChipLayout::Quad => {
                let mut strip = Array2::<T>::default((256, 1024));
                strip.slice_mut(s![.., 0..256]).assign(&frame.slice(s![..256, ..256]));
                strip
                    .slice_mut(s![.., 256..512])
                    .assign(&frame.slice(s![..256, 256..]));
                strip
                    .slice_mut(s![..;-1, 512..768;-1])
                    .assign(&frame.slice(s![256.., ..256]));
                strip
                    .slice_mut(s![..;-1, 768..1024;-1])
                    .assign(&frame.slice(s![256.., 256..]));
                strip.iter().copied().collect()
            }
            ChipLayout::Single => frame.iter().copied().collect(),
        };
        pixels.chunks_exact_mut(cols).for_each(|block| block.reverse());

        if header.counter_depth == 1 {
            for chunk in pixels.chunks_exact(8) {
                let byte = chunk
                    .iter()
                    .fold(0u8, |acc, p| (acc << 1) | (p.to_u64() & 1) as u8);
                bytes.push(byte);
            }
        } else {
            for value in pixels {
                push_be(&mut bytes, value);
            }
        }
    }
    bytes
}

/// Write bytes to name inside dir and return the path
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            panic!("could not create {parent:?}: {e}");
        }
    }
    if let Err(e) = std::fs::write(&path, bytes) {
        panic!("could not write {path:?}: {e}");
    }
    path
}
