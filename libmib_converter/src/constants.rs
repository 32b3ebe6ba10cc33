// Detector geometry and the fixed lookup tables of the MIB format.

/// Edge length of a single detector chip in pixels
pub const CHIP_SIZE: usize = 256;
/// Edge length of the 2x2 quad assembly in pixels
pub const QUAD_SIZE: usize = 2 * CHIP_SIZE;

/// Minimum number of comma-separated fields a MIB header must carry (through the shutter time)
pub const MIN_HEADER_FIELDS: usize = 11;

// Positional header fields
pub const FIELD_DATA_OFFSET: usize = 2;
pub const FIELD_CHIP_COUNT: usize = 3;
pub const FIELD_PIXEL_DEPTH: usize = 6;
pub const FIELD_SENSOR_LAYOUT: usize = 7;
pub const FIELD_TIMESTAMP: usize = 9;
pub const FIELD_SHUTTER_TIME: usize = 10;
pub const FIELD_RAW_COUNTER_DEPTH: usize = 18;

/// Bytes per frame (header included) for the single chip assembly, keyed by counter depth bucket
pub const SINGLE_FRAME_SIZES: [(u32, usize); 3] = [(1, 8576), (6, 65920), (12, 131456)];
/// Bytes per frame (header included) for the quad assembly, keyed by counter depth bucket
pub const QUAD_FRAME_SIZES: [(u32, usize); 3] = [(1, 33536), (6, 262912), (12, 525056)];

/// Storage width in bits for each acquired counter depth.
///
/// Historical convention of the detector software: 1-bit data is stored in 8-bit
/// elements, otherwise depth + depth/3.
pub const ELEMENT_BIT_WIDTHS: [(u32, u32); 4] = [(1, 8), (6, 8), (12, 16), (24, 32)];

/// Read-out column block used to de-interleave RAW frames, keyed by counter depth
pub const RAW_COLUMN_BLOCKS: [(u32, usize); 4] = [(1, 64), (6, 8), (12, 4), (24, 4)];

/// Leading frames used for fly-back detection are `FLYBACK_CROP_FACTOR * sqrt(frame_count)`
pub const FLYBACK_CROP_FACTOR: f64 = 20.0;

/// Number of scan positions sampled per axis for the subset diffraction sum
pub const SUBSET_SAMPLES: usize = 50;

/// Look up a value in one of the small keyed tables above
pub fn lookup<T: Copy>(table: &[(u32, T)], key: u32) -> Option<T> {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, value)| *value)
}
