//! Parsing of the ASCII header that prefixes every MIB frame.
//!
//! The header is a comma separated list of positional fields terminated by a NUL
//! byte. Only the first frame's header is parsed; all frames of an acquisition share
//! the same layout.
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time};

use super::constants::*;
use super::error::HeaderError;

/// The pixel depth code written by the detector software
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelDepthCode {
    R64,
    U16,
    U08,
}

impl FromStr for PixelDepthCode {
    type Err = HeaderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "R64" => Ok(Self::R64),
            "U16" => Ok(Self::U16),
            "U08" => Ok(Self::U08),
            other => Err(HeaderError::UnsupportedEncoding(other.to_string())),
        }
    }
}

impl PixelDepthCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::R64 => "R64",
            Self::U16 => "U16",
            Self::U08 => "U08",
        }
    }

    /// R64 frames are raw read-out; everything else is already an image
    pub fn storage_encoding(&self) -> StorageEncoding {
        match self {
            Self::R64 => StorageEncoding::RawPacked,
            Self::U16 | Self::U08 => StorageEncoding::Processed,
        }
    }
}

/// Physical tiling of the detector chips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChipLayout {
    Single,
    Quad,
}

impl FromStr for ChipLayout {
    type Err = HeaderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1x1" => Ok(Self::Single),
            "2x2" => Ok(Self::Quad),
            other => Err(HeaderError::UnsupportedLayout(other.to_string())),
        }
    }
}

impl ChipLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "1x1",
            Self::Quad => "2x2",
        }
    }

    /// Final image (width, height) of the assembly
    pub fn dimensions(&self) -> (usize, usize) {
        match self {
            Self::Single => (CHIP_SIZE, CHIP_SIZE),
            Self::Quad => (QUAD_SIZE, QUAD_SIZE),
        }
    }
}

/// How frames are laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageEncoding {
    /// Raw read-out order; needs de-interleaving and, for the quad, quadrant reassembly
    RawPacked,
    /// Already laid out as simple images
    Processed,
}

/// Layout metadata of a MIB acquisition. Pixel data is always big-endian.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderInfo {
    pub data_offset: usize,
    pub chip_count: u32,
    pub pixel_depth: PixelDepthCode,
    pub chip_layout: ChipLayout,
    pub counter_depth: u32,
    pub storage_encoding: StorageEncoding,
    pub element_bit_width: u32,
    pub shutter_time: f64,
    pub timestamp: String,
    #[serde(skip)]
    pub acquired: PrimitiveDateTime,
}

impl HeaderInfo {
    pub fn width(&self) -> usize {
        self.chip_layout.dimensions().0
    }

    pub fn height(&self) -> usize {
        self.chip_layout.dimensions().1
    }

    /// Bytes per stored pixel element
    pub fn element_bytes(&self) -> usize {
        (self.element_bit_width / 8) as usize
    }

    /// Acquisition date as YYYYMMDD
    pub fn date_string(&self) -> String {
        let date = self.acquired.date();
        format!(
            "{:04}{:02}{:02}",
            date.year(),
            u8::from(date.month()),
            date.day()
        )
    }

    /// Encode this header the way the detector writes it: comma separated, NUL
    /// terminated and zero padded to the data offset.
    pub fn encode(&self) -> Vec<u8> {
        let (width, height) = self.chip_layout.dimensions();
        let mut fields: Vec<String> = vec![
            String::from("MQ1"),
            String::from("000001"),
            format!("{:05}", self.data_offset),
            format!("{:02}", self.chip_count),
            format!("{:04}", width),
            format!("{:04}", height),
            String::from(self.pixel_depth.as_str()),
            format!("{:>6}", self.chip_layout.as_str()),
            String::from("15"),
            self.timestamp.clone(),
            format!("{}", self.shutter_time),
        ];
        fields.extend((fields.len()..FIELD_RAW_COUNTER_DEPTH).map(|_| String::from("0")));
        fields.push(format!("{}", self.counter_depth));
        fields.push(String::from("0"));

        let mut bytes = fields.join(",").into_bytes();
        bytes.push(0);
        if bytes.len() < self.data_offset {
            bytes.resize(self.data_offset, 0);
        }
        bytes
    }
}

/// Read header bytes one at a time until a NUL byte or the end of the stream.
///
/// Returns the header text and the number of bytes consumed, NUL included.
pub fn read_header_text<R: Read>(reader: R) -> Result<(String, usize), HeaderError> {
    let mut text = String::new();
    let mut consumed = 0;
    for byte in reader.bytes() {
        let byte = byte?;
        consumed += 1;
        if byte == 0 {
            break;
        }
        text.push(byte as char);
    }
    Ok((text, consumed))
}

/// Parse the header of the MIB file at path
pub fn parse_header(path: &Path) -> Result<HeaderInfo, HeaderError> {
    let reader = BufReader::new(File::open(path)?);
    let (text, _) = read_header_text(reader)?;
    parse_header_text(&text)
}

/// Parse a header from the leading bytes of a MIB file
pub fn parse_header_bytes(bytes: &[u8]) -> Result<HeaderInfo, HeaderError> {
    let (text, _) = read_header_text(bytes)?;
    parse_header_text(&text)
}

/// Parse the comma separated header text into a HeaderInfo
pub fn parse_header_text(text: &str) -> Result<HeaderInfo, HeaderError> {
    let fields: Vec<&str> = text.split(',').collect();
    if fields.len() < MIN_HEADER_FIELDS {
        return Err(HeaderError::MissingFields(fields.len(), MIN_HEADER_FIELDS));
    }

    let data_offset = parse_integer::<usize>(&fields, FIELD_DATA_OFFSET)?;
    let chip_count = parse_integer::<u32>(&fields, FIELD_CHIP_COUNT)?;
    let pixel_depth = PixelDepthCode::from_str(fields[FIELD_PIXEL_DEPTH])?;
    let chip_layout = ChipLayout::from_str(fields[FIELD_SENSOR_LAYOUT])?;
    let timestamp = fields[FIELD_TIMESTAMP].to_string();
    let shutter_time = fields[FIELD_SHUTTER_TIME]
        .trim()
        .parse::<f64>()
        .map_err(|_| HeaderError::BadFloat {
            index: FIELD_SHUTTER_TIME,
            value: fields[FIELD_SHUTTER_TIME].to_string(),
        })?;

    let counter_depth = match pixel_depth {
        PixelDepthCode::R64 => {
            if fields.len() <= FIELD_RAW_COUNTER_DEPTH {
                return Err(HeaderError::MissingFields(
                    fields.len(),
                    FIELD_RAW_COUNTER_DEPTH + 1,
                ));
            }
            parse_integer::<u32>(&fields, FIELD_RAW_COUNTER_DEPTH)?
        }
        PixelDepthCode::U16 => 12,
        PixelDepthCode::U08 => 6,
    };
    let element_bit_width = lookup(&ELEMENT_BIT_WIDTHS, counter_depth)
        .ok_or(HeaderError::UnsupportedCounterDepth(counter_depth))?;

    let acquired = parse_timestamp(&timestamp)?;

    Ok(HeaderInfo {
        data_offset,
        chip_count,
        pixel_depth,
        chip_layout,
        counter_depth,
        storage_encoding: pixel_depth.storage_encoding(),
        element_bit_width,
        shutter_time,
        timestamp,
        acquired,
    })
}

fn parse_integer<T: FromStr>(fields: &[&str], index: usize) -> Result<T, HeaderError> {
    fields[index]
        .trim()
        .parse::<T>()
        .map_err(|_| HeaderError::BadInteger {
            index,
            value: fields[index].to_string(),
        })
}

/// Parse an acquisition timestamp in either `YYYY-MM-DD HH:MM:SS[.ffffff]` or the older
/// `DD/MM/YYYY HH:MM:SS[.ffffff]` form.
pub fn parse_timestamp(raw: &str) -> Result<PrimitiveDateTime, HeaderError> {
    let error = || HeaderError::TimestampParse(raw.to_string());
    let (date_str, time_str) = raw.trim().split_once(' ').ok_or_else(error)?;

    let date = Date::parse(date_str, format_description!("[year]-[month]-[day]"))
        .or_else(|_| Date::parse(date_str, format_description!("[day]/[month]/[year]")))
        .map_err(|_| error())?;

    let time_str = time_str.trim();
    let time = if time_str.contains('.') {
        Time::parse(
            time_str,
            format_description!("[hour]:[minute]:[second].[subsecond]"),
        )
    } else {
        Time::parse(time_str, format_description!("[hour]:[minute]:[second]"))
    }
    .map_err(|_| error())?;

    Ok(PrimitiveDateTime::new(date, time))
}
