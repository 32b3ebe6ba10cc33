use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::conversion::ConversionOutput;
use super::error::SinkError;
use super::frame_decoder::TruncatedData;
use super::header::HeaderInfo;
use super::reshape::{ReshapeStrategy, ScanGeometry};

/// Destination for converted acquisitions
pub trait ScanSink {
    /// Persist one converted file into dir, naming outputs after stem
    fn write(&mut self, dir: &Path, stem: &str, output: &ConversionOutput) -> Result<(), SinkError>;
}

/// Writes a human readable `<stem>.yml` next to the data describing what was converted
#[derive(Debug, Default)]
pub struct YamlSummarySink {
    written: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ConversionSummary<'a> {
    source: String,
    date: String,
    file_size: String,
    frame_count: usize,
    shape: Vec<usize>,
    header: &'a HeaderInfo,
    strategy: Option<ReshapeStrategy>,
    geometry: Option<ScanGeometry>,
    warnings: Vec<String>,
    truncated: Option<TruncatedData>,
    bin_factor: usize,
}

impl YamlSummarySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of every summary written so far
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ScanSink for YamlSummarySink {
    fn write(&mut self, dir: &Path, stem: &str, output: &ConversionOutput) -> Result<(), SinkError> {
        let mut warnings = output
            .reshape
            .as_ref()
            .map(|r| r.warnings.clone())
            .unwrap_or_default();
        if let Some(truncated) = output.truncated {
            warnings.push(truncated.to_string());
        }
        let summary = ConversionSummary {
            source: output.source().to_string_lossy().to_string(),
            date: output.header.date_string(),
            file_size: human_bytes::human_bytes(output.size_bytes() as f64),
            frame_count: output.frame_count,
            shape: output.shape(),
            header: &output.header,
            strategy: output.reshape.as_ref().map(|r| r.strategy),
            geometry: output.geometry(),
            warnings,
            truncated: output.truncated,
            bin_factor: output.bin_factor,
        };

        let path = dir.join(format!("{stem}.yml"));
        let mut file = std::fs::File::create(&path)?;
        file.write_all(serde_yaml::to_string(&summary)?.as_bytes())?;
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::conversion::convert_file;
    use crate::test_utils::*;
    use ndarray::Array2;

    #[test]
    fn test_yaml_summary_contents() {
        let dir = tempfile::tempdir().unwrap();
        let header = make_header("U16", "1x1", 0);
        let frames: Vec<Array2<u16>> = (0..5).map(|i| flat_frame(256, i)).collect();
        let path = write_file(dir.path(), "scan.mib", &encode_processed(&header, &frames));
        let output = convert_file(&Config::default(), &path, true).unwrap();

        let mut sink = YamlSummarySink::new();
        sink.write(dir.path(), &output.stem(), &output).unwrap();
        assert_eq!(sink.written(), &[dir.path().join("scan.yml")]);

        let text = std::fs::read_to_string(dir.path().join("scan.yml")).unwrap();
        let yaml: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(yaml["frame_count"].as_u64(), Some(5));
        assert_eq!(yaml["date"].as_str(), Some("20200102"));
        assert_eq!(yaml["strategy"].as_str(), Some("fixed_size"));
        assert_eq!(yaml["header"]["counter_depth"].as_u64(), Some(12));
        // 5 frames fall back to a 2x2 scan
        assert_eq!(yaml["geometry"]["skip"].as_u64(), Some(1));
    }
}
