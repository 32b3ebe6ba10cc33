use std::sync::mpsc::Sender;

use super::acquisition::{find_pending, AcquisitionDescriptor};
use super::config::Config;
use super::conversion::convert_file;
use super::error::ProcessorError;
#[cfg(feature = "hdf5")]
use super::hdf_writer::HDFWriter;
use super::sink::{ScanSink, YamlSummarySink};
use super::worker_status::{BarColor, WorkerStatus};

/// Tally of one acquisition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub converted: usize,
    pub failed: usize,
}

/// The sinks every conversion is written to
pub fn default_sinks() -> Vec<Box<dyn ScanSink>> {
    let yaml: Box<dyn ScanSink> = Box::new(YamlSummarySink::new());
    std::iter::once(yaml).chain(hdf5_sinks()).collect()
}

#[cfg(feature = "hdf5")]
fn hdf5_sinks() -> Vec<Box<dyn ScanSink>> {
    vec![Box::new(HDFWriter::new())]
}

#[cfg(not(feature = "hdf5"))]
fn hdf5_sinks() -> Vec<Box<dyn ScanSink>> {
    Vec::new()
}

/// Run one acquisition, containing its failure. Only a lost progress channel is
/// propagated; any other error marks the acquisition failed and the caller moves on.
pub fn process_isolated(
    config: &Config,
    acquisition: &AcquisitionDescriptor,
    sinks: &mut [Box<dyn ScanSink>],
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<AcquisitionReport, ProcessorError> {
    match process_acquisition(config, acquisition, sinks, tx, worker_id) {
        Ok(report) => Ok(report),
        Err(ProcessorError::SendError(e)) => Err(ProcessorError::SendError(e)),
        Err(e) => {
            log::error!("Acquisition {} failed: {e}", acquisition.name);
            tx.send(WorkerStatus::new(
                1.0,
                &acquisition.name,
                *worker_id,
                BarColor::RED,
            ))?;
            Ok(AcquisitionReport {
                converted: 0,
                failed: acquisition.mib_files.len().max(1),
            })
        }
    }
}

/// Convert every .mib file of one acquisition into its output directory.
///
/// A lone STEM file is reshaped into a scan; multi-file and TEM acquisitions are kept as
/// frame stacks. Failures of individual files are logged and counted, never propagated.
pub fn process_acquisition(
    config: &Config,
    acquisition: &AcquisitionDescriptor,
    sinks: &mut [Box<dyn ScanSink>],
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<AcquisitionReport, ProcessorError> {
    std::fs::create_dir_all(&acquisition.output_dir)?;
    let total_size = acquisition.total_size_bytes();
    log::info!(
        "Acquisition {} holds {} .mib files, total size: {}",
        acquisition.name,
        acquisition.mib_files.len(),
        human_bytes::human_bytes(total_size as f64)
    );

    let stem_reshape = acquisition.stem && acquisition.mib_files.len() == 1;
    if acquisition.stem && !stem_reshape {
        log::warn!(
            "Acquisition {} has {} .mib files; saving each as a frame stack",
            acquisition.name,
            acquisition.mib_files.len()
        );
    }

    let mut report = AcquisitionReport::default();
    let mut done_size: u64 = 0;
    tx.send(WorkerStatus::new(
        0.0,
        &acquisition.name,
        *worker_id,
        BarColor::CYAN,
    ))?;
    for (path, size) in acquisition.mib_files.iter() {
        let result = convert_file(config, path, stem_reshape).and_then(|output| {
            let stem = output.stem();
            for sink in sinks.iter_mut() {
                sink.write(&acquisition.output_dir, &stem, &output)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => report.converted += 1,
            Err(e) => {
                log::error!("Failed to convert {}: {e}", path.display());
                report.failed += 1;
            }
        }
        done_size += size;
        tx.send(WorkerStatus::new(
            done_size as f32 / total_size.max(1) as f32,
            &acquisition.name,
            *worker_id,
            BarColor::CYAN,
        ))?;
    }
    tx.send(WorkerStatus::new(
        1.0,
        &acquisition.name,
        *worker_id,
        if report.failed == 0 {
            BarColor::GREEN
        } else {
            BarColor::RED
        },
    ))?;
    log::info!(
        "Done with acquisition {}: {} converted, {} failed.",
        acquisition.name,
        report.converted,
        report.failed
    );
    Ok(report)
}

/// The function to be called by a separate thread.
/// Converts every pending acquisition.
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<AcquisitionReport, ProcessorError> {
    let pending = find_pending(&config)?;
    process_subset(config, tx, worker_id, pending)
}

/// Process a subset of acquisitions
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<AcquisitionDescriptor>,
) -> Result<AcquisitionReport, ProcessorError> {
    let mut sinks = default_sinks();
    let mut total = AcquisitionReport::default();
    for acquisition in subset {
        if acquisition.is_pending() {
            log::info!("Processing acquisition {}...", acquisition.name);
            let report = process_isolated(&config, &acquisition, &mut sinks, &tx, &worker_id)?;
            total.converted += report.converted;
            total.failed += report.failed;
            log::info!("Finished processing acquisition {}.", acquisition.name);
        } else {
            log::info!(
                "Acquisition {} was already converted, skipping...",
                acquisition.name
            );
        }
    }
    Ok(total)
}

/// Divide the acquisitions in to a set of subsets (per thread/worker)
pub fn create_subsets(
    config: &Config,
    acquisitions: Vec<AcquisitionDescriptor>,
) -> Vec<Vec<AcquisitionDescriptor>> {
    let mut subsets: Vec<Vec<AcquisitionDescriptor>> =
        vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for (idx, acquisition) in acquisitions.into_iter().enumerate() {
        subsets[idx % n_subsets].push(acquisition)
    }

    subsets
}
