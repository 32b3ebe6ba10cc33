//! Polling for new acquisitions while an experiment is running.
//!
//! Time is injected through [`Sleeper`] and stopping through [`CancelToken`], so the loop
//! can be driven without real delays.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use super::acquisition::{find_pending, AcquisitionDescriptor};
use super::config::Config;
use super::error::{ProcessorError, WatchError};
use super::process::{default_sinks, process_isolated, AcquisitionReport};
use super::sink::ScanSink;
use super::worker_status::WorkerStatus;

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Shared flag asking the watcher to stop after its current step
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Watcher<S: Sleeper> {
    config: Config,
    sleeper: S,
    cancel: CancelToken,
    sinks: Vec<Box<dyn ScanSink>>,
}

impl<S: Sleeper> Watcher<S> {
    pub fn new(config: Config, sleeper: S, cancel: CancelToken) -> Self {
        Self::with_sinks(config, sleeper, cancel, default_sinks())
    }

    pub fn with_sinks(
        config: Config,
        sleeper: S,
        cancel: CancelToken,
        sinks: Vec<Box<dyn ScanSink>>,
    ) -> Self {
        Self {
            config,
            sleeper,
            cancel,
            sinks,
        }
    }

    /// Poll until cancelled, returning the tally of everything converted
    pub fn run(&mut self, tx: &Sender<WorkerStatus>) -> Result<AcquisitionReport, WatchError> {
        log::info!(
            "Watching {} every {} seconds",
            self.config.raw_path.display(),
            self.config.poll_interval_secs
        );
        let mut total = AcquisitionReport::default();
        while !self.cancel.is_cancelled() {
            match self.poll_once(tx) {
                Ok(report) => {
                    total.converted += report.converted;
                    total.failed += report.failed;
                }
                Err(WatchError::ProcessorError(ProcessorError::SendError(e))) => {
                    return Err(ProcessorError::SendError(e).into())
                }
                Err(e) => log::error!("Polling failed: {e}; will retry on the next poll"),
            }
            if self.cancel.is_cancelled() {
                break;
            }
            self.sleeper
                .sleep(Duration::from_secs(self.config.poll_interval_secs));
        }
        log::info!("Stopped watching.");
        Ok(total)
    }

    /// Convert every acquisition that is pending and has finished copying
    pub fn poll_once(&mut self, tx: &Sender<WorkerStatus>) -> Result<AcquisitionReport, WatchError> {
        let mut total = AcquisitionReport::default();
        for acquisition in find_pending(&self.config)? {
            if self.cancel.is_cancelled() {
                break;
            }
            let name = acquisition.name.clone();
            let acquisition = match self.wait_for_copy(acquisition) {
                Ok(Some(acquisition)) => acquisition,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Could not check acquisition {name}: {e}; will retry on the next poll");
                    continue;
                }
            };
            let report = process_isolated(&self.config, &acquisition, &mut self.sinks, tx, &0)?;
            total.converted += report.converted;
            total.failed += report.failed;
        }
        Ok(total)
    }

    /// Wait until every .mib file keeps its size across two checks. Gives up after the
    /// configured number of attempts; the acquisition stays pending for the next poll.
    fn wait_for_copy(
        &mut self,
        mut acquisition: AcquisitionDescriptor,
    ) -> Result<Option<AcquisitionDescriptor>, WatchError> {
        let mut previous = acquisition.current_sizes()?;
        for _ in 0..self.config.copy_wait_attempts {
            self.sleeper
                .sleep(Duration::from_secs(self.config.copy_wait_secs));
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let sizes = acquisition.current_sizes()?;
            if sizes == previous {
                for ((_, size), current) in acquisition.mib_files.iter_mut().zip(sizes) {
                    *size = current;
                }
                return Ok(Some(acquisition));
            }
            log::info!("Acquisition {} is still being copied...", acquisition.name);
            previous = sizes;
        }
        log::warn!(
            "Acquisition {} did not finish copying, will retry on the next poll",
            acquisition.name
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use ndarray::Array2;
    use std::path::PathBuf;
    use std::sync::mpsc::channel;

    /// Records every sleep and runs a hook instead of waiting
    struct FakeSleeper<F: FnMut(usize)> {
        slept: Vec<Duration>,
        hook: F,
    }

    impl<F: FnMut(usize)> Sleeper for FakeSleeper<F> {
        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration);
            (self.hook)(self.slept.len());
        }
    }

    fn mib_bytes(frames: usize) -> Vec<u8> {
        let header = make_header("U08", "1x1", 0);
        let frames: Vec<Array2<u8>> = (0..frames)
            .map(|i| flat_frame(256, i as u16).mapv(|v| v as u8))
            .collect();
        encode_processed(&header, &frames)
    }

    fn make_config(dir: &std::path::Path) -> Config {
        Config {
            raw_path: dir.join("Merlin"),
            processing_path: dir.join("processing"),
            copy_wait_attempts: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_converts_then_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path());
        write_file(&config.raw_path.join("20200102_030405"), "scan.mib", &mib_bytes(4));

        let cancel = CancelToken::new();
        let stop = cancel.clone();
        let sleeper = FakeSleeper {
            slept: Vec::new(),
            hook: move |count| {
                if count == 2 {
                    stop.cancel()
                }
            },
        };
        let (tx, _rx) = channel();
        let mut watcher = Watcher::new(config.clone(), sleeper, cancel);
        let report = watcher.run(&tx).unwrap();

        assert_eq!(report.converted, 1);
        assert_eq!(
            watcher.sleeper.slept,
            vec![Duration::from_secs(20), Duration::from_secs(60)]
        );
        assert!(config
            .processing_path
            .join("20200102_030405/scan.yml")
            .exists());
    }

    #[test]
    fn test_waits_for_growing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path());
        let bytes = mib_bytes(4);
        let half = bytes.len() / 2;
        let path: PathBuf =
            write_file(&config.raw_path.join("20200102_030405"), "scan.mib", &bytes[..half]);

        // The copy finishes during the first wait
        let sleeper = FakeSleeper {
            slept: Vec::new(),
            hook: move |count| {
                if count == 1 {
                    std::fs::write(&path, &bytes).unwrap();
                }
            },
        };
        let (tx, _rx) = channel();
        let mut watcher = Watcher::new(config.clone(), sleeper, CancelToken::new());
        let report = watcher.poll_once(&tx).unwrap();

        assert_eq!(report.converted, 1);
        assert_eq!(watcher.sleeper.slept.len(), 2);
        let text = std::fs::read_to_string(
            config.processing_path.join("20200102_030405/scan.yml"),
        )
        .unwrap();
        assert!(text.contains("frame_count: 4"));
    }

    #[test]
    fn test_vanished_acquisition_does_not_stop_polling() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path());
        let doomed = write_file(&config.raw_path.join("a"), "scan.mib", &mib_bytes(4));
        write_file(&config.raw_path.join("b"), "scan.mib", &mib_bytes(4));

        // The first acquisition disappears while its copy is being checked
        let sleeper = FakeSleeper {
            slept: Vec::new(),
            hook: move |count| {
                if count == 1 {
                    std::fs::remove_file(&doomed).unwrap();
                }
            },
        };
        let (tx, _rx) = channel();
        let mut watcher = Watcher::new(config.clone(), sleeper, CancelToken::new());
        let report = watcher.poll_once(&tx).unwrap();

        assert_eq!(report, AcquisitionReport { converted: 1, failed: 0 });
        assert!(config.processing_path.join("b/scan.yml").exists());
        assert!(!config.processing_path.join("a").exists());
    }

    #[test]
    fn test_run_survives_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path());
        let cancel = CancelToken::new();
        let stop = cancel.clone();
        let sleeper = FakeSleeper {
            slept: Vec::new(),
            hook: move |count| {
                if count == 3 {
                    stop.cancel()
                }
            },
        };
        let (tx, _rx) = channel();
        let mut watcher = Watcher::new(config, sleeper, cancel);
        assert_eq!(watcher.run(&tx).unwrap(), AcquisitionReport::default());
        assert_eq!(watcher.sleeper.slept.len(), 3);
    }

    #[test]
    fn test_gives_up_on_unstable_copy() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path());
        let path = write_file(&config.raw_path.join("20200102_030405"), "scan.mib", &mib_bytes(1));

        // Every wait sees the file grow
        let sleeper = FakeSleeper {
            slept: Vec::new(),
            hook: move |count| {
                std::fs::write(&path, mib_bytes(1 + count)).unwrap();
            },
        };
        let (tx, _rx) = channel();
        let mut watcher = Watcher::new(config.clone(), sleeper, CancelToken::new());
        let report = watcher.poll_once(&tx).unwrap();

        assert_eq!(report, AcquisitionReport::default());
        assert_eq!(watcher.sleeper.slept.len(), 3);
        // Still pending for the next poll
        assert!(!config.processing_path.join("20200102_030405").exists());
    }
}
