use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use libmib_converter::acquisition::find_pending;
use libmib_converter::config::Config;
use libmib_converter::process::{create_subsets, process_subset, AcquisitionReport};
use libmib_converter::watcher::{CancelToken, ThreadSleeper, Watcher};
use libmib_converter::worker_status::{BarColor, WorkerStatus};

fn make_template_config(path: &Path) {
    match Config::default().write_config_file(path) {
        Ok(()) => log::info!("Done."),
        Err(e) => log::error!("Could not write template config: {e}"),
    }
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let color = match color {
        BarColor::CYAN => "cyan",
        BarColor::MAGENTA => "magenta",
        BarColor::RED => "red",
        BarColor::GREEN => "green",
    };
    let template = format!("{{prefix}} {{msg:24}} [{{bar:40.{color}/blue}}] {{pos:>3}}%");
    ProgressStyle::with_template(&template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Feed worker statuses into one progress bar per worker until every worker finished
fn monitor<T>(
    pb_manager: &MultiProgress,
    rx: Receiver<WorkerStatus>,
    handles: Vec<JoinHandle<T>>,
    n_workers: usize,
) -> Vec<std::thread::Result<T>> {
    let bars: Vec<ProgressBar> = (0..n_workers)
        .map(|id| {
            let pb = pb_manager.add(ProgressBar::new(100));
            pb.set_style(bar_style(&BarColor::default()));
            pb.set_prefix(format!("Worker {id}"));
            pb
        })
        .collect();

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(status) => {
                if let Some(pb) = bars.get(status.worker_id) {
                    pb.set_style(bar_style(&status.color));
                    pb.set_message(status.acquisition.clone());
                    pb.set_position((status.progress * 100.0) as u64);
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            // Every sender is gone, so every worker is done
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for pb in bars.iter() {
        pb.finish();
    }
    handles.into_iter().map(|h| h.join()).collect()
}

fn convert_all(config: Config, pb_manager: &MultiProgress) {
    let pending = match find_pending(&config) {
        Ok(p) => p,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if pending.is_empty() {
        log::info!("Nothing to convert.");
        return;
    }

    let subsets = create_subsets(&config, pending);
    let n_workers = subsets.len();
    let (tx, rx) = channel::<WorkerStatus>();
    let mut handles = Vec::new();
    for (worker_id, subset) in subsets.into_iter().enumerate() {
        let config = config.clone();
        let tx = tx.clone();
        handles.push(std::thread::spawn(move || {
            process_subset(config, tx, worker_id, subset)
        }));
    }
    drop(tx);

    let mut total = AcquisitionReport::default();
    for result in monitor(pb_manager, rx, handles, n_workers) {
        match result {
            Ok(Ok(report)) => {
                total.converted += report.converted;
                total.failed += report.failed;
            }
            Ok(Err(e)) => log::error!("Conversion failed with error: {e}"),
            Err(_) => log::error!("Failed to join conversion task!"),
        }
    }
    log::info!(
        "Converted {} files, {} failed.",
        total.converted,
        total.failed
    );
}

fn watch(config: Config, pb_manager: &MultiProgress) {
    let (tx, rx) = channel::<WorkerStatus>();
    // Runs until the process is killed
    let cancel = CancelToken::new();
    let handle = std::thread::spawn(move || {
        let mut watcher = Watcher::new(config, ThreadSleeper, cancel);
        watcher.run(&tx)
    });

    for result in monitor(pb_manager, rx, vec![handle], 1) {
        match result {
            Ok(Ok(report)) => log::info!(
                "Watcher converted {} files, {} failed.",
                report.converted,
                report.failed
            ),
            Ok(Err(e)) => log::error!("Watching failed with error: {e}"),
            Err(_) => log::error!("Failed to join watcher task!"),
        }
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("mib_converter_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("watch").about("Keep polling for new acquisitions and convert them"),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => {
            log::error!("A configuration path is required");
            return;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if !config.is_n_threads_valid() {
        log::error!("n_threads must be at least 1, found {}", config.n_threads);
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Raw Path: {}", config.raw_path.to_string_lossy());
    log::info!("Processing Path: {}", config.processing_path.to_string_lossy());
    if let Some(folder) = &config.folder {
        log::info!("Folder: {}", folder.to_string_lossy());
    }
    log::info!("STEM: {} Reshape: {:?}", config.stem, config.reshape);
    log::info!("Scan size: {:?} x {:?}", config.scan_x, config.scan_y);
    log::info!("Threads: {}", config.n_threads);

    match matches.subcommand() {
        Some(("watch", _)) => watch(config, &pb_manager),
        _ => convert_all(config, &pb_manager),
    }

    log::info!("Done.");
}
