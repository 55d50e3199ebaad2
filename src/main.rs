//! Motion Sensor Agent CLI
//!
//! Runs a collection session over the simulated accelerometer and logs
//! motion features for the event classifier.

use clap::{Parser, Subcommand};
use motion_sensor_agent::{
    collector::{SimulatedConfig, SimulatedLinker},
    config::Config,
    core::{DebouncedDetector, SharedClassifier},
    session::{ConnectionStatusListener, SessionManager, SessionWarning, ROW_SUFFIX_COLUMNS},
    stats::{create_shared_stats_with_persistence, CollectionStats},
    VERSION,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "motion-sensor")]
#[command(version = VERSION)]
#[command(about = "Windowed sensor sampling and motion feature logging", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a collection session
    Start {
        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Observed label appended to every raw row
        #[arg(long)]
        label: Option<String>,

        /// Number of simulated connect attempts that fail first
        #[arg(long, default_value = "0")]
        connect_failures: u32,
    },

    /// Show collection status and statistics
    Status,

    /// Show configuration
    Config,

    /// Reset persisted collection statistics
    ResetStats,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Start {
            duration_secs,
            label,
            connect_failures,
        } => {
            cmd_start(duration_secs, label, connect_failures);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
        Commands::ResetStats => {
            cmd_reset_stats();
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load configuration, using defaults");
        Config::default()
    })
}

/// Prints session transitions to the terminal.
struct ConsoleStatus;

impl ConnectionStatusListener for ConsoleStatus {
    fn on_starting(&self) {
        println!("Connecting to sensors...");
    }

    fn on_started(&self) {
        println!("Collecting.");
    }

    fn on_disrupted(&self) {
        println!("Connection lost, reconnecting...");
    }

    fn on_stopped(&self) {
        println!("Collection stopped.");
    }

    fn on_warning(&self, warning: &SessionWarning) {
        eprintln!("Warning: {warning}");
    }

    fn on_event_detected(&self) {
        println!("[Detector] Event confirmed");
    }
}

fn cmd_start(duration_secs: Option<u64>, label: Option<String>, connect_failures: u32) {
    println!("Motion Sensor Agent v{VERSION}");
    println!();

    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let linker = Arc::new(SimulatedLinker::new(SimulatedConfig {
        connect_failures,
        window_size: config.averaging.window_size,
        weighting: config.averaging.weighting,
        ..Default::default()
    }));

    // Rows already in the log were judged by earlier runs.
    let log_path = config.feature_log_path();
    let offset = std::fs::metadata(&log_path).map(|m| m.len()).unwrap_or(0);
    let classifier: SharedClassifier = Arc::new(Mutex::new(DebouncedDetector::with_offset(
        &log_path,
        config.classifier,
        offset,
    )));

    let session = SessionManager::new(linker, config.session_settings())
        .with_classifier(classifier)
        .with_stats(stats.clone());
    if let Some(label) = label {
        session.set_observed_label(label);
    }
    session.add_listener(Arc::new(ConsoleStatus));

    println!("Starting collection...");
    println!("  Sample rate: {} Hz", config.sample_rate_hz);
    println!(
        "  Averaging: {} samples, {:?}",
        config.averaging.window_size, config.averaging.weighting
    );
    println!("  Batch trigger: {:?}", config.storage.trigger);
    println!("  Observed label: {}", session.observed_label());
    println!("  Feature log: {}", log_path.display());
    println!();
    match duration_secs {
        Some(secs) => println!("Running for {secs}s (Ctrl+C to stop early)"),
        None => println!("Press Ctrl+C to stop"),
    }
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    session.start();
    let started = Instant::now();
    let deadline = duration_secs.map(Duration::from_secs);
    let mut header_shown = false;

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        if !header_shown && session.collector().sensor_count() > 0 {
            tracing::info!(
                columns = %session.sample_header(&ROW_SUFFIX_COLUMNS).join(","),
                "raw row layout"
            );
            header_shown = true;
        }
        thread::sleep(Duration::from_millis(200));
    }

    println!();
    println!("Shutting down...");
    session.stop();

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }
    println!();
    println!("{}", stats.summary());
}

fn cmd_status() {
    let config = load_config();

    println!("Motion Sensor Agent Status");
    println!("==========================");
    println!();

    println!("Configuration:");
    println!("  Sample rate: {} Hz", config.sample_rate_hz);
    println!(
        "  Averaging: {} samples, {:?}",
        config.averaging.window_size, config.averaging.weighting
    );
    println!("  Batch trigger: {:?}", config.storage.trigger);
    println!("  Flush on stop: {}", config.storage.flush_on_stop);
    println!("  Labeling: {:?}", config.labeling);
    println!();

    let log_path = config.feature_log_path();
    match std::fs::read_to_string(&log_path) {
        Ok(content) => {
            let rows = content.lines().count().saturating_sub(1);
            println!("Feature log: {} ({rows} rows)", log_path.display());
        }
        Err(_) => println!("Feature log: {} (not created yet)", log_path.display()),
    }
    println!();

    let stats = CollectionStats::with_persistence(config.stats_path());
    println!("{}", stats.summary());
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_reset_stats() {
    let config = load_config();
    let stats = CollectionStats::with_persistence(config.stats_path());
    stats.reset();
    match stats.save() {
        Ok(()) => println!("Statistics reset."),
        Err(e) => eprintln!("Error: Could not save statistics: {e}"),
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
