//! Vehicle Telemetry CLI Application
//!
//! This is the command-line front end for the telemetry pipeline.
//! It uses the telemetry-core library and adds:
//! - Configuration loading (config.toml + flags)
//! - Frame log replay, one stream per input file
//! - Live viewers printing samples as they are ingested
//! - Store queries (history and averages)
//! - A frame simulator

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telemetry_core::{
    BatteryLayout, FrameLogError, FrameLogReader, FrameLogWriter, IngestionPipeline, JsonlStore,
    MemoryStore, SampleKind, SampleStore, Simulator,
};

mod config;
mod live;
mod report;

use config::AppConfig;
use report::StreamReport;

/// Vehicle Telemetry - decode, store and stream ECU/BMS frames
#[derive(Parser, Debug)]
#[command(name = "telemetry-cli")]
#[command(about = "Decode, store and stream vehicle telemetry frames", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay frame logs through the pipeline
    Ingest {
        /// Frame log(s) to replay; each file is an independent stream
        #[arg(short, long = "frames", value_name = "FILE", required = true)]
        frames: Vec<PathBuf>,

        /// JSON-lines store to append to (default: in memory)
        #[arg(short, long, value_name = "FILE")]
        store: Option<PathBuf>,

        /// Print live samples of these kinds as JSON lines (can be repeated)
        #[arg(long, value_enum)]
        follow: Vec<FollowArg>,

        /// Expect 16-byte legacy battery frames on id 200
        #[arg(long)]
        legacy_battery: bool,
    },

    /// Generate a frame log from simulated readings
    Simulate {
        /// Number of ticks (one ECU reading plus one battery reading each)
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Output file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        /// Emit 16-byte legacy battery frames instead of the 200/201 pair
        #[arg(long)]
        legacy_battery: bool,
    },

    /// Print stored samples or their averages as JSON
    Query {
        /// JSON-lines store to read
        #[arg(short, long, value_name = "FILE")]
        store: Option<PathBuf>,

        /// Sample kind to query
        #[arg(value_enum)]
        kind: FollowArg,

        /// Print field averages instead of samples
        #[arg(long)]
        averages: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FollowArg {
    Ecu,
    Battery,
    All,
}

impl FollowArg {
    fn kinds(self) -> Vec<SampleKind> {
        match self {
            FollowArg::Ecu => vec![SampleKind::Ecu],
            FollowArg::Battery => vec![SampleKind::Battery],
            FollowArg::All => vec![SampleKind::Ecu, SampleKind::Battery],
        }
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Telemetry CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using telemetry-core v{}", telemetry_core::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    match args.command {
        Command::Ingest {
            frames,
            store,
            follow,
            legacy_battery,
        } => {
            if store.is_some() {
                config.store.path = store;
            }
            config
                .live
                .follow
                .extend(follow.into_iter().flat_map(FollowArg::kinds));
            if legacy_battery {
                config.pipeline.battery_layout = BatteryLayout::LegacySingle;
            }
            ingest(&config, &frames)
        }
        Command::Simulate {
            count,
            output,
            seed,
            legacy_battery,
        } => {
            if legacy_battery {
                config.pipeline.battery_layout = BatteryLayout::LegacySingle;
            }
            simulate(&config, count, output.as_deref(), seed)
        }
        Command::Query {
            store,
            kind,
            averages,
        } => {
            let path = store
                .or(config.store.path)
                .context("No store given: use --store or [store] path in the config")?;
            query(&path, kind, averages)
        }
    }
}

/// Replay frame logs through one shared pipeline
fn ingest(config: &AppConfig, inputs: &[PathBuf]) -> Result<()> {
    let store: Arc<dyn SampleStore> = match &config.store.path {
        Some(path) => Arc::new(
            JsonlStore::open(path).with_context(|| format!("Failed to open store: {:?}", path))?,
        ),
        None => {
            log::info!("No store configured, keeping samples in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let pipeline = IngestionPipeline::new(config.pipeline.clone(), store)?;
    let viewers = live::spawn_viewers(&pipeline, &config.live.follow);

    // One worker per stream; frames within a stream are handled in order
    let streams: Vec<StreamReport> = inputs
        .par_iter()
        .map(|path| replay_stream(&pipeline, path))
        .collect::<Result<_>>()?;

    let stats = pipeline.stats();
    // Dropping the pipeline disconnects the viewers
    drop(pipeline);
    for viewer in viewers {
        if viewer.join().is_err() {
            log::warn!("A live viewer panicked");
        }
    }

    report::print_summary(&streams, &stats);
    Ok(())
}

fn replay_stream(pipeline: &IngestionPipeline, path: &Path) -> Result<StreamReport> {
    let reader = FrameLogReader::open(path)
        .with_context(|| format!("Failed to open frame log: {:?}", path))?;
    let mut report = StreamReport::new(path.to_path_buf());

    for frame in reader {
        match frame {
            Ok(frame) => {
                let outcome = pipeline.process(&frame);
                report.record(&outcome);
            }
            Err(e @ FrameLogError::Io(_)) => {
                // The reader ends after an I/O error
                log::error!("{:?}: read failed, stopping stream: {}", path, e);
                report.read_failed = true;
            }
            Err(e) => {
                log::warn!("{:?}: skipping unreadable frame: {}", path, e);
                report.lines_skipped += 1;
            }
        }
    }

    log::info!("Finished stream {:?}: {} samples stored", path, report.stored());
    Ok(report)
}

/// Write simulated frames as a frame log
fn simulate(config: &AppConfig, count: usize, output: Option<&Path>, seed: Option<u64>) -> Result<()> {
    let codec = telemetry_core::FrameCodec::new(config.pipeline.calibration);
    let layout = config.pipeline.battery_layout;
    let simulator = match seed {
        Some(seed) => Simulator::with_seed(codec, layout, seed),
        None => Simulator::new(codec, layout),
    };

    let out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut writer = FrameLogWriter::new(out);
    writer.write_comment(&format!(
        "simulated by telemetry-cli v{} ({:?} battery layout)",
        env!("CARGO_PKG_VERSION"),
        layout
    ))?;
    for frames in simulator.take(count) {
        for frame in &frames {
            writer.write_frame(frame)?;
        }
    }
    let written = writer.written();
    writer.finish()?;

    log::info!("Wrote {} frames", written);
    Ok(())
}

/// Print stored samples or averages
fn query(path: &Path, kind: FollowArg, averages: bool) -> Result<()> {
    let store = JsonlStore::open(path).with_context(|| format!("Failed to open store: {:?}", path))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for kind in kind.kinds() {
        if averages {
            let avg = store.query_averages(kind)?;
            writeln!(out, "{}", serde_json::json!({ "kind": kind, "averages": avg }))?;
        } else {
            for sample in store.query_all(kind)? {
                writeln!(out, "{}", serde_json::to_string(&sample)?)?;
            }
        }
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
