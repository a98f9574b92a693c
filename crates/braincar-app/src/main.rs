//! BrainCar Application
//!
//! Unified entry point for the EEG-driven vehicle: the host side that turns
//! brain activity into commands, and the vehicle side that obeys them.
//!
//! # Usage
//!
//! ```bash
//! # Vehicle: listen for commands (simulated motors)
//! braincar serve --bind 0.0.0.0:5000
//!
//! # Host: classify the amplifier stream and drive the vehicle
//! braincar drive --model model.json --source serial --port /dev/ttyUSB0 --endpoint 192.168.1.50:5000
//!
//! # Offline: run a recording through the pipeline
//! braincar replay --model model.json data_2024-05-01_10-00-00.txt --json
//!
//! # Capture raw amplifier lines
//! braincar record --port /dev/ttyUSB0
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use braincar_core::config::{BraincarConfig, SourceKind};
use braincar_core::filter::RunFilter;
use braincar_core::protocol::{decode_token, LineFormat};
use braincar_core::types::CycleReport;
use braincar_native::bridge::source::{self, LineSource, SampleSource};
use braincar_native::bridge::{run_channel, ActuatorServer, CommandChannel, SimulatedActuator};
use braincar_native::ml::knn;
use braincar_native::pipeline::{run_producer, Pipeline, ProducerExit, RunFlag};

/// BrainCar Application
#[derive(Parser, Debug)]
#[command(name = "braincar")]
#[command(author, version, about = "Drive a vehicle with EEG mental-state classification", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify the EEG stream and send commands to the vehicle
    Drive {
        /// Trained k-NN model (JSON)
        #[arg(short, long)]
        model: PathBuf,

        /// Vehicle address, host:port
        #[arg(short, long)]
        endpoint: Option<String>,

        #[command(flatten)]
        source: SourceArgs,

        /// Disable the blink amplitude override
        #[arg(long)]
        no_blink: bool,
    },

    /// Run the vehicle-side receiver
    Serve {
        /// Listen address
        #[arg(short, long)]
        bind: Option<String>,

        /// Identical tokens required before acting
        #[arg(long)]
        debounce: Option<usize>,

        /// Stop after this many milliseconds without a command (0 disables)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Exit after the first sender disconnects
        #[arg(long)]
        once: bool,
    },

    /// List available serial ports
    Ports,

    /// Append raw amplifier lines to a timestamped file
    Record {
        #[command(flatten)]
        source: SourceArgs,

        /// Directory for the recording
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Stop after this many lines
        #[arg(long)]
        lines: Option<u64>,
    },

    /// Run a recording through the pipeline without a vehicle
    Replay {
        /// Trained k-NN model (JSON)
        #[arg(short, long)]
        model: PathBuf,

        /// Recorded sample file
        file: PathBuf,

        /// Line layout of the recording
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,

        /// One JSON report per line instead of a table
        #[arg(long)]
        json: bool,

        /// Disable the blink amplitude override
        #[arg(long)]
        no_blink: bool,
    },
}

/// Sample source selection shared by `drive` and `record`.
#[derive(clap::Args, Debug)]
struct SourceArgs {
    /// Where samples come from
    #[arg(short, long, value_enum)]
    source: Option<SourceArg>,

    /// Serial port path (e.g., /dev/ttyUSB0 or COM3)
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Recording to read for `--source file`
    #[arg(long)]
    path: Option<PathBuf>,

    /// Line layout
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SourceArg {
    Serial,
    File,
    Stdin,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg {
    /// One number per line
    Value,
    /// `counter,value` per line
    CounterValue,
}

impl From<FormatArg> for LineFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Value => LineFormat::Value,
            FormatArg::CounterValue => LineFormat::COUNTER_VALUE,
        }
    }
}

impl SourceArgs {
    fn apply(&self, config: &mut BraincarConfig) {
        let source = &mut config.source;
        if let Some(kind) = self.source {
            source.kind = match kind {
                SourceArg::Serial => SourceKind::Serial,
                SourceArg::File => SourceKind::File,
                SourceArg::Stdin => SourceKind::Stdin,
            };
        }
        if let Some(port) = &self.port {
            source.port.clone_from(port);
        }
        if let Some(baud) = self.baud {
            source.baud_rate = baud;
        }
        if let Some(path) = &self.path {
            source.path = Some(path.clone());
            if self.source.is_none() {
                source.kind = SourceKind::File;
            }
        }
        if let Some(format) = self.format {
            source.line_format = format.into();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("BrainCar v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => BraincarConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => BraincarConfig::default(),
    };

    match cli.command {
        Commands::Drive { model, endpoint, source, no_blink } => {
            source.apply(&mut config);
            if let Some(endpoint) = endpoint {
                config.channel.endpoint = endpoint;
            }
            if no_blink {
                config.pipeline.amplitude_threshold = None;
            }
            config.validate()?;
            block_on_bounded(run_drive(config, &model))?;
        }
        Commands::Serve { bind, debounce, timeout_ms, once } => {
            if let Some(bind) = bind {
                config.receiver.bind = bind;
            }
            if let Some(depth) = debounce {
                config.receiver.debounce_depth = depth;
            }
            if let Some(ms) = timeout_ms {
                config.receiver.command_timeout_ms = (ms > 0).then_some(ms);
            }
            config.receiver.accept_once |= once;
            config.validate()?;
            block_on_bounded(run_serve(config))?;
        }
        Commands::Ports => list_ports()?,
        Commands::Record { source, out_dir, lines } => {
            source.apply(&mut config);
            block_on_bounded(run_record(config, out_dir, lines))?;
        }
        Commands::Replay { model, file, format, json, no_blink } => {
            if let Some(format) = format {
                config.source.line_format = format.into();
            }
            if no_blink {
                config.pipeline.amplitude_threshold = None;
            }
            config.validate()?;
            run_replay(&config, &model, &file, json)?;
        }
    }

    Ok(())
}

/// How long shutdown waits for blocking reads (stdin, serial) to return.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Run `task` on a fresh runtime. A source still blocked in a read when the
/// task finishes is abandoned after [`SHUTDOWN_GRACE`] instead of holding the
/// process open.
fn block_on_bounded<F: Future<Output = anyhow::Result<()>>>(task: F) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let outcome = rt.block_on(task);
    rt.shutdown_timeout(SHUTDOWN_GRACE);
    outcome
}

/// Producer thread, channel task and a console observer until the source
/// ends or Ctrl-C.
async fn run_drive(config: BraincarConfig, model: &Path) -> anyhow::Result<()> {
    let classifier = knn::load(model).with_context(|| format!("loading model {}", model.display()))?;
    let mut pipeline = Pipeline::new(&config.pipeline, classifier)?;

    let mut channel = CommandChannel::new(&config.channel);
    let policy = config.channel.reconnect;
    if let Err(e) = channel.connect().await {
        warn!("Initial connect failed: {}", e);
        channel.reconnect(policy).await.context("vehicle unreachable")?;
    }

    let mut source = source::open_source(&config.source)?;
    let flag = RunFlag::new();
    let (report_tx, mut report_rx) = watch::channel::<Option<CycleReport>>(None);
    let (cmd_tx, cmd_rx) = mpsc::channel(config.channel.queue_depth);

    let channel_task = tokio::spawn(run_channel(channel, cmd_rx, policy));

    let producer_flag = flag.clone();
    let mut producer = tokio::task::spawn_blocking(move || {
        run_producer(&mut pipeline, &mut source, &producer_flag, &report_tx, Some(&cmd_tx))
    });

    // Console observer: announce changes of the smoothed state only.
    tokio::spawn(async move {
        let mut last = None;
        while report_rx.changed().await.is_ok() {
            let Some(report) = report_rx.borrow_and_update().clone() else {
                continue;
            };
            if last != Some(report.smoothed) {
                info!(window = report.window_index, "State {} → {}", report.smoothed, report.directive);
                last = Some(report.smoothed);
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, closing the link (vehicle stops on disconnect)");
            flag.stop();
            channel_task.abort();
        }
        exit = &mut producer => {
            match exit? {
                ProducerExit::ChannelClosed => {
                    let outcome = channel_task.await?;
                    outcome.context("command channel failed")?;
                }
                ProducerExit::SourceFailed(e) => {
                    channel_task.await??;
                    anyhow::bail!("sample source failed: {e}");
                }
                ProducerExit::Stopped | ProducerExit::SourceExhausted => {
                    channel_task.await??;
                }
            }
        }
    }

    Ok(())
}

/// Vehicle receiver with simulated motors until Ctrl-C.
async fn run_serve(config: BraincarConfig) -> anyhow::Result<()> {
    let mut server = ActuatorServer::bind(&config.receiver, SimulatedActuator::new()).await?;
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let stats = server.stats();
    info!(
        sessions = stats.sessions,
        tokens = stats.tokens,
        unknown = stats.unknown,
        actuations = stats.actuations,
        timeouts = stats.timeouts,
        "Receiver summary"
    );
    Ok(())
}

/// List serial ports
fn list_ports() -> anyhow::Result<()> {
    #[cfg(feature = "usb")]
    {
        let ports = source::serial::list_ports();
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{port}");
        }
    }

    #[cfg(not(feature = "usb"))]
    {
        anyhow::bail!(
            "Serial support not enabled. Rebuild with --features usb:\n\
             cargo run -p braincar-app --features usb -- ports"
        );
    }

    Ok(())
}

/// `data_YYYY-MM-DD_HH-MM-SS.txt`
fn recording_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("data_{}.txt", now.format("%Y-%m-%d_%H-%M-%S"))
}

async fn run_record(config: BraincarConfig, out_dir: PathBuf, limit: Option<u64>) -> anyhow::Result<()> {
    let path = out_dir.join(recording_name(chrono::Local::now()));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    info!("Recording to {}", path.display());

    let flag = RunFlag::new();
    let record_flag = flag.clone();
    let source_config = config.source;
    let mut recorder = tokio::task::spawn_blocking(move || -> anyhow::Result<u64> {
        let mut out = std::io::BufWriter::new(file);
        let format = source_config.line_format;
        let written = match source_config.kind {
            #[cfg(feature = "usb")]
            SourceKind::Serial => {
                let mut src = source::serial::open(&source_config.port, source_config.baud_rate, format)?;
                source::record(&mut src, &mut out, &record_flag, limit)?
            }
            #[cfg(not(feature = "usb"))]
            SourceKind::Serial => anyhow::bail!("serial recording needs the `usb` feature"),
            SourceKind::Stdin => source::record(&mut source::open_stdin(format), &mut out, &record_flag, limit)?,
            SourceKind::File => {
                let path = source_config.path.context("file source needs --path")?;
                source::record(&mut source::open_file(&path, format)?, &mut out, &record_flag, limit)?
            }
        };
        Ok(written)
    });

    let written = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            flag.stop();
            info!("Stopping recorder");
            // The serial read times out, so the loop notices the flag promptly.
            match tokio::time::timeout(Duration::from_secs(2), &mut recorder).await {
                Ok(joined) => joined??,
                Err(_) => {
                    warn!("Recorder still blocked on input, abandoning it");
                    0
                }
            }
        }
        written = &mut recorder => written??,
    };

    info!("Recorded {} lines to {}", written, path.display());
    Ok(())
}

/// Offline pipeline run. Also shows what a vehicle debouncing at the
/// configured depth would have executed.
fn run_replay(config: &BraincarConfig, model: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let classifier = knn::load(model).with_context(|| format!("loading model {}", model.display()))?;
    let mut pipeline = Pipeline::new(&config.pipeline, classifier)?;
    let mut source: LineSource<_> = source::open_file(file, config.source.line_format)?;
    let mut vehicle = RunFilter::new(config.receiver.debounce_depth);

    if !json {
        println!("{:>7}  {:<9} {:>5}  {:<9} {:<10} {}", "window", "raw", "conf", "smoothed", "token", "vehicle");
    }

    while let Some(sample) = source.next_sample()? {
        let Some(report) = pipeline.push_sample(sample) else {
            continue;
        };
        let token = pipeline.token(&report);
        let actuated = vehicle.observe(decode_token(token));

        if json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            println!(
                "{:>7}  {:<9} {:>5.2}  {:<9} {:<10} {}",
                report.window_index,
                report.classification.label,
                report.classification.confidence,
                report.smoothed,
                token,
                actuated.map(|d| d.to_string()).unwrap_or_default()
            );
        }
    }

    let stats = pipeline.stats();
    info!(
        samples = stats.samples,
        windows = stats.windows,
        overrides = stats.overrides,
        rejected = stats.rejected,
        skipped_lines = source.skipped(),
        "Replay finished"
    );
    Ok(())
}
