use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::{self, File};
use std::path::PathBuf;
use std::process;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use megacam_lib::constants::{SENSOR_3MP_1, SENSOR_5MP_1};
use megacam_lib::naming::FileNamer;
use megacam_lib::pipeline::{relay_frame, save_jpeg};
use megacam_lib::sim::{
    CameraModel, DownstreamModel, SimBus, SimChipSelect, SimDelay, attach, fifo_image, synthetic_jpeg,
};
use megacam_lib::{Camera, Config, RelayLink};

type SimCamera = Camera<SimBus<CameraModel>, SimChipSelect<CameraModel>, SimDelay>;

/// Bench tool for the SPI camera driver, running against a simulated module
/// and downstream receiver.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    /// Sensor variant the simulated module reports.
    #[arg(long, value_enum, default_value_t = SensorKind::ThreeMp)]
    sensor: SensorKind,
    /// Size of the simulated JPEG in bytes.
    #[arg(long, default_value_t = 6000)]
    frame_size: usize,
    /// Resolution to select before capturing, e.g. 1920x1080.
    #[arg(short, long)]
    resolution: Option<String>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SensorKind {
    #[value(name = "3mp")]
    ThreeMp,
    #[value(name = "5mp")]
    FiveMp,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture frames into JPEG files.
    Snap {
        /// Base file name; repeated names get a numeric suffix.
        #[arg(short, long, default_value = "image")]
        name: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Directory receiving the images and the name map.
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Capture frames and relay them to the downstream receiver.
    Relay {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Handshake attempts the receiver refuses before acknowledging.
        #[arg(long, default_value_t = 0)]
        refusals: u32,
    },
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv; RUST_LOG still wins.
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli) {
        error!("Application failed: {:?}", e);
        process::exit(1);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    if cli.frame_size < 4 {
        bail!("--frame-size must be at least 4 bytes");
    }

    let sensor_id = match cli.sensor {
        SensorKind::ThreeMp => SENSOR_3MP_1,
        SensorKind::FiveMp => SENSOR_5MP_1,
    };
    let jpeg = synthetic_jpeg(cli.frame_size);
    let (_module, spi, cs) = attach(CameraModel::new(sensor_id).with_frame(fifo_image(&jpeg, 16, 64)));

    info!("--- Starting camera ---");
    let mut camera = SimCamera::new(spi, cs, SimDelay::new(), config.camera.clone()).context("Camera startup failed")?;
    if let Some(resolution) = &cli.resolution {
        camera.set_resolution(resolution)?;
    }

    match cli.command {
        Command::Snap { name, count, out_dir } => snap(&mut camera, &name, count, out_dir),
        Command::Relay { count, refusals } => relay(&mut camera, &config, count, refusals, &jpeg),
    }
}

fn snap(camera: &mut SimCamera, name: &str, count: u32, out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;
    let mut namer = FileNamer::open(out_dir.join("filemanager.json"))?;
    debug!("Name map: {:?}", namer.path());

    for index in 0..count {
        let base = if index == 0 { Some(name) } else { None };
        let path = out_dir.join(namer.next_jpeg_name(base)?);
        match save_jpeg(camera, &path)? {
            Some(bytes) => println!("{} ({} bytes)", path.display(), bytes),
            None => warn!("Camera still warming up, frame {} skipped", index + 1),
        }
    }
    Ok(())
}

fn relay(camera: &mut SimCamera, config: &Config, count: u32, refusals: u32, jpeg: &[u8]) -> Result<()> {
    let (receiver, spi, cs) = attach(DownstreamModel::new(Some(refusals)));
    let mut link = RelayLink::new(spi, cs, SimDelay::new(), config.relay.clone())?;

    for index in 0..count {
        receiver.borrow_mut().bursts.clear();
        let Some(report) = relay_frame(camera, &mut link)? else {
            warn!("Camera still warming up, frame {} skipped", index + 1);
            continue;
        };

        let frame = receiver.borrow().received_frame()?;
        let span = megacam_lib::marker::extract_frame(&frame)?;
        if span != jpeg {
            bail!("Receiver got a different image than the module captured");
        }
        println!(
            "frame {}: {} bytes in {} bursts, {} handshake attempt(s), {:?} total, head {}",
            index + 1,
            report.total_length,
            report.bursts,
            report.handshake_attempts,
            report.total_time(),
            hex::encode(&span[..span.len().min(8)])
        );
    }
    Ok(())
}
