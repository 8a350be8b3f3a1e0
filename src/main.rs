use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use robovision::align::align_images;
use robovision::{HeadlessDisplay, StationContext};
use robovision_core::events::event_channel;
use robovision_core::{RefreshLoop, StationConfig};
use robovision_cv::{AlignmentInspector, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "robovision",
    version,
    about = "Inspection station: camera feed, trigger counting and pattern alignment"
)]
struct Cli {
    /// Station configuration file (TOML)
    #[arg(long, env = "ROBOVISION_CONFIG", default_value = "robovision.toml")]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `robovision_core=trace`; overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the station until Ctrl-C
    Run {
        /// Do not connect the camera at startup
        #[arg(long)]
        no_camera: bool,

        /// Do not start the trigger listener
        #[arg(long)]
        no_trigger: bool,
    },
    /// Locate both patterns in still images and write annotated results
    Align {
        #[arg(long)]
        pattern_a: Option<PathBuf>,

        #[arg(long)]
        pattern_b: Option<PathBuf>,

        /// Output directory; defaults to `display.output_dir`
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Write the default configuration
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Command::Run { no_camera, no_trigger } => run(&cli.config, no_camera, no_trigger),
        Command::Align {
            pattern_a,
            pattern_b,
            output,
            images,
        } => align(&cli.config, pattern_a, pattern_b, output, &images),
        Command::InitConfig { force } => init_config(&cli.config, force),
    }
}

fn run(config_path: &Path, no_camera: bool, no_trigger: bool) -> Result<()> {
    let config = StationConfig::load_or_create(config_path);

    let inspector = if config.matching.pattern_a.is_some() && config.matching.pattern_b.is_some() {
        match AlignmentInspector::from_config(&config.matching) {
            Ok(inspector) => Some(inspector),
            Err(e) => {
                warn!("capture inspection disabled: {e:#}");
                None
            }
        }
    } else {
        None
    };

    let (events, receiver) = event_channel();
    let display = HeadlessDisplay::new(&config.display, inspector);
    let view = display.view();
    let refresh_interval = Duration::from_millis(config.display.refresh_interval_ms);

    let station = StationContext::new(config, events)?;
    let refresh = RefreshLoop::start(
        Box::new(display),
        Arc::clone(station.mailbox()),
        receiver,
        refresh_interval,
    )?;

    if !no_camera {
        station.connect_camera()?;
    }
    if !no_trigger {
        // The camera keeps running without the trigger path
        if let Err(e) = station.start_trigger() {
            error!("{e:#}");
        }
    }
    station.start_process();

    let interrupted = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let interrupted = Arc::clone(&interrupted);
        move || interrupted.store(true, Ordering::SeqCst)
    })
    .context("failed to install Ctrl-C handler")?;

    info!("station running; press Ctrl-C to stop");
    while !interrupted.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    station.shutdown();
    refresh.stop();

    let view = view.lock();
    info!(
        "final result: {} ({} frames shown, {} captures inspected)",
        view.result,
        view.frames_shown,
        view.captures.len()
    );
    Ok(())
}

fn align(
    config_path: &Path,
    pattern_a: Option<PathBuf>,
    pattern_b: Option<PathBuf>,
    output: Option<PathBuf>,
    images: &[PathBuf],
) -> Result<()> {
    let mut config = if config_path.exists() {
        StationConfig::load(config_path)?
    } else {
        StationConfig::default()
    };
    if pattern_a.is_some() {
        config.matching.pattern_a = pattern_a;
    }
    if pattern_b.is_some() {
        config.matching.pattern_b = pattern_b;
    }
    let output_dir = output.unwrap_or_else(|| config.display.output_dir.clone());

    let inspector = AlignmentInspector::from_config(&config.matching)?;
    let records = align_images(&inspector, images, &output_dir)?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!("{:?} already exists; pass --force to overwrite it", config_path);
    }
    StationConfig::default().save(config_path)?;
    Ok(())
}
