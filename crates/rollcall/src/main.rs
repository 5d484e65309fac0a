use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::{FaceEngine, Gallery, GalleryLoad, OnnxFaceEngine};
use rollcall_hw::{Camera, PreviewWindow};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod ledger;
mod notifier;
mod session;

use config::{Config, Metric};
use ledger::Ledger;
use notifier::{Notifier, SilentNotifier, SpeechNotifier};
use session::{AttendanceContext, SystemClock};

#[derive(Parser)]
#[command(name = "rollcall", about = "Webcam attendance recorder")]
struct Cli {
    /// TOML config file (default: $ROLLCALL_CONFIG if set)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// V4L2 device path
    #[arg(long, global = true)]
    camera: Option<String>,

    /// Directory of reference images, one person per file
    #[arg(long, global = true)]
    gallery: Option<PathBuf>,

    /// Attendance CSV file
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    models: Option<PathBuf>,

    /// Embedding distance: euclidean or cosine
    #[arg(long, global = true)]
    metric: Option<Metric>,

    /// Tolerance (euclidean) or minimum similarity (cosine)
    #[arg(long, global = true)]
    threshold: Option<f32>,

    /// Disable spoken confirmations
    #[arg(long, global = true)]
    no_speech: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and record attendance (default)
    Run,
    /// Load the reference gallery and list recognized identities
    Gallery,
    /// Print recorded attendance
    Report {
        /// Only records for this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.camera {
            config.camera_device = v.clone();
        }
        if let Some(v) = &self.gallery {
            config.gallery_dir = v.clone();
        }
        if let Some(v) = &self.ledger {
            config.ledger_path = v.clone();
        }
        if let Some(v) = &self.models {
            config.model_dir = v.clone();
        }
        if let Some(v) = self.metric {
            config.metric = v;
        }
        if let Some(v) = self.threshold {
            config.match_threshold = Some(v);
        }
        if self.no_speech {
            config.speech_enabled = false;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            if config.speech_enabled {
                let notifier = SpeechNotifier::new(&config.speech_program, config.speech_rate);
                run(&config, notifier)
            } else {
                run(&config, SilentNotifier)
            }
        }
        Commands::Gallery => {
            let mut engine = load_engine(&config)?;
            let load = load_gallery(&config, &mut engine)?;
            for identity in load.gallery.iter() {
                println!("{:<24} {}", identity.name, identity.source.display());
            }
            for warning in &load.warnings {
                println!("skipped: {warning}");
            }
            println!("{} identities", load.gallery.len());
            Ok(())
        }
        Commands::Report { date, json } => report(&config, date, json),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
    }
}

fn load_engine(config: &Config) -> Result<OnnxFaceEngine> {
    let detector = config.detector_model_path();
    let recognizer = config.recognizer_model_path();
    OnnxFaceEngine::load(&detector, &recognizer).with_context(|| {
        format!(
            "failed to load face models from {}",
            config.model_dir.display()
        )
    })
}

fn load_gallery(config: &Config, engine: &mut dyn FaceEngine) -> Result<GalleryLoad> {
    Gallery::load_dir(&config.gallery_dir, engine)
        .with_context(|| format!("failed to load gallery {}", config.gallery_dir.display()))
}

fn run<N: Notifier>(config: &Config, notifier: N) -> Result<()> {
    let mut engine = load_engine(config)?;
    let load = load_gallery(config, &mut engine)?;
    if load.gallery.is_empty() {
        tracing::warn!("gallery is empty; nobody can be recognized");
    }

    let ledger = Ledger::open(&config.ledger_path)
        .with_context(|| format!("failed to open ledger {}", config.ledger_path.display()))?;

    let mut ctx = AttendanceContext {
        gallery: load.gallery,
        matcher: config.matcher(),
        ledger,
        notifier,
    };

    let camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    let mut stream = camera.stream().context("failed to start capture stream")?;
    let mut window = PreviewWindow::open(&config.window_title, camera.width, camera.height)
        .context("failed to open preview window")?;

    let summary = session::run(
        &mut ctx,
        &mut engine,
        &mut stream,
        &mut window,
        &SystemClock,
        config.downscale,
    )
    .context("capture loop failed")?;

    drop(window);
    drop(stream);
    tracing::info!(device = %camera.device_path, ledger = %ctx.ledger.path().display(), "camera released");
    println!(
        "{} frames, {} new attendance records",
        summary.frames, summary.recorded
    );
    Ok(())
}

fn report(config: &Config, date: Option<NaiveDate>, json: bool) -> Result<()> {
    let ledger = Ledger::read(&config.ledger_path)
        .with_context(|| format!("failed to read ledger {}", config.ledger_path.display()))?;

    let records: Vec<_> = match date {
        Some(day) => ledger.records_on(day).collect(),
        None => ledger.records().iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No attendance recorded");
    }
    for r in records {
        println!(
            "{:<24} {} {}",
            r.name,
            r.date.format("%Y-%m-%d"),
            r.time.format("%H:%M:%S")
        );
    }
    Ok(())
}
