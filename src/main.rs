use hand_capture::{
    camera::{Frame, PixelFormat},
    cli::{replay, ReplayScript},
    common::{config::DEFAULT_CONFIG_PATH, Config, DevMode},
    core::{CaptureSession, Finger},
    geometry::{self, CaptureWindow, FrameGeometry, PixelRect, RectF},
    pipeline::{FrameDispatcher, FrameOutcome, ImageHeuristics, PipelineStage, ValidationPipeline},
    storage::{DiskFrameStore, FileProgressStore, FrameStore, MemoryFrameStore, MemoryProgressStore, ProgressStore},
};

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "handcapture")]
#[command(about = "Guided palm and finger capture with staged frame validation")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file (defaults to configs/hand-capture.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum WindowKind {
    Palm,
    Finger,
}

#[derive(Subcommand)]
enum Commands {
    /// Map the on-screen capture window to sensor pixels
    MapWindow {
        /// Sensor size as WIDTHxHEIGHT
        #[arg(long, default_value = "1920x1080", value_parser = parse_size)]
        sensor: (u32, u32),
        /// Display surface size as WIDTHxHEIGHT
        #[arg(long, default_value = "1080x1920", value_parser = parse_size)]
        display: (u32, u32),
        #[arg(long, default_value = "90", allow_hyphen_values = true)]
        sensor_rotation: i32,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        device_rotation: i32,
        #[arg(long, value_enum, default_value = "palm")]
        window: WindowKind,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Run still images through the validation pipeline
    Validate {
        images: Vec<PathBuf>,
        #[arg(long, value_enum, default_value = "palm")]
        window: WindowKind,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        sensor_rotation: i32,
    },
    /// Drive a capture session from a TOML script
    Replay {
        script: PathBuf,
        /// Persist progress like a real session would
        #[arg(long)]
        persist: bool,
    },
    /// Show persisted session progress
    Status,
    /// Clear persisted session progress
    Reset,
}

fn parse_size(s: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("bad width: {}", e))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("bad height: {}", e))?;
    Ok((w, h))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev);

    let config = load_config(cli.config.as_deref())?;
    let dev_mode = match &config.storage.data_dir {
        Some(dir) => DevMode::with_base_dir(cli.dev, dir.clone()),
        None => DevMode::new(cli.dev)?,
    };

    match cli.command {
        Commands::MapWindow { sensor, display, sensor_rotation, device_rotation, window, json } => {
            let geometry = FrameGeometry {
                sensor_width: sensor.0,
                sensor_height: sensor.1,
                sensor_rotation_degrees: sensor_rotation,
                device_rotation_degrees: device_rotation,
                display_width: display.0,
                display_height: display.1,
            };
            map_window(&config, &geometry, window, json)?;
        }
        Commands::Validate { images, window, sensor_rotation } => {
            if images.is_empty() {
                bail!("No images given");
            }
            dev_mode.ensure_dirs()?;
            validate(&config, &dev_mode, &images, window, sensor_rotation).await?;
        }
        Commands::Replay { script, persist } => {
            let script = ReplayScript::load(&script)
                .with_context(|| format!("Failed to load replay script {}", script.display()))?;
            let store: Box<dyn ProgressStore> = if persist {
                dev_mode.ensure_dirs()?;
                Box::new(FileProgressStore::new(dev_mode.session_dir())?)
            } else {
                Box::new(MemoryProgressStore::new())
            };
            let mut session = CaptureSession::new(config.placement.clone(), store)?;
            let frames = MemoryFrameStore::new();

            println!("▶ Start: {}", session.state());
            for line in replay::run(&mut session, &frames, &script)? {
                println!("{:>3} {:<8} → {}", line.step, line.action, line.state);
                for event in &line.events {
                    println!("      {:?}", event);
                }
            }
        }
        Commands::Status => {
            let store = FileProgressStore::new(dev_mode.session_dir())?;
            match store.load()? {
                Some(progress) => {
                    println!("Session:  {}", progress.session_id);
                    println!("Hand:     {}", progress.hand);
                    match progress.finger_index {
                        Some(i) if i >= Finger::COUNT => println!("Progress: all fingers captured"),
                        Some(i) => println!("Progress: palm done, next finger {}/{}", i + 1, Finger::COUNT),
                        None => println!("Progress: palm pending"),
                    }
                }
                None => println!("No capture session in progress"),
            }
        }
        Commands::Reset => {
            let store = FileProgressStore::new(dev_mode.session_dir())?;
            store.clear()?;
            println!("✅ Session progress cleared");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load()?,
        None => Config::default(),
    };
    Ok(config)
}

fn pick_window(config: &Config, kind: WindowKind) -> CaptureWindow {
    match kind {
        WindowKind::Palm => config.windows.palm_window(),
        WindowKind::Finger => config.windows.finger_window(),
    }
}

#[derive(Serialize)]
struct MapReport {
    effective_rotation: u32,
    overlay_rect: RectF,
    sensor_rect: Option<RectF>,
    crop: Option<PixelRect>,
    projected_back: Option<RectF>,
}

fn map_window(config: &Config, geometry: &FrameGeometry, kind: WindowKind, json: bool) -> Result<()> {
    let window = pick_window(config, kind);
    let surface = geometry.display_surface();
    let overlay = surface.size();

    let sensor_rect = geometry::map_window_to_sensor_rect(&window, overlay, surface, geometry);
    let crop = sensor_rect.and_then(|r| geometry::clamp_to_sensor(r, geometry));
    let projected_back = sensor_rect.and_then(|r| geometry::map_sensor_rect_to_screen(r, surface, geometry));

    let report = MapReport {
        effective_rotation: geometry.effective_rotation().degrees(),
        overlay_rect: window.to_overlay_rect(overlay),
        sensor_rect,
        crop,
        projected_back,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let r = report.overlay_rect;
    println!("Effective rotation: {}°", report.effective_rotation);
    println!("Overlay window:     {:.1},{:.1} {:.1}x{:.1}", r.x, r.y, r.width, r.height);
    match report.sensor_rect {
        Some(s) => println!("Sensor rect:        {:.1},{:.1} {:.1}x{:.1}", s.x, s.y, s.width, s.height),
        None => println!("Sensor rect:        (empty sensor or surface)"),
    }
    match report.crop {
        Some(c) => println!("Crop:               {},{} {}x{}", c.x, c.y, c.width, c.height),
        None => println!("Crop:               ❌ no valid crop"),
    }
    Ok(())
}

async fn validate(
    config: &Config,
    dev_mode: &DevMode,
    images: &[PathBuf],
    kind: WindowKind,
    sensor_rotation: i32,
) -> Result<()> {
    let store: Arc<dyn FrameStore> = Arc::new(DiskFrameStore::new(dev_mode.frames_dir())?);
    let pipeline = Arc::new(ValidationPipeline::new(
        &config.pipeline,
        pick_window(config, kind),
        ImageHeuristics::new(config.checks.clone()),
        store,
    ));

    let (dispatcher, mut outcomes) = FrameDispatcher::from_config(pipeline.clone(), &config.pipeline);

    for (index, path) in images.iter().enumerate() {
        let image = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let upright = if geometry::Rotation::from_degrees(sensor_rotation).swaps_axes() {
            (image.height(), image.width())
        } else {
            (image.width(), image.height())
        };
        let frame_geometry = FrameGeometry {
            sensor_width: image.width(),
            sensor_height: image.height(),
            sensor_rotation_degrees: sensor_rotation,
            device_rotation_degrees: 0,
            display_width: upright.0,
            display_height: upright.1,
        };
        let frame = Frame::new(DynamicImage::ImageRgb8(image.to_rgb8()), PixelFormat::Rgb8, frame_geometry)?;

        // Wait for each verdict before offering the next file; the queue
        // drops the oldest frame when it is full.
        dispatcher.offer(frame);
        let Some(outcome) = outcomes.recv().await else {
            bail!("Frame dispatcher stopped unexpectedly");
        };
        report_outcome(index + 1, outcome);
    }
    dispatcher.shutdown().await;

    let warnings = pipeline.warnings();
    if !warnings.is_empty() {
        println!("\nActive warnings:");
        for w in &warnings {
            println!("  [stage {}] {} ({})", w.stage, w.message, w.icon);
        }
    }

    let completed = pipeline.stage() == PipelineStage::Completed;
    let accepted = pipeline.accepted_frames().len();
    println!("\nStage: {:?} ({} of {} frames accepted)", pipeline.stage(), accepted, config.pipeline.required_count);
    if completed {
        println!("✅ Capture complete, frames in {}", dev_mode.frames_dir().display());
    }

    Ok(())
}

fn report_outcome(index: usize, outcome: hand_capture::Result<FrameOutcome>) {
    match outcome {
        Ok(FrameOutcome::Accepted { frame_ref, quality_score, completed }) => {
            println!("✅ frame {}: accepted as {} (quality {:.2}){}",
                index, frame_ref, quality_score, if completed { ", quota reached" } else { "" });
        }
        Ok(FrameOutcome::Rejected { stage, failed }) => {
            println!("❌ frame {}: rejected at {:?} ({:?})", index, stage, failed);
        }
        Ok(FrameOutcome::Dropped(reason)) => println!("⏭  frame {}: dropped ({:?})", index, reason),
        Ok(FrameOutcome::Discarded) => println!("⏭  frame {}: discarded", index),
        Err(e) => println!("❌ frame {}: {}", index, e),
    }
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
