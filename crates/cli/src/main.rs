mod console_surface;
mod settings;

use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use clap::Parser;

use lookaway_core::attention::domain::signal_filter::{
    ConfirmationWindow, Passthrough, SignalFilter,
};
use lookaway_core::capture::domain::frame_source::FrameSource;
use lookaway_core::capture::infrastructure::image_sequence_source::ImageSequenceSource;
use lookaway_core::detection::domain::detector::Detector;
#[cfg(not(feature = "opencv"))]
use lookaway_core::detection::infrastructure::cascade_detector::CascadeDetector;
#[cfg(feature = "opencv")]
use lookaway_core::detection::infrastructure::opencv_cascade_detector::OpenCvCascadeDetector;
use lookaway_core::pipeline::capture_loop::{CaptureConfig, CaptureLoop};
use lookaway_core::pipeline::dispatcher;
use lookaway_core::pipeline::pipeline_logger::LogPipelineLogger;
use lookaway_core::presentation::domain::media_clip::{MediaClip, MediaLibrary};
use lookaway_core::presentation::domain::playback_controller::PlaybackController;
use lookaway_core::presentation::presenter::{PumpOutcome, Presenter};
use lookaway_core::shared::cancellation::CancellationToken;
use lookaway_core::shared::constants::{
    DEFAULT_MAX_CONSECUTIVE_FAILURES, EYE_CASCADE_NAME, FACE_CASCADE_NAME,
};
use lookaway_core::shared::model_resolver;

use crate::console_surface::{ConsoleSurface, SnapshotDisplay};
use crate::settings::Settings;

/// How long the presentation loop waits for capture before re-checking the deadline.
const PUMP_TIMEOUT: Duration = Duration::from_millis(100);

/// Plays a clip whenever nobody is looking at the screen.
#[derive(Parser, Debug)]
#[command(name = "lookaway")]
struct Cli {
    /// Camera device index.
    #[arg(long, allow_negative_numbers = true)]
    device: Option<i32>,

    /// Replay the images in this directory instead of opening a camera.
    #[arg(long, value_name = "DIR")]
    replay: Option<PathBuf>,

    /// Start the replay over when it reaches the last image.
    #[arg(long, requires = "replay")]
    loop_replay: bool,

    /// Face cascade XML (default: searched for haarcascade_frontalface_default.xml).
    #[arg(long)]
    face_cascade: Option<PathBuf>,

    /// Eye cascade XML (default: searched for haarcascade_eye.xml).
    #[arg(long)]
    eye_cascade: Option<PathBuf>,

    /// Pause between captured frames, in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Consecutive frames a change must persist before it is acted on.
    #[arg(long)]
    confirm_frames: Option<u32>,

    /// Attention updates held for the presentation side before folding.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Media clip as name=path (repeatable; replaces the clips from settings).
    #[arg(long = "media", value_name = "NAME=PATH")]
    media: Vec<String>,

    /// Name of the clip to play (default: the first one).
    #[arg(long)]
    select: Option<String>,

    /// Settings file (default: <config dir>/Lookaway/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write the latest camera frame to this PNG.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Write a snapshot every N frames.
    #[arg(long, default_value = "30")]
    snapshot_every: usize,

    /// Stop after this many seconds.
    #[arg(long, allow_negative_numbers = true)]
    duration: Option<f64>,
}

/// Command line merged over settings, validated.
#[derive(Debug)]
struct RunOptions {
    device_index: i32,
    replay: Option<PathBuf>,
    loop_replay: bool,
    face_cascade: Option<PathBuf>,
    eye_cascade: Option<PathBuf>,
    frame_interval: Duration,
    confirm_frames: u32,
    queue_capacity: usize,
    media: Vec<MediaClip>,
    select: Option<String>,
    snapshot: Option<PathBuf>,
    snapshot_every: usize,
    duration: Option<Duration>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.settings.as_deref())?;
    let options = resolve_options(cli, settings)?;

    let library = MediaLibrary::new(options.media.clone())?;
    let clip = match &options.select {
        Some(name) => Some(library.find(name)?.clone()),
        None => library.default_clip().cloned(),
    };

    let detector = build_detector(
        options.face_cascade.as_deref(),
        options.eye_cascade.as_deref(),
    )?;
    let source = open_source(&options)?;

    let filter: Box<dyn SignalFilter> = if options.confirm_frames > 1 {
        Box::new(ConfirmationWindow::new(options.confirm_frames)?)
    } else {
        Box::new(Passthrough)
    };
    let config = CaptureConfig {
        frame_interval: options.frame_interval,
        max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
    };

    let (dispatcher, receiver) = dispatcher::channel(options.queue_capacity);
    let handle = CaptureLoop::new(source, detector, dispatcher, CancellationToken::new(), config)
        .with_filter(filter)
        .with_logger(Box::new(LogPipelineLogger::default()))
        .spawn()?;

    let mut presenter = Presenter::new(
        PlaybackController::new(ConsoleSurface::new()),
        SnapshotDisplay::new(options.snapshot.clone(), options.snapshot_every),
    );
    match clip {
        Some(clip) => {
            if let Err(e) = presenter.controller_mut().select(clip) {
                log::warn!("Media unavailable, continuing without it: {e}");
            }
        }
        None => log::warn!("No media configured; nothing will play"),
    }

    let deadline = options.duration.map(|d| Instant::now() + d);
    let mut stop_requested = false;
    loop {
        if let Some(deadline) = deadline {
            if !stop_requested && Instant::now() >= deadline {
                log::info!("Run time elapsed; stopping capture");
                handle.stop();
                stop_requested = true;
            }
        }
        if presenter.pump(&receiver, PUMP_TIMEOUT) == PumpOutcome::Closed {
            break;
        }
    }

    presenter.controller_mut().shutdown();
    let report = handle.join()?;
    log::info!(
        "Done: {} frames ({} empty, {} detection failures), {} updates applied, exit {:?}",
        report.frames_read,
        report.empty_frames,
        report.detection_failures,
        presenter.updates_applied(),
        report.exit
    );
    if let Some(path) = &options.snapshot {
        log::info!(
            "Wrote {} snapshots to {}",
            presenter.display().written(),
            path.display()
        );
    }
    Ok(())
}

fn resolve_options(cli: Cli, settings: Settings) -> Result<RunOptions, Box<dyn std::error::Error>> {
    let media = if cli.media.is_empty() {
        settings.media.iter().map(MediaClip::from).collect()
    } else {
        cli.media
            .iter()
            .map(|entry| MediaClip::parse(entry))
            .collect::<Result<Vec<_>, _>>()?
    };

    let options = RunOptions {
        device_index: cli.device.unwrap_or(settings.device_index),
        replay: cli.replay,
        loop_replay: cli.loop_replay,
        face_cascade: cli.face_cascade.or(settings.face_cascade),
        eye_cascade: cli.eye_cascade.or(settings.eye_cascade),
        frame_interval: Duration::from_millis(
            cli.interval_ms.unwrap_or(settings.frame_interval_ms),
        ),
        confirm_frames: cli.confirm_frames.unwrap_or(settings.confirm_frames),
        queue_capacity: cli.queue_capacity.unwrap_or(settings.queue_capacity),
        media,
        select: cli.select.or(settings.selected_media),
        snapshot: cli.snapshot,
        snapshot_every: cli.snapshot_every,
        duration: match cli.duration {
            Some(secs) if !(secs.is_finite() && secs > 0.0) => {
                let msg = format!("Duration must be a positive number of seconds, got {secs}");
                return Err(msg.into());
            }
            Some(secs) => Some(Duration::from_secs_f64(secs)),
            None => None,
        },
    };
    validate(&options)?;
    Ok(options)
}

fn validate(options: &RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    if options.device_index < 0 {
        return Err(format!("Device index must be >= 0, got {}", options.device_index).into());
    }
    if options.confirm_frames == 0 {
        return Err("Confirm frames must be at least 1".into());
    }
    if options.queue_capacity == 0 {
        return Err("Queue capacity must be at least 1".into());
    }
    if options.snapshot_every == 0 {
        return Err("Snapshot interval must be at least 1 frame".into());
    }
    if let Some(dir) = &options.replay {
        if !dir.is_dir() {
            return Err(format!("Replay directory not found: {}", dir.display()).into());
        }
    }
    if !cfg!(feature = "opencv") && options.replay.is_none() {
        return Err(
            "This build has no camera support (enable the `opencv` feature); use --replay <DIR>"
                .into(),
        );
    }
    Ok(())
}

fn build_detector(
    face: Option<&Path>,
    eye: Option<&Path>,
) -> Result<Box<dyn Detector>, Box<dyn std::error::Error>> {
    let bundled = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("haarcascades")));
    let face_path = model_resolver::resolve(FACE_CASCADE_NAME, face, bundled.as_deref())?;
    let eye_path = model_resolver::resolve(EYE_CASCADE_NAME, eye, bundled.as_deref())?;
    log::info!("Using cascades {} and {}", face_path.display(), eye_path.display());

    #[cfg(feature = "opencv")]
    let detector: Box<dyn Detector> = Box::new(OpenCvCascadeDetector::load(&face_path, &eye_path)?);
    #[cfg(not(feature = "opencv"))]
    let detector: Box<dyn Detector> = Box::new(CascadeDetector::load(&face_path, &eye_path)?);
    Ok(detector)
}

fn open_source(options: &RunOptions) -> Result<FrameSource, Box<dyn std::error::Error>> {
    if let Some(dir) = &options.replay {
        let looping = options.loop_replay;
        return Ok(FrameSource::open(options.device_index, |_| {
            ImageSequenceSource::open(dir, looping)
        })?);
    }
    open_camera(options.device_index)
}

#[cfg(feature = "opencv")]
fn open_camera(index: i32) -> Result<FrameSource, Box<dyn std::error::Error>> {
    Ok(lookaway_core::capture::infrastructure::opencv_camera::open_camera(index)?)
}

#[cfg(not(feature = "opencv"))]
fn open_camera(index: i32) -> Result<FrameSource, Box<dyn std::error::Error>> {
    Err(format!("Camera {index} unavailable: built without the `opencv` feature").into())
}
