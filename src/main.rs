use flipbook::cli::{Args, CalibrateArgs, Command, ExportArgs, InputArgs, PlayArgs, ShapeArgs};
use flipbook::config::{self, AppConfig, PathConfig};
use flipbook::core::player::PlayDirection;
use flipbook::entities::frame::ImageSource;
use flipbook::entities::geometry::NormRect;
use flipbook::entities::overlay::Overlay;
use flipbook::entities::sequence::FrameSequence;
use flipbook::entities::text::TextStyle;
use flipbook::entities::trim::TrimWindow;
use flipbook::export::calibrate::Calibration;
use flipbook::export::compositor::ExportRequest;
use flipbook::export::encoder::OutputTarget;
use flipbook::session::EditSession;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff"];

/// Caption band along the bottom of the canvas
const CAPTION_RECT: NormRect = NormRect {
    x: 0.05,
    y: 0.78,
    width: 0.9,
    height: 0.18,
};

fn main() -> Result<()> {
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());

    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args, &path_config)?;

    info!("Flipbook starting...");
    debug!("Command-line args: {:?}", args);

    let config_path = config::config_file(config::CONFIG_FILE, &path_config);
    info!("Config path: {}", config_path.display());
    let app_config = AppConfig::load(&config_path)?;

    match args.command {
        Command::Export(export) => run_export(export, app_config),
        Command::Play(play) => run_play(play, app_config),
        Command::Calibrate(calibrate) => run_calibrate(calibrate, app_config),
    }
}

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::data_file(config::LOG_FILE, path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .filter_module("cosmic_text", log::LevelFilter::Warn)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .filter_module("cosmic_text", log::LevelFilter::Warn)
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Expand directories into their image files (sorted), keep files as given.
fn collect_frames(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found = Vec::new();
            for ext in FRAME_EXTENSIONS {
                let pattern = input.join(format!("*.{}", ext));
                let pattern = pattern.to_string_lossy();
                for entry in glob::glob(&pattern).with_context(|| format!("Bad glob pattern: {}", pattern))? {
                    match entry {
                        Ok(path) => found.push(path),
                        Err(e) => warn!("Skipping unreadable entry: {}", e),
                    }
                }
            }
            found.sort();
            debug!("{} frame(s) in {}", found.len(), input.display());
            paths.extend(found);
        } else if input.is_file() {
            paths.push(input.clone());
        } else {
            bail!("Input not found: {}", input.display());
        }
    }
    if paths.is_empty() {
        bail!("No frames found in {:?}", inputs);
    }
    Ok(paths)
}

fn load_sequence(input: &InputArgs) -> Result<FrameSequence> {
    if !input.source_fps.is_finite() || input.source_fps <= 0.0 {
        bail!("--source-fps must be positive, got {}", input.source_fps);
    }
    let paths = collect_frames(&input.inputs)?;
    let duration = Duration::from_secs_f64(paths.len() as f64 / input.source_fps);
    info!("Loaded {} frame(s), {:?} at {} fps", paths.len(), duration, input.source_fps);
    let sources = paths.into_iter().map(ImageSource::Disk).collect();
    Ok(FrameSequence::from_images(sources, duration))
}

fn trim_window(shape: &ShapeArgs, seq: &FrameSequence) -> Result<TrimWindow> {
    match shape.trim.as_deref() {
        Some([start, end]) => {
            if !start.is_finite() || !end.is_finite() || *start < 0.0 || *end < 0.0 {
                bail!("--trim needs non-negative seconds, got {} {}", start, end);
            }
            Ok(TrimWindow::new(Duration::from_secs_f64(*start), Duration::from_secs_f64(*end))?)
        }
        _ => Ok(TrimWindow::full(seq)),
    }
}

fn base_request(shape: &ShapeArgs, seq: &FrameSequence) -> Result<ExportRequest> {
    let mut request = ExportRequest::new(trim_window(shape, seq)?);
    request.speed = shape.speed;
    request.crop = shape.crop_rect();
    if shape.reverse {
        request.direction = PlayDirection::Backward;
    }
    Ok(request)
}

fn apply_shape(shape: &ShapeArgs, config: &mut AppConfig) {
    if let Some(fps) = shape.fps {
        config.export.output_fps = fps;
    }
}

fn run_export(args: ExportArgs, mut app_config: AppConfig) -> Result<()> {
    apply_shape(&args.shape, &mut app_config);
    let seq = load_sequence(&args.input)?;
    let mut request = base_request(&args.shape, &seq)?;
    request.filter = args.filter;

    let window = request.trim;
    for sticker in &args.stickers {
        request
            .overlays
            .push(Overlay::sticker(ImageSource::Disk(sticker.path.clone()), sticker.rect, window));
    }
    for text in &args.texts {
        request.overlays.push(Overlay::text(TextStyle::new(text), CAPTION_RECT, window));
    }

    let mut session = EditSession::new(seq, app_config).context("Failed to start worker pool")?;
    let target = OutputTarget::File(args.output.clone());
    let outcome = session
        .prepare_export(request, args.shape.destination, args.preset, target)
        .require_budget(args.strict)
        .run()
        .with_context(|| format!("Export to {} failed", args.output.display()))?;
    session.on_session_end();

    print_calibration(&outcome.calibration);
    let report = &outcome.report;
    println!(
        "Wrote {} ({} frames, {} bytes, {} at {:?}/frame)",
        report.output.path().unwrap_or(Path::new("-")).display(),
        report.frames_written,
        report.output.byte_len(),
        report.config.pixel_size,
        report.delay
    );
    if report.frames_dropped > 0 {
        warn!("{} frame(s) dropped (unreadable source)", report.frames_dropped);
    }
    Ok(())
}

fn run_calibrate(args: CalibrateArgs, mut app_config: AppConfig) -> Result<()> {
    apply_shape(&args.shape, &mut app_config);
    let seq = load_sequence(&args.input)?;
    let request = base_request(&args.shape, &seq)?;
    let session = EditSession::new(seq, app_config).context("Failed to start worker pool")?;
    let calibration = session
        .prepare_export(request, args.shape.destination, Default::default(), OutputTarget::Memory)
        .calibrate()?;
    print_calibration(&calibration);
    Ok(())
}

fn print_calibration(calibration: &Calibration) {
    for (i, round) in calibration.rounds.iter().enumerate() {
        println!(
            "round {}: {} -> {} B/frame, estimate {} B{}",
            i,
            round.config.pixel_size,
            round.per_frame_bytes,
            round.estimate,
            if round.accepted { " (fits)" } else { "" }
        );
    }
    println!(
        "budget {} B: {:?}, using {}",
        calibration.budget, calibration.verdict, calibration.config.pixel_size
    );
}

fn run_play(args: PlayArgs, app_config: AppConfig) -> Result<()> {
    let seq = load_sequence(&args.input)?;
    let mut session = EditSession::new(seq, app_config).context("Failed to start worker pool")?;

    let start = Instant::now();
    {
        let (player, seq) = session.player_mut();
        if args.reverse {
            player.set_direction(PlayDirection::Backward);
        }
        player.set_loop_enabled(!args.no_loop);
        player.set_rate(seq, args.rate, start)?;
        player.play(seq, start);
    }

    let deadline = start + Duration::from_secs_f64(args.seconds.max(0.0));
    let mut shown = 0usize;
    session.request_current_frame(Box::new(|_| {}))?;

    loop {
        let now = Instant::now();
        if now >= deadline || session.player().is_paused() {
            break;
        }
        if let Some(wait) = session.player().ticker().time_until_next(now) {
            std::thread::sleep(wait.min(deadline - now));
        }
        if let Some(index) = session.tick(Instant::now()) {
            shown += 1;
            session.request_current_frame(Box::new(move |result| match result {
                Ok(image) => debug!("frame {} ready ({}x{})", index, image.width(), image.height()),
                Err(e) => warn!("frame {} failed: {}", index, e),
            }))?;
            info!("frame {}", index);
        }
        session.retriever_mut().pump();
    }

    let stats = session.retriever().playback_cache().stats();
    println!(
        "Played {} frame change(s), ended at frame {}; playback cache hit rate {:.0}%",
        shown,
        session.player().current_index(),
        stats.hit_rate() * 100.0
    );
    session.on_session_end();
    Ok(())
}
