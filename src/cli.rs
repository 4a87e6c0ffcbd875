use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::entities::filters::ColorFilter;
use crate::entities::geometry::NormRect;
use crate::export::config::{Destination, SizePreset};

/// Turn image sequences into looping GIFs that fit a size budget
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging to file (default: flipbook.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Calibrate for a destination and write the GIF
    Export(ExportArgs),
    /// Play the sequence in the terminal loop, logging frame changes
    Play(PlayArgs),
    /// Show which size a destination budget allows, without exporting
    Calibrate(CalibrateArgs),
}

/// Frame inputs shared by all commands.
#[derive(clap::Args, Debug, Clone)]
pub struct InputArgs {
    /// Directory of frames or individual image files
    #[arg(value_name = "DIR|FILES", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Frame rate of the source sequence
    #[arg(long = "source-fps", value_name = "FPS", default_value_t = 10.0)]
    pub source_fps: f64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output GIF path
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: PathBuf,

    #[command(flatten)]
    pub shape: ShapeArgs,

    /// Output size preset: small, medium, large
    #[arg(long = "preset", value_name = "PRESET", value_parser = parse_preset, default_value = "large")]
    pub preset: SizePreset,

    /// Colour filter: mono, sepia, invert, vivid, fade
    #[arg(long = "filter", value_name = "NAME", value_parser = parse_filter)]
    pub filter: Option<ColorFilter>,

    /// Sticker overlay, PNG@X,Y,W,H in normalized coordinates (repeatable)
    #[arg(long = "sticker", value_name = "PNG@X,Y,W,H", value_parser = parse_sticker)]
    pub stickers: Vec<StickerArg>,

    /// Caption drawn along the bottom (repeatable)
    #[arg(long = "text", value_name = "TEXT")]
    pub texts: Vec<String>,

    /// Fail instead of falling back when the budget cannot be met
    #[arg(long = "strict")]
    pub strict: bool,
}

/// Options that shape the sampled range and canvas.
#[derive(clap::Args, Debug, Clone)]
pub struct ShapeArgs {
    /// Destination: sticker, message, share
    #[arg(short = 'd', long = "destination", value_name = "DEST", value_parser = parse_destination, default_value = "message")]
    pub destination: Destination,

    /// Playback speed multiplier
    #[arg(long = "speed", value_name = "X", default_value_t = 1.0)]
    pub speed: f64,

    /// Encoded frames per second (overrides config)
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f64>,

    /// Trim window in seconds
    #[arg(long = "trim", value_names = ["START", "END"], num_args = 2)]
    pub trim: Option<Vec<f64>>,

    /// Crop rect in normalized coordinates
    #[arg(long = "crop", value_names = ["X", "Y", "W", "H"], num_args = 4)]
    pub crop: Option<Vec<f32>>,

    /// Encode in reverse
    #[arg(short = 'r', long = "reverse")]
    pub reverse: bool,
}

impl ShapeArgs {
    pub fn crop_rect(&self) -> NormRect {
        match self.crop.as_deref() {
            Some([x, y, w, h]) => NormRect::new(*x, *y, *w, *h),
            _ => NormRect::FULL,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct PlayArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Playback rate multiplier
    #[arg(long = "rate", value_name = "X", default_value_t = 1.0)]
    pub rate: f32,

    /// Seconds to play before exiting
    #[arg(long = "seconds", value_name = "S", default_value_t = 3.0)]
    pub seconds: f64,

    /// Play backward
    #[arg(short = 'r', long = "reverse")]
    pub reverse: bool,

    /// Stop at the end instead of looping
    #[arg(long = "no-loop")]
    pub no_loop: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CalibrateArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub shape: ShapeArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StickerArg {
    pub path: PathBuf,
    pub rect: NormRect,
}

fn parse_destination(s: &str) -> Result<Destination, String> {
    Destination::from_name(s).ok_or_else(|| format!("unknown destination '{}' (sticker, message, share)", s))
}

fn parse_preset(s: &str) -> Result<SizePreset, String> {
    SizePreset::from_name(s).ok_or_else(|| format!("unknown preset '{}' (small, medium, large)", s))
}

fn parse_filter(s: &str) -> Result<ColorFilter, String> {
    ColorFilter::from_name(s).ok_or_else(|| format!("unknown filter '{}'", s))
}

fn parse_sticker(s: &str) -> Result<StickerArg, String> {
    let (path, rect) = s
        .rsplit_once('@')
        .ok_or_else(|| format!("expected PNG@X,Y,W,H, got '{}'", s))?;
    let nums: Vec<f32> = rect
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("bad number '{}': {}", v, e)))
        .collect::<Result<_, _>>()?;
    match nums.as_slice() {
        [x, y, w, h] => Ok(StickerArg {
            path: PathBuf::from(path),
            rect: NormRect::new(*x, *y, *w, *h),
        }),
        _ => Err(format!("expected 4 numbers after '@', got {}", nums.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_args() {
        let args = Args::try_parse_from([
            "flipbook", "-vv", "export", "frames/", "-o", "out.gif", "-d", "sticker", "--preset", "small",
            "--trim", "0.4", "1.4", "--crop", "0", "0", "0.5", "1", "--filter", "sepia", "--sticker",
            "cat.png@0.1,0.1,0.3,0.3", "--reverse",
        ])
        .unwrap();
        assert_eq!(args.verbosity, 2);
        let Command::Export(e) = args.command else {
            panic!("expected export");
        };
        assert_eq!(e.shape.destination, Destination::Sticker);
        assert_eq!(e.preset, SizePreset::Small);
        assert_eq!(e.shape.trim, Some(vec![0.4, 1.4]));
        assert_eq!(e.shape.crop_rect(), NormRect::new(0.0, 0.0, 0.5, 1.0));
        assert_eq!(e.filter, Some(ColorFilter::Sepia));
        assert_eq!(e.stickers[0].path, PathBuf::from("cat.png"));
        assert!(e.shape.reverse);
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["flipbook", "calibrate", "frames"]).unwrap();
        let Command::Calibrate(c) = args.command else {
            panic!("expected calibrate");
        };
        assert_eq!(c.shape.destination, Destination::Message);
        assert_eq!(c.shape.speed, 1.0);
        assert_eq!(c.shape.crop_rect(), NormRect::FULL);
        assert_eq!(c.input.source_fps, 10.0);
    }

    #[test]
    fn test_bad_sticker() {
        assert!(parse_sticker("cat.png").is_err());
        assert!(parse_sticker("cat.png@1,2,3").is_err());
        assert!(parse_sticker("a@b.png@0,0,1,x").is_err());
        assert_eq!(parse_sticker("a@b.png@0,0,1,1").unwrap().path, PathBuf::from("a@b.png"));
    }

    #[test]
    fn test_unknown_destination_rejected() {
        assert!(Args::try_parse_from(["flipbook", "export", "f", "-o", "x.gif", "-d", "fax"]).is_err());
    }
}
