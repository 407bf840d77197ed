use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use still_capture::config::{
    parse_demo_interval, parse_thumbnail, AwbMode, ExposureMode, ImageEffect, MeteringMode, Window,
    STDOUT_DESTINATION,
};
use still_capture::{capture_still, HasRecoverySuggestion, ImageEncoding, StillConfig};

/// Exit status after an interrupt.
const INTERRUPTED_EXIT: i32 = 255;

/// Camera still capture.
///
/// Waits for the timeout, captures one still and writes it to the output
/// file. With --timelapse, captures one frame every interval until the
/// timeout; use %d or %04d in the output name for the frame number.
#[derive(Parser, Debug)]
#[command(name = "stillcap")]
#[command(about = "Capture stills from the camera")]
#[command(disable_help_flag = true)]
struct Args {
    /// Print help
    #[arg(short = '?', long = "help", action = ArgAction::Help)]
    help: Option<bool>,

    /// Image width
    #[arg(short, long)]
    width: Option<u32>,

    /// Image height
    #[arg(short, long)]
    height: Option<u32>,

    /// JPEG quality, 0 to 100
    #[arg(short, long)]
    quality: Option<u32>,

    /// Add raw bayer data to the JPEG metadata
    #[arg(short, long)]
    raw: bool,

    /// Output file name; '-' writes to stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Output verbose information during the run
    #[arg(short, long)]
    verbose: bool,

    /// Time before the capture and shutdown, in ms
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Thumbnail parameters as width:height:quality, or 'none'
    #[arg(long = "thumb", value_name = "W:H:Q")]
    thumb: Option<String>,

    /// Run a demo mode, cycling camera settings every <ms> (default 250)
    #[arg(short, long, value_name = "ms", num_args = 0..=1, default_missing_value = "")]
    demo: Option<String>,

    /// Encoding to use for the output file: jpg, bmp, gif or png
    #[arg(short, long)]
    encoding: Option<ImageEncoding>,

    /// EXIF tag to apply to captures, format 'key=value'
    #[arg(short = 'x', long = "exif", value_name = "key=value", action = ArgAction::Append)]
    exif: Vec<String>,

    /// Timelapse mode: capture a frame every <ms>
    #[arg(long, value_name = "ms")]
    timelapse: Option<u64>,

    /// Give up waiting for a frame after <ms> (default: wait indefinitely)
    #[arg(long, value_name = "ms")]
    completion_timeout: Option<u64>,

    /// Preview window settings as x,y,w,h
    #[arg(short, long, value_name = "x,y,w,h")]
    preview: Option<String>,

    /// Fullscreen preview mode
    #[arg(short, long)]
    fullscreen: bool,

    /// Do not display a preview window
    #[arg(short = 'n', long = "nopreview")]
    no_preview: bool,

    /// Preview window opacity, 0 to 255
    #[arg(long)]
    opacity: Option<u8>,

    /// Number of encoder output buffers
    #[arg(long, value_name = "n")]
    buffers: Option<u32>,

    /// Size of each encoder output buffer in bytes
    #[arg(long, value_name = "bytes")]
    buffer_size: Option<usize>,

    /// Image sharpness, -100 to 100
    #[arg(long, allow_negative_numbers = true)]
    sharpness: Option<i32>,

    /// Image contrast, -100 to 100
    #[arg(long, allow_negative_numbers = true)]
    contrast: Option<i32>,

    /// Image brightness, 0 to 100
    #[arg(long)]
    brightness: Option<u32>,

    /// Image saturation, -100 to 100
    #[arg(long, allow_negative_numbers = true)]
    saturation: Option<i32>,

    /// Capture ISO
    #[arg(long = "ISO", alias = "iso")]
    iso: Option<u32>,

    /// EV compensation, -10 to 10
    #[arg(long, allow_negative_numbers = true)]
    ev: Option<i32>,

    /// Exposure mode
    #[arg(long)]
    exposure: Option<ExposureMode>,

    /// Auto white balance mode
    #[arg(long)]
    awb: Option<AwbMode>,

    /// Image effect
    #[arg(long = "imxfx")]
    image_effect: Option<ImageEffect>,

    /// Metering mode
    #[arg(long)]
    metering: Option<MeteringMode>,

    /// Image rotation, 0 to 359
    #[arg(long)]
    rotation: Option<u32>,

    /// Flip horizontally
    #[arg(long)]
    hflip: bool,

    /// Flip vertically
    #[arg(long)]
    vflip: bool,
}

impl Args {
    /// Verbose output, off when the image goes to stdout.
    fn diagnostics_verbose(&self) -> bool {
        self.verbose && self.output.as_deref() != Some(STDOUT_DESTINATION)
    }

    /// Builds the run configuration. Expects logging to be set up, so the
    /// warnings for clamped or malformed values are visible.
    fn into_config(self) -> StillConfig {
        let mut config = StillConfig::default();
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(quality) = self.quality {
            config.set_quality(quality);
        }
        config.want_raw = self.raw;
        config.output = self.output;
        config.verbose = self.verbose;
        if let Some(timeout) = self.timeout {
            config.timeout_ms = timeout;
        }
        if let Some(thumb) = &self.thumb {
            config.thumbnail = parse_thumbnail(thumb);
        }
        if let Some(demo) = &self.demo {
            config.demo_mode = true;
            config.demo_interval_ms = parse_demo_interval(Some(demo));
        }
        if let Some(encoding) = self.encoding {
            config.encoding = encoding;
        }
        for tag in self.exif {
            config.add_exif_tag(tag);
        }
        if let Some(timelapse) = self.timelapse {
            config.timelapse_ms = timelapse;
        }
        config.completion_timeout_ms = self.completion_timeout;
        config.encoder_buffers.count = self.buffers;
        config.encoder_buffers.size = self.buffer_size;

        if let Some(preview) = &self.preview {
            match parse_window(preview) {
                Some(window) => {
                    config.preview.window = window;
                    config.preview.fullscreen = false;
                }
                None => warn!(value = %preview, "Malformed preview window, using default"),
            }
        }
        if self.fullscreen {
            config.preview.fullscreen = true;
        }
        if self.no_preview {
            config.preview.want_preview = false;
        }
        if let Some(opacity) = self.opacity {
            config.preview.opacity = opacity;
        }

        let camera = &mut config.camera;
        camera.sharpness = self.sharpness.unwrap_or(camera.sharpness);
        camera.contrast = self.contrast.unwrap_or(camera.contrast);
        camera.brightness = self.brightness.unwrap_or(camera.brightness);
        camera.saturation = self.saturation.unwrap_or(camera.saturation);
        camera.iso = self.iso.unwrap_or(camera.iso);
        camera.exposure_compensation = self.ev.unwrap_or(camera.exposure_compensation);
        camera.exposure_mode = self.exposure.unwrap_or(camera.exposure_mode);
        camera.awb_mode = self.awb.unwrap_or(camera.awb_mode);
        camera.image_effect = self.image_effect.unwrap_or(camera.image_effect);
        camera.metering_mode = self.metering.unwrap_or(camera.metering_mode);
        camera.rotation = self.rotation.unwrap_or(camera.rotation);
        camera.hflip = self.hflip;
        camera.vflip = self.vflip;
        config
    }
}

/// Parses `x,y,w,h`.
fn parse_window(value: &str) -> Option<Window> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [x, y, width, height] = parts.as_slice() else {
        return None;
    };
    Some(Window {
        x: x.parse().ok()?,
        y: y.parse().ok()?,
        width: width.parse().ok()?,
        height: height.parse().ok()?,
    })
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    if std::env::args_os().len() <= 1 {
        eprintln!("stillcap Camera App {}\n", env!("CARGO_PKG_VERSION"));
        eprintln!("{}", Args::command().render_help());
        return Ok(ExitCode::SUCCESS);
    }

    let args = Args::parse();
    init_logging(args.diagnostics_verbose());
    let config = args.into_config();

    if config.effective_verbose() {
        eprintln!("stillcap Camera App {}\n", env!("CARGO_PKG_VERSION"));
        let dump = config.to_json()?;
        info!(config = %dump, "Configuration");
    }

    let run = tokio::task::spawn_blocking(move || capture_still(config));
    tokio::select! {
        joined = run => {
            let result = joined.context("capture thread failed")?;
            match result {
                Ok(summary) => {
                    info!(
                        captured = summary.frames_captured,
                        skipped = summary.frames_skipped,
                        failed = summary.frames_failed,
                        "Run complete"
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!(error = %e, "Capture failed");
                    if let Some(suggestion) = e.recovery_suggestion() {
                        error!("{suggestion}");
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.context("failed to listen for ctrl-c")?;
            eprintln!("Aborting program");
            // No teardown: the process exits with the pipeline running.
            std::process::exit(INTERRUPTED_EXIT);
        }
    }
}
