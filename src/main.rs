pub(crate) mod effectrunner;
pub(crate) mod effects;
pub(crate) mod frametimer;
pub(crate) mod layout;
pub(crate) mod opcclient;
pub(crate) mod settings;

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{CommandFactory, Parser};

use crate::effectrunner::EffectRunner;
use crate::effects::EffectKind;
use crate::layout::LoadError;
use crate::opcclient::{OpcClient, TransportError, DEFAULT_HOST};
use crate::settings::{Settings, SettingsError};

/// Flags that may also be spelled with a single dash.
const LEGACY_FLAGS: [&str; 6] = ["-fps", "-layout", "-server", "-config", "-effect", "-color"];

#[derive(Parser, Debug)]
#[command(version, about = "Run an LED effect and stream it to an Open Pixel Control server")]
struct Cli {
    /// Maximum frame rate
    #[arg(long, value_name = "LIMIT", value_parser = parse_frame_rate)]
    fps: Option<f32>,

    /// JSON layout describing where each pixel sits
    #[arg(long, value_name = "FILE.json")]
    layout: Option<PathBuf>,

    /// OPC server to send frames to
    #[arg(long, value_name = "HOST[:port]")]
    server: Option<String>,

    /// Settings file with defaults for the other options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Effect to run
    #[arg(long, value_enum)]
    effect: Option<EffectKind>,

    /// Accent color as linear R,G,B in [0, 1]
    #[arg(long, value_name = "R,G,B", value_parser = parse_color)]
    color: Option<[f32; 3]>,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error("Invalid frame rate {0}")]
    InvalidFrameRate(f32),

    #[error("Can't load layout from {path}: {source}")]
    Layout {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    #[error("Can't resolve server name {host}: {source}")]
    Server {
        host: String,
        #[source]
        source: TransportError,
    },

    #[error("No layout specified")]
    NoLayout,

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl StartupError {
    fn shows_usage(&self) -> bool {
        matches!(self, StartupError::InvalidFrameRate(_) | StartupError::NoLayout)
    }
}

fn parse_frame_rate(arg: &str) -> Result<f32, String> {
    let rate: f32 = match arg.parse() {
        Ok(rate) => rate,
        Err(_) => return Err(format!("{arg} is not a number")),
    };

    if rate <= 0.0 || !rate.is_finite() {
        return Err("Invalid frame rate".to_string());
    }

    Ok(rate)
}

fn parse_color(arg: &str) -> Result<[f32; 3], String> {
    let components: Vec<&str> = arg.split(',').map(str::trim).collect();
    if components.len() != 3 {
        return Err(format!("expected three comma separated values, got {arg}"));
    }

    let mut color = [0.0; 3];
    for (slot, component) in color.iter_mut().zip(components) {
        *slot = match component.parse() {
            Ok(value) => value,
            Err(_) => return Err(format!("{component} is not a number")),
        };
    }

    Ok(color)
}

/// Rewrites the original single-dash long flags into clap's `--flag` form.
fn normalize_legacy_flags<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    args.into_iter()
        .map(|arg| {
            if LEGACY_FLAGS.contains(&arg.as_str()) {
                format!("-{arg}")
            } else {
                arg
            }
        })
        .collect()
}

/// Command line values override settings file values.
fn merge(args: Cli, settings: Settings) -> Cli {
    Cli {
        fps: args.fps.or(settings.fps),
        layout: args.layout.or(settings.layout),
        server: args.server.or(settings.server),
        config: args.config,
        effect: args.effect.or(settings.effect),
        color: args.color.or(settings.color),
    }
}

fn configure(runner: &mut EffectRunner, args: Cli) -> Result<(), StartupError> {
    let args = match args.config.clone() {
        Some(path) => {
            let settings = Settings::load(&path)?;
            log::info!("Loaded settings from {}", path.display());
            merge(args, settings)
        }
        None => args,
    };

    if let Some(fps) = args.fps {
        // Values from a settings file have not been through clap.
        if fps <= 0.0 || !fps.is_finite() {
            return Err(StartupError::InvalidFrameRate(fps));
        }
        runner.set_max_frame_rate(fps);
    }

    if let Some(path) = args.layout {
        if let Err(source) = runner.set_layout(&path) {
            return Err(StartupError::Layout { path, source });
        }
    }

    let host = args.server.unwrap_or_else(|| DEFAULT_HOST.to_string());
    if let Err(source) = runner.set_server(&host) {
        return Err(StartupError::Server { host, source });
    }

    if !runner.has_layout() {
        return Err(StartupError::NoLayout);
    }

    let pixel_count = runner.layout().map_or(0, |layout| layout.len());
    let [red, green, blue] = args.color.unwrap_or([1.0, 0.4, 0.0]);
    let effect = args.effect.unwrap_or_default();
    log::info!("Running {effect:?} effect on {pixel_count} pixels");
    runner.set_effect(Some(effect.build(
        palette::LinSrgb::new(red, green, blue),
        pixel_count,
    )));

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Cli::try_parse_from(normalize_legacy_flags(std::env::args())) {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    let mut runner = EffectRunner::new(OpcClient::new());
    if let Err(err) = configure(&mut runner, args) {
        log::error!("{err}");
        if err.shows_usage() {
            eprintln!("{}", Cli::command().render_usage());
        }
        process::exit(1);
    }

    if let Some(addr) = runner.client().target_addr() {
        log::info!("Sending frames to {addr}");
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    if let Err(err) = ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst)) {
        log::warn!("Cannot install signal handler, running until killed: {err}");
        runner.run();
    }

    runner.run_while(&running);

    log::info!("Shutting down");
    if let Err(err) = runner.blackout() {
        log::warn!("Cannot send blackout frame: {err}");
    }
}
