//! harvest_console - Run the detection-to-actuation pipeline headless.
//!
//! Frames come from the synthetic camera; detections come from a JSON-lines
//! replay (or nothing, when no replay is given). Commands go to the harvest
//! controller over a serial port or a `stub://` in-memory link.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use harvest_console::config::ConsoleConfig;
use harvest_console::transport::DEFAULT_HARVEST_BAUD;
use harvest_console::ui::{StatusTicker, Ui};
use harvest_console::{
    DetectorBackend, FrameReport, HarvestConsole, ReplayBackend, ScriptedBackend, SyntheticConfig,
    SyntheticSource,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Strawberry harvester console: detection, zone gate and actuation"
)]
struct Args {
    /// Settings file (JSON, flat keys).
    #[arg(long, env = "HARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Harvest controller port, e.g. /dev/ttyUSB0 or stub://harvest.
    #[arg(long, env = "HARVEST_PORT")]
    harvest_port: Option<String>,

    #[arg(long, env = "HARVEST_BAUD", default_value_t = DEFAULT_HARVEST_BAUD)]
    baud: u32,

    /// Recorded detections, one JSON array per frame.
    #[arg(long, env = "HARVEST_REPLAY")]
    replay: Option<PathBuf>,

    /// Restart the replay when it runs out.
    #[arg(long)]
    loop_replay: bool,

    /// Camera index; defaults to `current_camera` from the settings.
    #[arg(long)]
    camera: Option<u32>,

    /// Stop after this many frames (runs until Ctrl-C when omitted).
    #[arg(long)]
    frames: Option<u64>,

    #[arg(long, default_value_t = 15)]
    fps: u32,

    /// Force auto-stop on regardless of the settings file.
    #[arg(long)]
    auto_stop: bool,

    /// Send T# once connected and arm the sequencer.
    #[arg(long)]
    start_forward: bool,

    /// Coordinate to send after an automatic stop, as `z,y` in cm.
    #[arg(long)]
    save_coordinate: Option<String>,

    /// Write the final settings here on exit.
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// UI mode: auto, plain, pretty.
    #[arg(long, default_value = "auto")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_flag(Some(&args.ui), std::io::stderr().is_terminal());

    let config = {
        let _stage = ui.stage("Load settings");
        match &args.config {
            Some(path) => ConsoleConfig::load_from(path)?,
            None => ConsoleConfig::load()?,
        }
    };

    let detector: Box<dyn DetectorBackend> = match &args.replay {
        Some(path) => {
            let _stage = ui.stage("Load detection replay");
            Box::new(ReplayBackend::open(path, args.loop_replay)?)
        }
        None => {
            log::warn!("no --replay given; frames will carry no detections");
            Box::new(ScriptedBackend::default())
        }
    };

    let camera = args.camera.unwrap_or(config.current_camera);
    let mut source = SyntheticSource::new(SyntheticConfig {
        target_fps: args.fps.max(1),
        width: config.image_width,
        height: config.image_height,
        ..SyntheticConfig::for_camera(camera)
    })?;
    source.connect()?;

    let mut console = HarvestConsole::new(config, detector);
    if args.auto_stop {
        console.set_auto_stop(true);
    }
    if let Some(raw) = &args.save_coordinate {
        let (z, y) = parse_coordinate(raw)?;
        console.save_coordinate(z, y)?;
    }
    if let Some(port) = &args.harvest_port {
        let _stage = ui.stage("Connect harvest controller");
        console.connect_harvest(port, args.baud)?;
    }
    if args.start_forward {
        console.start_forward().context("start forward")?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let frame_period = Duration::from_secs_f64(1.0 / f64::from(source.target_fps()));
    let mut ticker = ui.ticker("frames", u64::from(source.target_fps()));
    let mut processed = 0u64;
    log::info!("harvest_console running (Ctrl-C to stop)");

    while running.load(Ordering::SeqCst) {
        if args.frames.is_some_and(|limit| processed >= limit) {
            break;
        }
        let tick = Instant::now();
        let frame = source.next_frame()?;
        processed += 1;
        match console.process_frame(frame, tick) {
            Ok(report) => show_report(&mut ticker, &report, &console),
            Err(err) => log::error!("frame {} failed: {:#}", processed, err),
        }

        if let Some(remaining) = frame_period.checked_sub(tick.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    ticker.finish(&format!("{} frames processed", processed));
    log::info!("shutting down harvest_console...");
    console.shutdown()?;
    if let Some(path) = &args.save_config {
        console.save_config(path)?;
    }
    Ok(())
}

fn show_report(ticker: &mut StatusTicker, report: &FrameReport, console: &HarvestConsole) {
    if report.emergency_stop {
        ticker.note("controller emergency stop: sequencer disarmed");
    }
    if let Some(banner) = report.banner {
        ticker.note(banner);
    }
    for command in &report.commands_sent {
        ticker.note(&format!("sent {}", command.encode()));
    }
    ticker.update(format!(
        "{:.1} fps | objects {} | in zone {} | {:?} | harvested {}",
        report.metrics.fps,
        report.metrics.objects,
        report.target_in_zone,
        console.phase(),
        console.harvests_completed()
    ));
}

fn parse_coordinate(raw: &str) -> Result<(f64, f64)> {
    let (z, y) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("coordinate must be 'z,y' (got '{}')", raw))?;
    let z: f64 = z
        .trim()
        .parse()
        .map_err(|_| anyhow!("coordinate z must be a number (got '{}')", z))?;
    let y: f64 = y
        .trim()
        .parse()
        .map_err(|_| anyhow!("coordinate y must be a number (got '{}')", y))?;
    Ok((z, y))
}
