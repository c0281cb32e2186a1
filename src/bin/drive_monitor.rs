//! drive_monitor - Stream wheel setpoints to the drive controller and watch
//! the measured speeds come back.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use harvest_console::transport::{DEFAULT_DRIVE_BAUD, SETPOINT_PERIOD};
use harvest_console::ui::Ui;
use harvest_console::{DirectedRpm, DriveLink, DriveSetpoint, MotorDirection};

const REFRESH_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive controller setpoint streamer and telemetry monitor")]
struct Args {
    /// Drive controller port, e.g. /dev/ttyACM0 or stub://drive.
    #[arg(long, env = "DRIVE_PORT")]
    port: String,

    #[arg(long, env = "DRIVE_BAUD", default_value_t = DEFAULT_DRIVE_BAUD)]
    baud: u32,

    /// Left wheel direction: 0 stop, 1 forward, 2 backward.
    #[arg(long, default_value_t = 1)]
    left_dir: u8,

    #[arg(long, default_value_t = 0)]
    left_rpm: u16,

    /// Right wheel direction: 0 stop, 1 forward, 2 backward.
    #[arg(long, default_value_t = 1)]
    right_dir: u8,

    #[arg(long, default_value_t = 0)]
    right_rpm: u16,

    /// Send the setpoint once and exit instead of streaming.
    #[arg(long)]
    once: bool,

    /// Stop streaming after this many seconds (runs until Ctrl-C when omitted).
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Wait after opening the port while the controller resets.
    #[arg(long, env = "DRIVE_RESET_WAIT_MS", default_value_t = 2000)]
    reset_wait_ms: u64,

    /// UI mode: auto, plain, pretty.
    #[arg(long, default_value = "auto")]
    ui: String,
}

fn wheel(direction: u8, rpm: u16) -> Result<DirectedRpm> {
    let direction = MotorDirection::from_code(direction)
        .ok_or_else(|| anyhow!("direction must be 0, 1 or 2 (got {})", direction))?;
    DirectedRpm::new(direction, rpm)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_flag(Some(&args.ui), std::io::stderr().is_terminal());

    let setpoint = DriveSetpoint::new(
        wheel(args.left_dir, args.left_rpm)?,
        wheel(args.right_dir, args.right_rpm)?,
    );

    let mut drive = DriveLink::new().with_reset_wait(Duration::from_millis(args.reset_wait_ms));
    {
        let _stage = ui.stage("Connect drive controller");
        drive.connect(&args.port, args.baud)?;
    }
    drive.set_setpoint(setpoint)?;

    if args.once {
        drive.send_once()?;
        drive.disconnect()?;
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    drive.start_streaming()?;
    log::info!(
        "drive_monitor streaming {} every {:?} (Ctrl-C to stop)",
        setpoint.encode().trim_end(),
        SETPOINT_PERIOD
    );

    let started = Instant::now();
    let deadline = args.duration_secs.map(Duration::from_secs);
    let mut ticker = ui.ticker("drive", 5);
    while running.load(Ordering::SeqCst) && drive.is_connected() {
        if deadline.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        let status = match drive.latest_telemetry()? {
            Some(sample) => format!(
                "t={:.1}s L {:.0}/{:.1} rpm  R {:.0}/{:.1} rpm",
                sample.elapsed_secs,
                sample.target_left,
                sample.actual_left,
                sample.target_right,
                sample.actual_right
            ),
            None => "waiting for telemetry".to_string(),
        };
        ticker.update(status);
        std::thread::sleep(REFRESH_INTERVAL);
    }

    let samples = drive.telemetry()?;
    ticker.finish(&format!("{} telemetry samples kept", samples.len()));
    log::info!("stopping drive stream...");
    drive.set_setpoint(DriveSetpoint::stopped())?;
    if drive.is_connected() {
        drive.send_once()?;
    }
    drive.disconnect()?;
    Ok(())
}
