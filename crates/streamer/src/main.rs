//! usb-bulk-streamer
//!
//! Acquires one USB device by vendor/product id, opens its first interface and
//! streams a fixed frame to a bulk pipe at a fixed cadence.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use std::process::ExitCode;
use streamer::config::{StreamerConfig, duration_serde::parse_duration};
use streamer::libusb::LibusbBackend;
use streamer::session::{SessionOutcome, run_session};
use streamer::stream::ThreadSleep;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usb-bulk-streamer")]
#[command(
    author,
    version,
    about = "Stream fixed frames to a USB bulk endpoint"
)]
#[command(long_about = "
Finds a USB device by vendor and product id, opens it (seizing it from
another client if needed), opens its first interface and writes the same
frame to one of its pipes at a fixed interval.

EXAMPLES:
    # Stream the default lighting frame to 15e4:0053
    usb-bulk-streamer

    # Different device, 50 frames every 40ms
    usb-bulk-streamer --vendor-id 0x1234 --product-id 0x5678 --frames 50 --interval 40ms

    # Only list the interface's pipes
    usb-bulk-streamer --probe-only

    # One test write to pipes 1 and 2 before streaming
    usb-bulk-streamer --probe-pipe 1 --probe-pipe 2

    # List USB devices and exit
    usb-bulk-streamer --list-devices

CONFIGURATION:
    Built-in defaults are used unless --config names a TOML file.
    Command line flags override values from the file.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Vendor id to match, e.g. 0x15e4
    #[arg(long, value_name = "HEX")]
    vendor_id: Option<String>,

    /// Product id to match, e.g. 0x0053
    #[arg(long, value_name = "HEX")]
    product_id: Option<String>,

    /// 1-based pipe index to stream to
    #[arg(short, long)]
    pipe: Option<u8>,

    /// Number of frames to send
    #[arg(short, long, value_name = "COUNT")]
    frames: Option<u32>,

    /// Pause after each frame (e.g. 25ms, 1s)
    #[arg(short, long, value_name = "DURATION")]
    interval: Option<String>,

    /// Acquire the device and list its pipes without streaming
    #[arg(long)]
    probe_only: bool,

    /// Pipe that gets one test write before streaming (repeatable)
    #[arg(long = "probe-pipe", value_name = "PIPE")]
    probe_pipes: Vec<u8>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    /// Apply command line overrides on top of `config`
    fn apply(&self, config: &mut StreamerConfig) -> Result<()> {
        if let Some(vendor_id) = &self.vendor_id {
            config.device.vendor_id = vendor_id.clone();
        }
        if let Some(product_id) = &self.product_id {
            config.device.product_id = product_id.clone();
        }
        if let Some(pipe) = self.pipe {
            config.stream.pipe = pipe;
        }
        if let Some(frames) = self.frames {
            config.stream.frame_count = frames;
        }
        if let Some(interval) = &self.interval {
            config.stream.interval = parse_duration(interval)
                .map_err(|e| anyhow!("Invalid --interval '{}': {}", interval, e))?;
        }
        if self.probe_only {
            config.stream.probe_only = true;
        }
        if !self.probe_pipes.is_empty() {
            config.stream.probe_pipes = self.probe_pipes.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        Ok(())
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StreamerConfig::load_from_arg(path).context("Failed to load configuration")?,
        None => StreamerConfig::default(),
    };
    args.apply(&mut config)?;
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.logging.level).context("Failed to setup logging")?;

    info!("usb-bulk-streamer v{}", env!("CARGO_PKG_VERSION"));

    let backend =
        LibusbBackend::new(config.usb.write_timeout).context("Failed to initialise USB")?;

    if args.list_devices {
        return list_devices_mode(&backend).map(|()| ExitCode::SUCCESS);
    }

    let plan = config.to_plan()?;
    let outcome = run_session(&backend, &plan, &mut ThreadSleep);
    print_summary(&outcome);

    Ok(ExitCode::from(outcome.exit_code()))
}

fn list_devices_mode(backend: &LibusbBackend) -> Result<()> {
    info!("Listing USB devices...");
    let devices = backend
        .list_devices()
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", devices.len());
        for device in devices {
            println!(
                "  {:04x}:{:04x}  Bus {:03} Device {:03}",
                device.vendor_id, device.product_id, device.bus_number, device.address
            );
        }
    }

    Ok(())
}

fn print_summary(outcome: &SessionOutcome) {
    println!();
    println!("Session summary");
    match outcome.reached() {
        Some(step) => println!("  Step reached:     {}", step),
        None => println!("  Step reached:     none"),
    }
    if let Some(mode) = outcome.open_mode {
        println!("  Open mode:        {:?}", mode);
    }
    if let Some(status) = outcome.degradations.configure {
        println!("  Configure:        degraded ({})", status);
    }
    if let Some(status) = outcome.degradations.open_interface {
        println!("  Interface open:   degraded ({})", status);
    }
    if !outcome.pipes.is_empty() {
        println!("  Pipes:            {}", outcome.pipes.len());
    }
    for probe in &outcome.probes {
        println!("  Probe pipe {}:     {}", probe.pipe, probe.status);
    }
    match &outcome.stream {
        Some(report) => println!(
            "  Frames:           {} sent, {} failed of {}",
            report.frames_sent(),
            report.frames_failed,
            report.frames_requested
        ),
        None => println!("  Frames:           not streamed"),
    }
    if let Some(err) = &outcome.error {
        println!("  Error:            {}", err);
    }
    println!("  Last status:      {}", outcome.last_status);
    println!("  Handles released: {}", outcome.teardown.count());
}
