use std::{
    error::Error,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use chrono::{Datelike, Timelike, Utc};
use clap::Parser;
use csi_slurper::{frame::FrameIter, CsiDevice};
use tracing::{info, warn};

mod args;
mod radio;

use args::{Args, CaptureArgs, Command};
use radio::SimulatedRadio;

/// Default capture file name for right now
fn capture_file_name() -> PathBuf {
    let now = Utc::now();
    PathBuf::from(format!(
        "csi-{}-{:02}-{:02}-{:02}:{:02}:{:02}.dat",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    ))
}

fn capture(args: CaptureArgs) -> Result<(), Box<dyn Error>> {
    let (producer, mut device) = csi_slurper::channel(&args.capture_config())?;
    let path = args.output.clone().unwrap_or_else(capture_file_name);
    let mut file = BufWriter::new(File::create(&path)?);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;

    // Open before the radio starts so the first frames are kept
    device.open();
    let radio = SimulatedRadio {
        config: csi_slurper::RadioConfig {
            rx_chainmask: args.chainmask,
            channel: args.channel,
        },
        rate: args.rate,
        tx_streams: 2,
    };
    let radio_running = running.clone();
    let radio_thread = thread::spawn(move || radio.run(producer, radio_running));

    info!(path = %path.display(), "Capturing");
    let written = drain(&mut device, &mut file, &running, args.count)?;
    running.store(false, Ordering::SeqCst);
    device.close();
    file.flush()?;
    let _ = radio_thread.join();

    let stats = device.stats().snapshot();
    info!(records = written, %stats, "Capture finished");
    if stats.lost() > 0 {
        warn!(lost = stats.lost(), "Reader fell behind, records were dropped");
    }
    Ok(())
}

/// Read records into `out` until stopped or `count` have been written
fn drain(
    device: &mut CsiDevice,
    out: &mut impl Write,
    running: &AtomicBool,
    count: Option<u64>,
) -> Result<u64, Box<dyn Error>> {
    let mut written = 0u64;
    while running.load(Ordering::SeqCst) && count.map_or(true, |c| written < c) {
        match device.next_frame()? {
            Some(frame) => {
                out.write_all(frame)?;
                written += 1;
            }
            None => info!("No CSI within the read timeout"),
        }
    }
    Ok(written)
}

fn inspect(path: &Path) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(path)?;
    let mut last_tstamp = None;
    for (i, frame) in FrameIter::new(&bytes).enumerate() {
        let frame = frame?;
        let s = frame.status;
        let delta = last_tstamp.map_or(0, |t| s.tstamp.wrapping_sub(t));
        last_tstamp = Some(s.tstamp);
        let power = frame.samples().map_or(0.0, |m| m.mean_power());
        println!(
            "{:6} t={:<12} dt={:<8} ch={} bw={} tones={} nr={} nc={} rssi={} [{} {} {}] rate={:#04x} csi={} payload={} power={:.1}",
            i,
            s.tstamp,
            delta,
            s.channel,
            s.chan_bw,
            s.num_tones,
            s.nr,
            s.nc,
            s.rssi,
            s.rssi_ctl[0],
            s.rssi_ctl[1],
            s.rssi_ctl[2],
            s.rate,
            frame.csi.len(),
            frame.payload.len(),
            power
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args::convert_filter(args.verbose.log_level_filter()))
        .init();
    match args.command {
        Command::Capture(capture_args) => capture(capture_args),
        Command::Inspect { path } => inspect(&path),
    }
}
