//! Argument parsing for running from the command line

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use csi_slurper::CaptureConfig;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture CSI records from the simulated receive path into a file
    Capture(CaptureArgs),
    /// Print a summary line for every record in a capture file
    Inspect {
        /// Capture file written by `capture`
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct CaptureArgs {
    /// Output file (defaults to csi-<UTC timestamp>.dat)
    #[clap(short, long)]
    pub output: Option<PathBuf>,
    /// Record slots in the ring (power of two)
    #[clap(short, long, default_value_t = csi_slurper::DEFAULT_SLOTS)]
    pub slots: usize,
    /// Read timeout in milliseconds
    #[clap(short, long, default_value_t = 5000)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_ms: u64,
    /// Frames per second the simulated radio receives
    #[clap(short, long, default_value_t = 100)]
    #[clap(value_parser = clap::value_parser!(u32).range(1..))]
    pub rate: u32,
    /// Stop after this many records (run until Ctrl-C otherwise)
    #[clap(short, long)]
    pub count: Option<u64>,
    /// Receive chain mask of the simulated radio, in binary
    #[clap(long, default_value = "111", value_parser = valid_chainmask)]
    pub chainmask: u8,
    /// Channel frequency in MHz
    #[clap(long, default_value_t = 2437)]
    pub channel: u16,
}

impl CaptureArgs {
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            slots: self.slots,
            read_timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_chainmask(s: &str) -> Result<u8, String> {
    let s = s.trim_start_matches("0b");
    match u8::from_str_radix(s, 2) {
        Ok(mask) if mask <= 0b111 => Ok(mask),
        _ => Err("Chain mask must be up to three binary digits".to_string()),
    }
}
