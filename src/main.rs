// src/main.rs
mod config;
mod drivers;
mod engine;
mod recorder;
mod session;
mod simulator;
mod types;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, error, info, warn};
use crate::config::{MonitorConfig, OutputConfig, DEFAULT_BAUD_RATE};
use crate::drivers::parser::decode_line;
use crate::drivers::{scan_ports, LineError, LineSource, SerialLineSource, TimestampSource};
use crate::recorder::{DataRecorder, Delimiter, RecordMode};
use crate::session::Session;
use crate::types::{ConnectionMode, MonitorMessage};

#[derive(Parser, Debug)]
#[command(name = "thermolink", version, about = "Serial temperature probe monitor and logger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available serial ports
    Ports,
    /// Print every line the device sends
    Monitor {
        #[arg(short, long)]
        port: String,
        #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
        baud: u32,
    },
    /// Acquire samples, show the latest value and optionally log them to a file
    Acquire(AcquireArgs),
    /// Summarise a file written by `acquire`
    Summary {
        file: PathBuf,
        /// The file is comma-separated
        #[arg(long)]
        comma: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Continuous,
    OnStop,
}

#[derive(Args, Debug)]
struct AcquireArgs {
    /// JSON settings file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    port: Option<String>,
    #[arg(short, long)]
    baud: Option<u32>,
    /// Use the built-in simulated probe instead of a serial port
    #[arg(long)]
    simulate: bool,
    #[arg(long)]
    channels: Option<usize>,
    /// Lines start with the device's microsecond counter: `<time_us>,<value>`
    #[arg(long)]
    device_timestamp: bool,
    /// Sent before every read, e.g. 'T2\n'
    #[arg(long)]
    poll_command: Option<String>,
    #[arg(long)]
    interval_ms: Option<u64>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long, value_enum)]
    record_mode: Option<ModeArg>,
    /// Comma-separated output instead of tabs
    #[arg(long)]
    comma: bool,
    #[arg(long)]
    normalize_start: bool,
    /// Stop automatically after this many seconds (otherwise press Enter)
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Display refresh period
    #[arg(long, default_value_t = 1000)]
    refresh_ms: u64,
    /// Write the effective settings to this file
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl AcquireArgs {
    fn build_config(&self) -> Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)?,
            None => MonitorConfig::default(),
        };
        if self.simulate {
            config.mode = ConnectionMode::Simulation;
        }
        if let Some(port) = &self.port {
            config.port = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if self.device_timestamp {
            config.timestamp = TimestampSource::Device;
        }
        if let Some(cmd) = &self.poll_command {
            config.poll_command = Some(cmd.clone());
        }
        if let Some(ms) = self.interval_ms {
            config.sample_interval_ms = ms;
        }
        if let Some(ms) = self.timeout_ms {
            config.read_timeout_ms = ms;
        }
        let wants_output = self.output.is_some()
            || self.record_mode.is_some()
            || self.comma
            || self.normalize_start;
        if wants_output {
            let mut output = config.output.take().unwrap_or_default();
            if let Some(mode) = self.record_mode {
                output.mode = match mode {
                    ModeArg::Continuous => RecordMode::Continuous,
                    ModeArg::OnStop => RecordMode::OnStop,
                };
            }
            output.path = match &self.output {
                Some(path) => path.clone(),
                None if self.config.is_none() => default_output_path(),
                None => output.path,
            };
            if self.comma {
                output.delimiter = Delimiter::Comma;
            }
            output.normalize_start |= self.normalize_start;
            config.output = Some(output);
        }
        config.validate()?;
        Ok(config)
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "temperatura_{}.txt",
        Local::now().format("%Y%m%d_%H%M%S")
    ))
}

fn list_ports() {
    let ports = scan_ports();
    if ports.is_empty() {
        println!("No serial ports found!");
        return;
    }
    for (i, port) in ports.iter().enumerate() {
        println!("{i}: {port}");
    }
}

fn monitor(port: &str, baud: u32) -> Result<()> {
    let mut source = SerialLineSource::open(port, baud, Duration::from_secs(1))?;
    info!("Connected to {port} at {baud} baud.");
    loop {
        if let Some(raw) = source.read_line()? {
            match decode_line(&raw) {
                Ok(line) => println!("Received: {line}"),
                Err(LineError::Empty) => {}
                Err(e) => warn!("{e}"),
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
}

fn summary(file: PathBuf, comma: bool) -> Result<()> {
    let delimiter = if comma { Delimiter::Comma } else { Delimiter::Tab };
    let recorder = DataRecorder::new(file, delimiter);
    let samples = recorder.load()?;
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        println!("{}: no samples", recorder.path().display());
        return Ok(());
    };
    println!(
        "{}: {} samples, {:.2}s .. {:.2}s",
        recorder.path().display(),
        samples.len(),
        first.elapsed_seconds,
        last.elapsed_seconds
    );
    for ch in 0..first.channel_values.len() {
        let values = samples.iter().filter_map(|s| s.channel_values.get(ch).copied());
        let (min, max) = values.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        println!("  channel {}: min {min:.2} °C, max {max:.2} °C", ch + 1);
    }
    Ok(())
}

/// True only when a line was actually entered; EOF and read errors do not count.
fn wait_for_enter(mut input: impl BufRead) -> bool {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(n) if n > 0 => true,
        // stdin 已关闭 (nohup, < /dev/null): 只靠时长或断线结束
        Ok(_) => {
            debug!("stdin closed, Enter will not stop acquisition");
            false
        }
        Err(e) => {
            debug!("stdin unreadable ({e}), Enter will not stop acquisition");
            false
        }
    }
}

fn spawn_enter_watcher(stop: Arc<AtomicBool>) {
    thread::spawn(move || {
        if wait_for_enter(std::io::stdin().lock()) {
            stop.store(true, Ordering::SeqCst);
        }
    });
}

fn acquire(args: AcquireArgs) -> Result<()> {
    let config = args.build_config()?;
    if let Some(path) = &args.save_config {
        config.save(path)?;
        info!("settings saved to {}", path.display());
    }
    let output: Option<OutputConfig> = config.output.clone();
    let mut session = Session::new(config);
    session.connect().context("could not connect to the probe")?;
    session.start_acquisition()?;

    let stop = Arc::new(AtomicBool::new(false));
    if args.duration_secs.is_none() {
        println!("Press Enter to stop.");
        spawn_enter_watcher(stop.clone());
    }
    let started = Instant::now();
    let deadline = args.duration_secs.map(Duration::from_secs);
    let refresh = Duration::from_millis(args.refresh_ms.max(10));

    // 前台刷新循环: 固定节拍读取快照, 不逐样本同步
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(refresh);
        let mut lost = false;
        for msg in session.poll_messages() {
            match msg {
                MonitorMessage::Log(text) => info!("{text}"),
                MonitorMessage::RecordError(e) => warn!("could not save sample: {e}"),
                MonitorMessage::ConnectionLost(e) => {
                    error!("acquisition aborted: {e}");
                    lost = true;
                }
                MonitorMessage::Sample(s) => {
                    debug!("point ({:.2}, {:?})", s.elapsed_seconds, s.channel_values)
                }
                MonitorMessage::Acquiring(on) => debug!("acquiring: {on}"),
            }
        }
        match session.latest() {
            Some(sample) => println!(
                "Temperature: {}  (t={:.2}s, n={})",
                sample.display_value(),
                sample.elapsed_seconds,
                session.log().len()
            ),
            None => println!("Temperature: --- °C"),
        }
        if lost || !session.is_acquiring() || deadline.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
    }

    session.stop_acquisition()?;
    let count = session.snapshot().len();
    session.disconnect()?;
    match output {
        Some(out) => info!("{count} samples, data in {}", out.path.display()),
        None => info!("{count} samples (not saved)"),
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Command::Ports => {
            list_ports();
            Ok(())
        }
        Command::Monitor { port, baud } => monitor(&port, baud),
        Command::Acquire(args) => acquire(args),
        Command::Summary { file, comma } => summary(file, comma),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Read};

    struct Broken;
    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "detached"))
        }
    }

    #[test]
    fn enter_stops_but_closed_stdin_does_not() {
        assert!(wait_for_enter(Cursor::new("\n")));
        assert!(!wait_for_enter(io::empty()));
        assert!(!wait_for_enter(io::BufReader::new(Broken)));
    }
}
