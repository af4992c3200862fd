// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::drivers::{LineFormat, MonitorError, TimestampSource};
use crate::recorder::{DataRecorder, Delimiter, RecordMode};
use crate::types::ConnectionMode;

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Output file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub mode: RecordMode,
    pub delimiter: Delimiter,
    /// Shift the first column so the first saved row reads `0.00` (on-stop saves only).
    pub normalize_start: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dados.txt"),
            mode: RecordMode::Continuous,
            delimiter: Delimiter::Tab,
            normalize_start: false,
        }
    }
}

impl OutputConfig {
    pub fn recorder(&self) -> DataRecorder {
        DataRecorder::new(self.path.clone(), self.delimiter)
    }
}

/// Everything one monitoring session needs. Stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub mode: ConnectionMode,
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub channels: usize,
    pub timestamp: TimestampSource,
    /// Written before every read, e.g. `"T2\n"` for probes that answer on request.
    pub poll_command: Option<String>,
    pub sample_interval_ms: u64,
    pub output: Option<OutputConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Hardware,
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 1000,
            channels: 1,
            timestamp: TimestampSource::Host,
            poll_command: None,
            sample_interval_ms: 1000,
            output: None,
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: MonitorConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        let fail = |msg: String| Err(MonitorError::Config(msg));
        if !(1..=2).contains(&self.channels) {
            return fail(format!("channels must be 1 or 2, got {}", self.channels));
        }
        if self.baud_rate == 0 {
            return fail("baud_rate must be greater than zero".into());
        }
        if !(1..=10_000).contains(&self.read_timeout_ms) {
            return fail(format!(
                "read_timeout_ms must be within 1..=10000, got {}",
                self.read_timeout_ms
            ));
        }
        // 与界面输入框一致: 0.1 ~ 10.0 秒
        if !(100..=10_000).contains(&self.sample_interval_ms) {
            return fail(format!(
                "sample_interval_ms must be within 100..=10000, got {}",
                self.sample_interval_ms
            ));
        }
        if let Some(output) = &self.output {
            if output.path.as_os_str().is_empty() {
                return fail("output path is empty".into());
            }
        }
        Ok(())
    }

    pub fn line_format(&self) -> LineFormat {
        match self.timestamp {
            TimestampSource::Host => LineFormat::host(self.channels),
            TimestampSource::Device => LineFormat::device_timestamped(self.channels),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Poll command with `\n` escapes expanded, so `T2\n` can be typed on a command line.
    pub fn poll_bytes(&self) -> Option<Vec<u8>> {
        self.poll_command
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(|c| c.replace("\\n", "\n").replace("\\r", "\r").into_bytes())
    }
}
