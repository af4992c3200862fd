use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use log::info;
use serde::{Deserialize, Serialize};
use crate::drivers::{MonitorError, Sample};
/// 列分隔符
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    #[default]
    Tab,
    Comma,
}
impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Delimiter::Tab => '\t',
            Delimiter::Comma => ',',
        }
    }
}
/// 何时写文件: 每个样本追加一行, 或停止采集时一次性写出
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RecordMode {
    #[default]
    Continuous,
    OnStop,
}
/// Writes session samples to a text file, `elapsed<d>value1[<d>value2]`, two decimals.
#[derive(Clone, Debug)]
pub struct DataRecorder {
    path: PathBuf,
    delimiter: Delimiter,
}
impl DataRecorder {
    pub fn new(path: impl Into<PathBuf>, delimiter: Delimiter) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn header(&self, channels: usize) -> String {
        let d = self.delimiter.as_char();
        if channels <= 1 {
            format!("Tempo(s){d}Temperatura(°C)")
        } else {
            let cols: Vec<String> = (1..=channels)
                .map(|i| format!("Temperatura {i}(°C)"))
                .collect();
            format!("Tempo(s){d}{}", cols.join(&d.to_string()))
        }
    }
    pub fn format_row(&self, sample: &Sample, time_offset: f64) -> String {
        let d = self.delimiter.as_char();
        let mut row = format!("{:.2}", sample.elapsed_seconds - time_offset);
        for v in &sample.channel_values {
            row.push(d);
            row.push_str(&format!("{v:.2}"));
        }
        row
    }
    fn io_error(&self, source: std::io::Error) -> MonitorError {
        MonitorError::Record {
            path: self.path.display().to_string(),
            source,
        }
    }
    /// 连续模式开始前调用: 清空文件并写表头, 文件只保留本次会话
    pub fn prepare(&self, channels: usize) -> Result<(), MonitorError> {
        let mut file = File::create(&self.path).map_err(|e| self.io_error(e))?;
        writeln!(file, "{}", self.header(channels)).map_err(|e| self.io_error(e))
    }
    /// Opens in append mode for this one row and closes again.
    pub fn append_sample(&self, sample: &Sample) -> Result<(), MonitorError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        writeln!(file, "{}", self.format_row(sample, 0.0)).map_err(|e| self.io_error(e))
    }
    /// 停止时整体保存, 覆盖原文件. `normalize_start` 让第一行时间为 0.00
    pub fn save_session(
        &self,
        samples: &[Sample],
        channels: usize,
        normalize_start: bool,
    ) -> Result<usize, MonitorError> {
        let offset = match samples.first() {
            Some(first) if normalize_start => first.elapsed_seconds,
            _ => 0.0,
        };
        let file = File::create(&self.path).map_err(|e| self.io_error(e))?;
        let mut w = BufWriter::new(file);
        writeln!(w, "{}", self.header(channels)).map_err(|e| self.io_error(e))?;
        for sample in samples {
            writeln!(w, "{}", self.format_row(sample, offset)).map_err(|e| self.io_error(e))?;
        }
        w.flush().map_err(|e| self.io_error(e))?;
        info!("💾 saved {} samples to {}", samples.len(), self.path.display());
        Ok(samples.len())
    }
    /// 读回文件, 跳过表头和无法解析的行
    pub fn load(&self) -> Result<Vec<Sample>, MonitorError> {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let d = self.delimiter.as_char();
        let mut samples = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| self.io_error(e))?;
            let fields: Result<Vec<f64>, _> = line
                .split(d)
                .map(|f| f.trim().parse::<f64>())
                .collect();
            match fields {
                Ok(fields) if fields.len() >= 2 => {
                    samples.push(Sample::new(fields[0], fields[1..].to_vec()))
                }
                _ => continue,
            }
        }
        Ok(samples)
    }
}
