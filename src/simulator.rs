// src/simulator.rs
// 模拟探头: 没有硬件时也能跑完整的采集流程
use std::time::Instant;
use rand::Rng;
use crate::drivers::{LineFormat, LineSource, MonitorError, TimestampSource};
/// Fake probe that answers every read with one line in the configured format.
/// Channel 0 drifts around 25 °C, channel 1 around 30 °C.
pub struct SimulatedProbe {
    format: LineFormat,
    phase: f64,
    started_at: Instant,
    open: bool,
}
impl SimulatedProbe {
    pub fn new(format: LineFormat) -> Self {
        Self {
            format,
            phase: 0.0,
            started_at: Instant::now(),
            open: true,
        }
    }
    fn next_line(&mut self) -> String {
        let mut rng = rand::thread_rng();
        self.phase += 0.1;
        let mut tokens = Vec::with_capacity(self.format.expected_tokens());
        if self.format.timestamp == TimestampSource::Device {
            tokens.push(self.started_at.elapsed().as_micros().to_string());
        }
        for ch in 0..self.format.channels {
            let base = 25.0 + ch as f64 * 5.0;
            let value = base + (self.phase * (ch as f64 * 0.1 + 1.0)).sin() * 2.0
                + rng.gen_range(-0.05..0.05);
            tokens.push(format!("{value:.2}"));
        }
        let sep = match self.format.timestamp {
            TimestampSource::Device => ",",
            TimestampSource::Host => " ",
        };
        tokens.join(sep)
    }
}
impl LineSource for SimulatedProbe {
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, MonitorError> {
        if !self.open {
            return Err(MonitorError::ConnectionLost("simulator closed".into()));
        }
        Ok(Some(self.next_line().into_bytes()))
    }
    // 轮询命令在模拟模式下直接忽略
    fn write_all(&mut self, _bytes: &[u8]) -> Result<(), MonitorError> {
        Ok(())
    }
    fn is_open(&self) -> bool {
        self.open
    }
}
