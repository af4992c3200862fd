use std::time::Instant;
use log::{debug, warn};
use crate::drivers::error::{LineError, MonitorError};
use crate::drivers::parser::{parse_raw, LineFormat, ParsedLine};
use crate::drivers::source::LineSource;
use crate::drivers::{Sample, SessionLog};
use crate::recorder::DataRecorder;
/// Session-relative time. Host mode starts counting at the first accepted sample.
#[derive(Debug, Default)]
pub struct SessionClock {
    started_at: Option<Instant>,
    last_device_us: Option<u64>,
}
impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }
    /// Elapsed seconds for a parsed line. Does not advance on rejection.
    pub fn stamp(&mut self, line: &ParsedLine) -> Result<f64, LineError> {
        match line.device_timestamp_us {
            Some(current_us) => {
                if let Some(previous_us) = self.last_device_us {
                    if current_us < previous_us {
                        return Err(LineError::TimestampRegression {
                            previous_us,
                            current_us,
                        });
                    }
                }
                self.last_device_us = Some(current_us);
                Ok(current_us as f64 / 1_000_000.0)
            }
            None => match self.started_at {
                Some(start) => Ok(start.elapsed().as_secs_f64()),
                None => {
                    self.started_at = Some(Instant::now());
                    Ok(0.0)
                }
            },
        }
    }
}
/// Result of one ingestion step.
#[derive(Debug)]
pub enum PumpOutcome {
    /// Read timed out or the line was blank.
    Idle,
    Rejected(LineError),
    Accepted {
        sample: Sample,
        /// Continuous logging failed for this sample; the sample is still in the log.
        record_error: Option<MonitorError>,
    },
}
/// Turns lines from a [`LineSource`] into samples in a [`SessionLog`].
pub struct SampleIngestor<S: LineSource> {
    source: S,
    format: LineFormat,
    clock: SessionClock,
    log: SessionLog,
    recorder: Option<DataRecorder>,
    poll_command: Option<Vec<u8>>,
}
impl<S: LineSource> SampleIngestor<S> {
    pub fn new(source: S, format: LineFormat, log: SessionLog) -> Self {
        Self {
            source,
            format,
            clock: SessionClock::new(),
            log,
            recorder: None,
            poll_command: None,
        }
    }
    /// Appends every accepted sample to `recorder` as it arrives.
    pub fn with_recorder(mut self, recorder: Option<DataRecorder>) -> Self {
        self.recorder = recorder;
        self
    }
    /// Bytes written before every read, for probes that answer on request.
    pub fn with_poll_command(mut self, command: Option<Vec<u8>>) -> Self {
        self.poll_command = command.filter(|c| !c.is_empty());
        self
    }
    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }
    pub fn into_source(self) -> S {
        self.source
    }
    /// One loop iteration without the trailing sleep.
    /// Only transport failures come back as `Err`; discarded lines are `Rejected`.
    pub fn pump_once(&mut self) -> Result<PumpOutcome, MonitorError> {
        if let Some(command) = &self.poll_command {
            self.source.write_all(command)?;
        }
        let Some(raw) = self.source.read_line()? else {
            return Ok(PumpOutcome::Idle);
        };
        let parsed = match parse_raw(&raw, self.format) {
            Ok(parsed) => parsed,
            Err(LineError::Empty) => return Ok(PumpOutcome::Idle),
            Err(e) => return Ok(PumpOutcome::Rejected(e)),
        };
        let elapsed_seconds = match self.clock.stamp(&parsed) {
            Ok(t) => t,
            Err(e) => return Ok(PumpOutcome::Rejected(e)),
        };
        let sample = Sample::new(elapsed_seconds, parsed.values);
        debug!("sample t={:.2}s {:?}", sample.elapsed_seconds, sample.channel_values);
        self.log.push(sample.clone());
        let record_error = match &self.recorder {
            Some(recorder) => recorder.append_sample(&sample).err(),
            None => None,
        };
        if let Some(e) = &record_error {
            warn!("continuous logging failed: {e}");
        }
        Ok(PumpOutcome::Accepted {
            sample,
            record_error,
        })
    }
}
