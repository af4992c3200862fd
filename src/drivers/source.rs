use std::io::{self, Read, Write};
use std::time::Duration;
use log::debug;
use crate::drivers::MonitorError;
/// Lines longer than this are flushed as-is so a stream without newlines
/// cannot hold the reader forever.
pub const MAX_LINE_BYTES: usize = 256;
/// Trait representing an open, line-oriented connection to a probe.
pub trait LineSource: Send {
    /// Blocks for at most one read timeout. `Ok(None)` means nothing complete arrived.
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, MonitorError>;
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), MonitorError>;
    fn is_open(&self) -> bool;
}
impl<S: LineSource + ?Sized> LineSource for Box<S> {
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, MonitorError> {
        (**self).read_line()
    }
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), MonitorError> {
        (**self).write_all(bytes)
    }
    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
/// Splits a byte stream with a read timeout into `\n`-terminated lines.
/// Partial data survives a timeout and is completed on the next call.
pub struct LineReader<T: Read + Write + Send> {
    stream: T,
    pending: Vec<u8>,
    open: bool,
}
pub type SerialLineSource = LineReader<Box<dyn serialport::SerialPort>>;
impl<T: Read + Write + Send> LineReader<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            pending: Vec::with_capacity(MAX_LINE_BYTES),
            open: true,
        }
    }
    fn take_line(&mut self) -> Option<Vec<u8>> {
        if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Some(line);
        }
        if self.pending.len() >= MAX_LINE_BYTES {
            debug!("flushing {} bytes without newline", self.pending.len());
            return Some(std::mem::take(&mut self.pending));
        }
        None
    }
    fn fail(&mut self, err: io::Error) -> MonitorError {
        self.open = false;
        MonitorError::ConnectionLost(err.to_string())
    }
}
impl SerialLineSource {
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, MonitorError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|source| MonitorError::Open {
                port: port_name.to_string(),
                source,
            })?;
        Ok(Self::new(port))
    }
}
impl<T: Read + Write + Send> LineSource for LineReader<T> {
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, MonitorError> {
        if !self.open {
            return Err(MonitorError::ConnectionLost("port is closed".into()));
        }
        let mut chunk = [0u8; 64];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), MonitorError> {
        if !self.open {
            return Err(MonitorError::ConnectionLost("port is closed".into()));
        }
        let result = self.stream.write_all(bytes).and_then(|_| self.stream.flush());
        result.map_err(|e| self.fail(e))
    }
    fn is_open(&self) -> bool {
        self.open
    }
}
/// One entry of the port list, e.g. `COM7: Arduino LLC Arduino Uno`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub port_name: String,
    pub display: String,
}
impl std::fmt::Display for PortEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display)
    }
}
/// Lists the serial ports the OS reports. Enumeration failures yield an empty list.
pub fn scan_ports() -> Vec<PortEntry> {
    let mut out: Vec<PortEntry> = match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| {
                let display = match p.port_type {
                    serialport::SerialPortType::UsbPort(info) => {
                        let parts: Vec<String> =
                            info.manufacturer.into_iter().chain(info.product).collect();
                        if parts.is_empty() {
                            format!("{}: USB Serial", p.port_name)
                        } else {
                            format!("{}: {}", p.port_name, parts.join(" "))
                        }
                    }
                    serialport::SerialPortType::BluetoothPort => {
                        format!("{}: Bluetooth", p.port_name)
                    }
                    serialport::SerialPortType::PciPort => format!("{}: PCI", p.port_name),
                    serialport::SerialPortType::Unknown => p.port_name.clone(),
                };
                PortEntry {
                    port_name: p.port_name,
                    display,
                }
            })
            .collect(),
        Err(e) => {
            debug!("port enumeration failed: {e}");
            Vec::new()
        }
    };
    out.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    out
}
/// In-memory source useful for tests and deterministic playback.
/// Each `read_line` pops one entry; `None` entries behave like a read timeout.
#[cfg(test)]
pub struct ManualSource {
    queue: std::collections::VecDeque<Option<Vec<u8>>>,
    fail_when_drained: bool,
    open: bool,
    pub written: Vec<u8>,
}
#[cfg(test)]
impl ManualSource {
    pub fn new<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        Self {
            queue: lines
                .into_iter()
                .map(|l| Some(l.as_ref().to_vec()))
                .collect(),
            fail_when_drained: false,
            open: true,
            written: Vec::new(),
        }
    }
    pub fn push_timeout(&mut self) {
        self.queue.push_back(None);
    }
    /// Makes the source report a lost connection once every queued line is consumed.
    pub fn disconnect_when_drained(mut self) -> Self {
        self.fail_when_drained = true;
        self
    }
}
#[cfg(test)]
impl LineSource for ManualSource {
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, MonitorError> {
        if !self.open {
            return Err(MonitorError::ConnectionLost("port is closed".into()));
        }
        match self.queue.pop_front() {
            Some(entry) => Ok(entry),
            None if self.fail_when_drained => {
                self.open = false;
                Err(MonitorError::ConnectionLost("device unplugged".into()))
            }
            None => Ok(None),
        }
    }
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), MonitorError> {
        if !self.open {
            return Err(MonitorError::ConnectionLost("port is closed".into()));
        }
        self.written.extend_from_slice(bytes);
        Ok(())
    }
    fn is_open(&self) -> bool {
        self.open
    }
}
