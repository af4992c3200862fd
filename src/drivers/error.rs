use thiserror::Error;
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("file i/o failed on {path}: {source}")]
    Record {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
}
/// Reasons a single received line is discarded. None of these are fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LineError {
    #[error("empty line")]
    Empty,
    #[error("line is not valid UTF-8 (raw bytes: {hex})")]
    Decode { hex: String },
    #[error("expected {expected} tokens, got {actual} in {line:?}")]
    TokenCount {
        expected: usize,
        actual: usize,
        line: String,
    },
    #[error("token {token:?} is not a finite number")]
    Number { token: String },
    #[error("timestamp {token:?} is not an unsigned microsecond counter")]
    Timestamp { token: String },
    #[error("device timestamp went backwards: {previous_us} -> {current_us}")]
    TimestampRegression { previous_us: u64, current_us: u64 },
}
