// src/drivers/mod.rs
// 探头数据通路: 串口行读取 -> 解析 -> 会话日志
pub mod buffer;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod source;
// 公开导出常用类型
pub use buffer::{Sample, SessionLog};
pub use error::{LineError, MonitorError};
pub use parser::{LineFormat, TimestampSource};
pub use pipeline::{PumpOutcome, SampleIngestor};
pub use source::{scan_ports, LineSource, SerialLineSource};
#[cfg(test)]
pub use source::ManualSource;
