// src/types.rs
use serde::{Deserialize, Serialize};
use crate::drivers::Sample;

// 连接模式
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Simulation,
    #[default]
    Hardware,
}

// 采集线程发给前台的消息
#[derive(Clone, Debug)]
pub enum MonitorMessage {
    Log(String),
    Acquiring(bool),     // 采集状态
    Sample(Sample),      // 新样本 (图表/标签刷新用)
    RecordError(String), // 连续写文件失败, 采集继续
    ConnectionLost(String),
}
