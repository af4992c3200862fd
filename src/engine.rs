// src/engine.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{error, info, warn};
use crate::drivers::{LineSource, PumpOutcome, SampleIngestor};
use crate::types::MonitorMessage;

/// 启动后台采集线程.
///
/// `acquiring` 每轮只检查一次, 所以停止延迟最多为一次读超时加一次 `interval`.
/// 线程结束时把 ingestor (连同串口) 交还给调用方.
pub fn spawn_thread<S: LineSource + 'static>(
    mut ingestor: SampleIngestor<S>,
    acquiring: Arc<AtomicBool>,
    tx: Sender<MonitorMessage>,
    interval: Duration,
) -> JoinHandle<SampleIngestor<S>> {
    thread::spawn(move || {
        tx.send(MonitorMessage::Acquiring(true)).ok();
        tx.send(MonitorMessage::Log("🌊 Acquisition Started".to_owned())).ok();
        info!("acquisition loop running, interval {:?}", interval);
        let mut rejected = 0usize;

        while acquiring.load(Ordering::SeqCst) {
            match ingestor.pump_once() {
                Ok(PumpOutcome::Accepted {
                    sample,
                    record_error,
                }) => {
                    // 前台按固定节拍刷新, 这里只通知
                    tx.send(MonitorMessage::Sample(sample)).ok();
                    if let Some(e) = record_error {
                        tx.send(MonitorMessage::RecordError(e.to_string())).ok();
                    }
                }
                Ok(PumpOutcome::Rejected(e)) => {
                    rejected += 1;
                    warn!("discarding line: {e}");
                }
                Ok(PumpOutcome::Idle) => {}
                Err(e) => {
                    // 连接断开: 报告一次后退出, 不自动重连
                    error!("acquisition stopped: {e}");
                    acquiring.store(false, Ordering::SeqCst);
                    tx.send(MonitorMessage::ConnectionLost(e.to_string())).ok();
                    break;
                }
            }
            thread::sleep(interval);
        }

        tx.send(MonitorMessage::Acquiring(false)).ok();
        tx.send(MonitorMessage::Log(format!(
            "🛑 Acquisition Stopped ({rejected} lines discarded)"
        )))
        .ok();
        ingestor
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{LineFormat, ManualSource, SessionLog};
    use std::sync::mpsc::channel;

    #[test]
    fn loop_ingests_until_flag_cleared() {
        let log = SessionLog::new();
        let ingestor = SampleIngestor::new(
            ManualSource::new(["20.0", "abc", "", "21.0"]),
            LineFormat::host(1),
            log.clone(),
        );
        let flag = Arc::new(AtomicBool::new(true));
        let (tx, rx) = channel();
        let handle = spawn_thread(ingestor, flag.clone(), tx, Duration::from_millis(1));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while log.len() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        flag.store(false, Ordering::SeqCst);
        let ingestor = handle.join().unwrap();
        assert!(ingestor.source().is_open());
        let values: Vec<f64> = log.snapshot().iter().map(|s| s.channel_values[0]).collect();
        assert_eq!(values, vec![20.0, 21.0]);
        let messages: Vec<MonitorMessage> = rx.try_iter().collect();
        let samples = messages
            .iter()
            .filter(|m| matches!(m, MonitorMessage::Sample(_)))
            .count();
        assert_eq!(samples, 2);
        assert!(matches!(messages.last(), Some(MonitorMessage::Log(_))));
    }

    #[test]
    fn connection_loss_is_reported_once_and_ends_loop() {
        let log = SessionLog::new();
        let ingestor = SampleIngestor::new(
            ManualSource::new(["19.5"]).disconnect_when_drained(),
            LineFormat::host(1),
            log.clone(),
        );
        let flag = Arc::new(AtomicBool::new(true));
        let (tx, rx) = channel();
        let handle = spawn_thread(ingestor, flag.clone(), tx, Duration::from_millis(1));
        let ingestor = handle.join().unwrap();
        assert!(!flag.load(Ordering::SeqCst));
        assert!(!ingestor.source().is_open());
        assert_eq!(log.len(), 1);
        let lost = rx
            .try_iter()
            .filter(|m| matches!(m, MonitorMessage::ConnectionLost(_)))
            .count();
        assert_eq!(lost, 1);
    }
}
