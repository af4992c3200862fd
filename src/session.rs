// src/session.rs
// 一次 连接 -> 采集 -> 停止 的完整会话, 取代全局变量
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use crate::config::MonitorConfig;
use crate::drivers::{LineSource, Sample, SampleIngestor, SerialLineSource, SessionLog};
use crate::engine;
use crate::recorder::RecordMode;
use crate::simulator::SimulatedProbe;
use crate::types::{ConnectionMode, MonitorMessage};

type Connection = Box<dyn LineSource>;

struct Acquisition {
    acquiring: Arc<AtomicBool>,
    handle: JoinHandle<SampleIngestor<Connection>>,
}

/// Owns the connection, the acquisition flag and the sample log.
///
/// While acquiring, the connection lives inside the background thread and is
/// handed back when the thread is joined.
pub struct Session {
    config: MonitorConfig,
    connection: Option<Connection>,
    acquisition: Option<Acquisition>,
    log: SessionLog,
    tx: Sender<MonitorMessage>,
    rx: Receiver<MonitorMessage>,
}

impl Session {
    pub fn new(config: MonitorConfig) -> Self {
        let (tx, rx) = channel();
        Self {
            config,
            connection: None,
            acquisition: None,
            log: SessionLog::new(),
            tx,
            rx,
        }
    }

    /// A loop that exited on connection loss no longer counts, even before it is reaped.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some() || self.is_acquiring()
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquisition
            .as_ref()
            .map(|a| a.acquiring.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            bail!("already connected");
        }
        let source: Connection = match self.config.mode {
            ConnectionMode::Simulation => {
                Box::new(SimulatedProbe::new(self.config.line_format()))
            }
            ConnectionMode::Hardware => {
                let port = self
                    .config
                    .port
                    .as_deref()
                    .ok_or_else(|| anyhow!("no serial port selected"))?;
                let source =
                    SerialLineSource::open(port, self.config.baud_rate, self.config.read_timeout())
                        .with_context(|| format!("connecting to {port}"))?;
                Box::new(source)
            }
        };
        info!("✅ connected ({:?})", self.config.mode);
        self.connection = Some(source);
        Ok(())
    }

    /// Attaches an already-open source instead of opening one from the config.
    pub fn connect_with(&mut self, source: Connection) -> Result<()> {
        if self.is_connected() {
            bail!("already connected");
        }
        self.connection = Some(source);
        Ok(())
    }

    /// Stops a running acquisition first, then closes the port.
    pub fn disconnect(&mut self) -> Result<()> {
        let stopped = self.stop_acquisition();
        if self.connection.take().is_some() {
            info!("disconnected");
        }
        stopped
    }

    pub fn start_acquisition(&mut self) -> Result<()> {
        self.reap_finished();
        if self.acquisition.is_some() {
            bail!("acquisition already running");
        }
        let source = self
            .connection
            .take()
            .ok_or_else(|| anyhow!("not connected"))?;
        self.log.clear();

        let mut recorder = None;
        if let Some(output) = &self.config.output {
            if output.mode == RecordMode::Continuous {
                let continuous = output.recorder();
                if let Err(e) = continuous.prepare(self.config.channels) {
                    warn!("could not write header: {e}");
                    self.tx.send(MonitorMessage::RecordError(e.to_string())).ok();
                }
                recorder = Some(continuous);
            }
        }

        let ingestor = SampleIngestor::new(source, self.config.line_format(), self.log.clone())
            .with_recorder(recorder)
            .with_poll_command(self.config.poll_bytes());
        let acquiring = Arc::new(AtomicBool::new(true));
        let handle = engine::spawn_thread(
            ingestor,
            acquiring.clone(),
            self.tx.clone(),
            self.config.sample_interval(),
        );
        self.acquisition = Some(Acquisition { acquiring, handle });
        Ok(())
    }

    /// Clears the flag and waits for the loop to exit. Calling it again is a no-op.
    /// In on-stop mode the log is written to the output file here, once.
    pub fn stop_acquisition(&mut self) -> Result<()> {
        let Some(acquisition) = self.acquisition.take() else {
            return Ok(());
        };
        acquisition.acquiring.store(false, Ordering::SeqCst);
        let ingestor = acquisition
            .handle
            .join()
            .map_err(|_| anyhow!("acquisition thread panicked"))?;
        let source = ingestor.into_source();
        if source.is_open() {
            self.connection = Some(source);
        } else {
            warn!("connection was lost during acquisition");
        }
        info!("acquisition stopped with {} samples", self.log.len());

        if let Some(output) = &self.config.output {
            if output.mode == RecordMode::OnStop {
                let samples = self.log.snapshot();
                output
                    .recorder()
                    .save_session(&samples, self.config.channels, output.normalize_start)
                    .context("saving session")?;
            }
        }
        Ok(())
    }

    /// Drains pending messages. A lost connection also reaps the background thread.
    pub fn poll_messages(&mut self) -> Vec<MonitorMessage> {
        let messages: Vec<MonitorMessage> = self.rx.try_iter().collect();
        if messages
            .iter()
            .any(|m| matches!(m, MonitorMessage::ConnectionLost(_)))
        {
            self.reap_finished();
        }
        messages
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.log.snapshot()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.log.latest()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    fn reap_finished(&mut self) {
        let finished = self
            .acquisition
            .as_ref()
            .map(|a| !a.acquiring.load(Ordering::SeqCst))
            .unwrap_or(false);
        if finished {
            if let Err(e) = self.stop_acquisition() {
                warn!("finishing acquisition: {e:#}");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("closing session: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use crate::drivers::ManualSource;
    use crate::recorder::{DataRecorder, Delimiter};
    use std::thread;
    use std::time::{Duration, Instant};

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            sample_interval_ms: 1,
            ..Default::default()
        }
    }

    fn wait_for(session: &Session, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.log().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn start_requires_connection() {
        let mut session = Session::new(fast_config());
        assert!(session.start_acquisition().is_err());
        assert!(!session.is_acquiring());
    }

    #[test]
    fn hardware_mode_without_port_fails_and_stays_disconnected() {
        let mut session = Session::new(MonitorConfig::default());
        assert!(session.connect().is_err());
        assert!(!session.is_connected());
    }

    #[test]
    fn acquire_stop_returns_connection_and_keeps_log() {
        let mut session = Session::new(fast_config());
        session
            .connect_with(Box::new(ManualSource::new(["21.0", "junk", "21.5"])))
            .unwrap();
        session.start_acquisition().unwrap();
        assert!(session.is_acquiring());
        wait_for(&session, 2);
        session.stop_acquisition().unwrap();
        assert!(!session.is_acquiring());
        assert!(session.is_connected());
        assert_eq!(session.latest().map(|s| s.channel_values), Some(vec![21.5]));
        assert_eq!(session.snapshot().len(), 2);
        let messages = session.poll_messages();
        assert!(messages
            .iter()
            .any(|m| matches!(m, MonitorMessage::Acquiring(false))));
    }

    #[test]
    fn restart_clears_the_log() {
        let mut session = Session::new(fast_config());
        session
            .connect_with(Box::new(ManualSource::new(["1.0", "2.0"])))
            .unwrap();
        session.start_acquisition().unwrap();
        wait_for(&session, 2);
        session.stop_acquisition().unwrap();
        assert_eq!(session.snapshot().len(), 2);
        session.start_acquisition().unwrap();
        session.stop_acquisition().unwrap();
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn stop_twice_writes_the_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.txt");
        let mut config = fast_config();
        config.output = Some(OutputConfig {
            path: path.clone(),
            mode: RecordMode::OnStop,
            delimiter: Delimiter::Tab,
            normalize_start: true,
        });
        let mut session = Session::new(config);
        session
            .connect_with(Box::new(ManualSource::new(["20.0", "20.5", "21.0"])))
            .unwrap();
        session.start_acquisition().unwrap();
        wait_for(&session, 3);
        session.stop_acquisition().unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        session.stop_acquisition().unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
        let rows: Vec<&str> = first.lines().collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], "Tempo(s)\tTemperatura(°C)");
        assert!(rows[1].starts_with("0.00\t20.00"));
    }

    #[test]
    fn continuous_mode_appends_each_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.txt");
        let mut config = fast_config();
        config.output = Some(OutputConfig {
            path: path.clone(),
            ..Default::default()
        });
        let mut session = Session::new(config);
        session
            .connect_with(Box::new(ManualSource::new(["30.0", "30.25"])))
            .unwrap();
        session.start_acquisition().unwrap();
        wait_for(&session, 2);
        session.stop_acquisition().unwrap();
        session.stop_acquisition().unwrap();
        let loaded = DataRecorder::new(&path, Delimiter::Tab).load().unwrap();
        let values: Vec<f64> = loaded.iter().map(|s| s.channel_values[0]).collect();
        assert_eq!(values, vec![30.0, 30.25]);
        let logged: Vec<f64> = session
            .snapshot()
            .iter()
            .map(|s| (s.elapsed_seconds * 100.0).round() / 100.0)
            .collect();
        let written: Vec<f64> = loaded.iter().map(|s| s.elapsed_seconds).collect();
        assert_eq!(logged, written);
    }

    #[test]
    fn continuous_restart_leaves_only_the_current_run_in_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.txt");
        let mut config = fast_config();
        config.output = Some(OutputConfig {
            path: path.clone(),
            ..Default::default()
        });
        let mut session = Session::new(config);
        session
            .connect_with(Box::new(ManualSource::new(["30.0", "31.0"])))
            .unwrap();
        session.start_acquisition().unwrap();
        wait_for(&session, 2);
        session.stop_acquisition().unwrap();
        session.disconnect().unwrap();

        session
            .connect_with(Box::new(ManualSource::new(["40.0", "41.0"])))
            .unwrap();
        session.start_acquisition().unwrap();
        wait_for(&session, 2);
        session.stop_acquisition().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next(), Some("Tempo(s)\tTemperatura(°C)"));
        let loaded = DataRecorder::new(&path, Delimiter::Tab).load().unwrap();
        let snapshot = session.snapshot();
        assert_eq!(loaded.len(), snapshot.len());
        let file_values: Vec<f64> = loaded.iter().map(|s| s.channel_values[0]).collect();
        assert_eq!(file_values, vec![40.0, 41.0]);
        let logged_values: Vec<f64> = snapshot.iter().map(|s| s.channel_values[0]).collect();
        assert_eq!(file_values, logged_values);
    }

    #[test]
    fn empty_on_stop_save_uses_configured_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        let mut config = fast_config();
        config.channels = 2;
        config.output = Some(OutputConfig {
            path: path.clone(),
            mode: RecordMode::OnStop,
            ..Default::default()
        });
        let mut session = Session::new(config);
        session
            .connect_with(Box::new(ManualSource::new(Vec::<String>::new())))
            .unwrap();
        session.start_acquisition().unwrap();
        session.stop_acquisition().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Tempo(s)\tTemperatura 1(°C)\tTemperatura 2(°C)\n");
    }

    #[test]
    fn lost_connection_reads_as_disconnected_before_messages_are_polled() {
        let mut session = Session::new(fast_config());
        session
            .connect_with(Box::new(ManualSource::new(["22.0"]).disconnect_when_drained()))
            .unwrap();
        session.start_acquisition().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.is_acquiring() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!session.is_acquiring());
        assert!(!session.is_connected());
    }

    #[test]
    fn connection_loss_is_reported_and_leaves_session_disconnected() {
        let mut session = Session::new(fast_config());
        session
            .connect_with(Box::new(
                ManualSource::new(["22.0"]).disconnect_when_drained(),
            ))
            .unwrap();
        session.start_acquisition().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut lost = false;
        while !lost && Instant::now() < deadline {
            lost = session
                .poll_messages()
                .iter()
                .any(|m| matches!(m, MonitorMessage::ConnectionLost(_)));
            thread::sleep(Duration::from_millis(5));
        }
        assert!(lost);
        assert!(!session.is_acquiring());
        assert!(!session.is_connected());
        assert_eq!(session.snapshot().len(), 1);
        assert!(session.start_acquisition().is_err());
    }

    #[test]
    fn disconnect_stops_acquisition_first() {
        let mut session = Session::new(fast_config());
        session
            .connect_with(Box::new(ManualSource::new(["18.0"])))
            .unwrap();
        session.start_acquisition().unwrap();
        session.disconnect().unwrap();
        assert!(!session.is_acquiring());
        assert!(!session.is_connected());
        session.disconnect().unwrap();
    }

    #[test]
    fn simulation_mode_produces_samples() {
        let config = MonitorConfig {
            mode: ConnectionMode::Simulation,
            channels: 2,
            sample_interval_ms: 1,
            ..Default::default()
        };
        let mut session = Session::new(config);
        session.connect().unwrap();
        session.start_acquisition().unwrap();
        wait_for(&session, 3);
        session.stop_acquisition().unwrap();
        let snap = session.snapshot();
        assert!(snap.len() >= 3);
        assert!(snap.iter().all(|s| s.channel_values.len() == 2));
        assert_eq!(snap[0].elapsed_seconds, 0.0);
    }
}
