use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
/// One accepted reading.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub elapsed_seconds: f64,
    pub channel_values: Vec<f64>,
}
impl Sample {
    pub fn new(elapsed_seconds: f64, channel_values: Vec<f64>) -> Self {
        Self {
            elapsed_seconds,
            channel_values,
        }
    }
    /// Label text for the status display, e.g. `23.45 °C` or `23.45 / 67.89 °C`.
    pub fn display_value(&self) -> String {
        let joined = self
            .channel_values
            .iter()
            .map(|v| format!("{v:.2}"))
            .collect::<Vec<_>>()
            .join(" / ");
        format!("{joined} °C")
    }
}
/// Ordered sample log for one session.
///
/// Cloning shares the same storage: the acquisition thread appends while the
/// foreground takes snapshots, both through the mutex.
#[derive(Clone, Default)]
pub struct SessionLog {
    samples: Arc<Mutex<Vec<Sample>>>,
}
impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }
    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn push(&self, sample: Sample) {
        self.lock().push(sample);
    }
    pub fn clear(&self) {
        self.lock().clear();
    }
    pub fn len(&self) -> usize {
        self.lock().len()
    }
    pub fn latest(&self) -> Option<Sample> {
        self.lock().last().cloned()
    }
    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().clone()
    }
}
