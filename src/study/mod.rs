//! Study recording.
//!
//! A [`Study`] names a set of devices to log. A [`StudySession`] drives one
//! study through `Ready -> Recording -> Done`, receives every reading from
//! the [`DeviceManager`](crate::manager::DeviceManager) as a
//! [`ReadingSink`], keeps one row out of every `tick_threshold` readings per
//! member device and appends it to the study's CSV file.
//!
//! Several sessions can record at once, each with its own membership and
//! threshold; they never share counters or files.

pub mod storage;

use crate::device::ConnectionLost;
use crate::manager::ReadingSink;
use crate::reading::GaugeReading;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use storage::{CsvFileStorage, MemoryStorage, RowWriter, StudyError, StudyStorage};

/// Header row of every study file.
pub const CSV_HEADER: [&str; 3] = ["timestamp_iso", "device_id", "pressure_torr"];

/// Rows written between flushes unless configured otherwise.
pub const DEFAULT_FLUSH_EVERY: u32 = 10;

/// Study identifier. UUID v7, so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudyId(Uuid);

impl StudyId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for StudyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StudyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for StudyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyState {
    Ready,
    Recording,
    Done,
}

impl std::fmt::Display for StudyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StudyState::Ready => write!(f, "ready"),
            StudyState::Recording => write!(f, "recording"),
            StudyState::Done => write!(f, "done"),
        }
    }
}

/// The persistent record of a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub study_id: StudyId,
    pub title: String,
    pub device_ids: BTreeSet<String>,
    pub state: StudyState,
    pub csv_file_path: Option<PathBuf>,
    pub recorded_sample_count: u64,
}

impl Study {
    pub fn new<I, S>(title: impl Into<String>, device_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            study_id: StudyId::new(),
            title: title.into(),
            device_ids: device_ids.into_iter().map(Into::into).collect(),
            state: StudyState::Ready,
            csv_file_path: None,
            recorded_sample_count: 0,
        }
    }

    pub fn csv_file_name(&self) -> String {
        format!("study_{}.csv", self.study_id)
    }

    pub fn includes(&self, device_id: &str) -> bool {
        self.device_ids.contains(device_id)
    }
}

/// Readings per written row for a logging interval on top of a poll
/// interval: `round(log / poll)`, at least 1.
pub fn tick_threshold(log_interval: Duration, poll_interval: Duration) -> u32 {
    if poll_interval.is_zero() {
        return 1;
    }
    let ratio = (log_interval.as_secs_f64() / poll_interval.as_secs_f64()).round();
    if ratio >= u32::MAX as f64 {
        u32::MAX
    } else {
        (ratio as u32).max(1)
    }
}

/// Snapshot of a session for callers that surface recording health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: StudyState,
    pub recorded_samples: u64,
    pub write_failures: u64,
    pub last_error: Option<String>,
}

struct SessionInner {
    study: Study,
    counters: HashMap<String, u32>,
    writer: Option<Box<dyn RowWriter>>,
    rows_since_flush: u32,
    write_failures: u64,
    last_error: Option<String>,
}

impl SessionInner {
    fn note_failure(&mut self, err: &StudyError) {
        self.write_failures += 1;
        self.last_error = Some(err.to_string());
        error!(study = %self.study.study_id, error = %err, "study write failed");
    }

    fn write_row(&mut self, reading: &GaugeReading, flush_every: u32) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let timestamp = reading.timestamp_iso();
        let pressure = reading.pressure_torr().to_string();
        if let Err(e) = writer.write_record(&[
            timestamp.as_str(),
            reading.device_id.as_str(),
            pressure.as_str(),
        ]) {
            self.note_failure(&e);
            return;
        }
        // Accepted rows reach the file on a later flush or close.
        self.study.recorded_sample_count += 1;
        self.rows_since_flush += 1;
        if self.rows_since_flush >= flush_every {
            self.rows_since_flush = 0;
            if let Err(e) = writer.flush() {
                self.note_failure(&e);
            }
        }
    }
}

/// Records one study. Safe to feed from several polling tasks at once.
pub struct StudySession {
    inner: Mutex<SessionInner>,
    storage: Arc<dyn StudyStorage>,
    tick_threshold: u32,
    flush_every: u32,
}

impl StudySession {
    /// New `Ready` study over `device_ids`.
    pub fn new<I, S>(title: impl Into<String>, device_ids: I, tick_threshold: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_study(Study::new(title, device_ids), tick_threshold)
    }

    /// Rebuild a session from a stored record.
    ///
    /// A record saved while `Recording` comes back as `Done`: restarting
    /// would truncate its file.
    pub fn from_study(mut study: Study, tick_threshold: u32) -> Self {
        if study.state == StudyState::Recording {
            warn!(study = %study.study_id, "interrupted recording restored as done");
            study.state = StudyState::Done;
        }
        Self {
            inner: Mutex::new(SessionInner {
                study,
                counters: HashMap::new(),
                writer: None,
                rows_since_flush: 0,
                write_failures: 0,
                last_error: None,
            }),
            storage: Arc::new(CsvFileStorage),
            tick_threshold: tick_threshold.max(1),
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StudyStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_flush_every(mut self, rows: u32) -> Self {
        self.flush_every = rows.max(1);
        self
    }

    pub fn study(&self) -> Study {
        self.inner.lock().study.clone()
    }

    pub fn study_id(&self) -> StudyId {
        self.inner.lock().study.study_id
    }

    pub fn state(&self) -> StudyState {
        self.inner.lock().study.state
    }

    pub fn tick_threshold(&self) -> u32 {
        self.tick_threshold
    }

    pub fn csv_file_path(&self) -> Option<PathBuf> {
        self.inner.lock().study.csv_file_path.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.inner.lock();
        SessionStatus {
            state: inner.study.state,
            recorded_samples: inner.study.recorded_sample_count,
            write_failures: inner.write_failures,
            last_error: inner.last_error.clone(),
        }
    }

    /// Open `<log_directory>/study_<id>.csv` and start recording.
    ///
    /// Returns `Ok(false)` without doing anything unless the study is
    /// `Ready`. If the file cannot be opened the study stays `Ready`.
    pub fn start(&self, log_directory: &Path) -> Result<bool, StudyError> {
        let mut inner = self.inner.lock();
        if inner.study.state != StudyState::Ready {
            debug!(study = %inner.study.study_id, state = %inner.study.state, "start ignored");
            return Ok(false);
        }

        let path = log_directory.join(inner.study.csv_file_name());
        let mut writer = self.storage.open_for_write(&path)?;
        writer.write_record(&CSV_HEADER)?;
        writer.flush()?;

        inner.counters.clear();
        inner.rows_since_flush = 0;
        inner.writer = Some(writer);
        inner.study.csv_file_path = Some(path.clone());
        inner.study.state = StudyState::Recording;
        info!(
            study = %inner.study.study_id,
            title = %inner.study.title,
            devices = inner.study.device_ids.len(),
            tick_threshold = self.tick_threshold,
            path = %path.display(),
            "recording started"
        );
        Ok(true)
    }

    /// Flush, close and move to `Done`.
    ///
    /// Returns `Ok(false)` unless the study is `Recording`. A close error is
    /// returned, but the study is `Done` either way.
    pub fn stop(&self) -> Result<bool, StudyError> {
        let mut inner = self.inner.lock();
        if inner.study.state != StudyState::Recording {
            debug!(study = %inner.study.study_id, state = %inner.study.state, "stop ignored");
            return Ok(false);
        }

        inner.study.state = StudyState::Done;
        let closed = match inner.writer.take() {
            Some(writer) => writer.close(),
            None => Ok(()),
        };
        info!(
            study = %inner.study.study_id,
            samples = inner.study.recorded_sample_count,
            "recording stopped"
        );
        if let Err(e) = closed {
            inner.note_failure(&e);
            return Err(e);
        }
        Ok(true)
    }

    /// Count `reading` towards its device and write a row when the count
    /// reaches the threshold. Never fails; write errors land in
    /// [`status`](Self::status).
    pub fn record(&self, reading: &GaugeReading) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.study.state != StudyState::Recording || !inner.study.includes(&reading.device_id) {
            return;
        }

        let counter = inner
            .counters
            .entry(reading.device_id.clone())
            .or_insert(0);
        *counter += 1;
        if *counter < self.tick_threshold {
            return;
        }
        *counter = 0;
        inner.write_row(reading, self.flush_every);
    }
}

impl ReadingSink for StudySession {
    fn on_reading(&self, reading: &GaugeReading) {
        self.record(reading);
    }

    fn on_connection_lost(&self, event: &ConnectionLost) {
        let inner = self.inner.lock();
        if inner.study.state == StudyState::Recording && inner.study.includes(&event.device_id) {
            warn!(
                study = %inner.study.study_id,
                device = %event.device_id,
                reason = %event.reason,
                "recorded device lost"
            );
        }
    }
}

impl Drop for StudySession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(writer) = inner.writer.as_mut() {
            if let Err(e) = writer.flush() {
                error!(study = %inner.study.study_id, error = %e, "final flush failed");
            }
        }
    }
}

impl std::fmt::Debug for StudySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StudySession")
            .field("study", &inner.study)
            .field("tick_threshold", &self.tick_threshold)
            .field("flush_every", &self.flush_every)
            .finish()
    }
}
