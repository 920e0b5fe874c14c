use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::calibration::CalibrationThresholds;
use crate::channel::{SessionMeta, SyncChannel};
use crate::error::{SleepTrackerError, TrackerResult};
use crate::sampler::{MotionSampler, SamplerConfig, SamplerHandle};
use crate::sensor::MotionSource;
use crate::storage::{SessionExport, SessionStore};

pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_ALARM_WINDOW_MINUTES: i32 = 30;

/// Everything a monitoring session needs at start
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub interval: Duration,
    pub thresholds: CalibrationThresholds,
    pub use_alarm: bool,
    pub force_screen_on: bool,
    pub alarm_window_minutes: i32,
}

impl SessionConfig {
    pub fn new(thresholds: CalibrationThresholds) -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            thresholds,
            use_alarm: false,
            force_screen_on: false,
            alarm_window_minutes: DEFAULT_ALARM_WINDOW_MINUTES,
        }
    }
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Sampler running, series growing
    Monitoring,
    /// Stopped and saved, sampler torn down
    Stopped,
}

/// Session metadata persisted with the finished series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub start_time: String,
    pub status: SessionStatus,
    pub sample_count: u32,
    pub peak_magnitude: f64,
    pub thresholds: CalibrationThresholds,
}

/// One monitoring session. Owns the sampler for its whole life; a new
/// session fully supersedes a previous one rather than merging with it.
pub struct SleepSession {
    session_id: String,
    start_time: DateTime<Utc>,
    config: SessionConfig,
    status: SessionStatus,
    sampler: Option<SamplerHandle>,
    stopped_tx: watch::Sender<bool>,
}

impl SleepSession {
    /// Start monitoring. Fails with `SamplerUnavailable` when the motion
    /// source cannot deliver a reading, in which case no session exists.
    pub fn start(config: SessionConfig, source: Box<dyn MotionSource>) -> TrackerResult<Self> {
        config.thresholds.validate()?;

        let meta = SessionMeta {
            calibration_level: config.thresholds.alarm_trigger,
            use_alarm: config.use_alarm,
            force_screen_on: config.force_screen_on,
            alarm_window_minutes: config.alarm_window_minutes,
        };
        let sampler_config = SamplerConfig::new(
            config.interval,
            config.thresholds.min,
            config.thresholds.max,
        );
        let sampler = MotionSampler::start(source, sampler_config, meta)?;

        let start_time = Utc::now();
        let (stopped_tx, _) = watch::channel(false);
        Ok(Self {
            session_id: format!("sleep_{}", start_time.timestamp_millis()),
            start_time,
            config,
            status: SessionStatus::Monitoring,
            sampler: Some(sampler),
            stopped_tx,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Channel for observers to attach to while monitoring
    pub fn channel(&self) -> TrackerResult<SyncChannel> {
        self.sampler
            .as_ref()
            .map(|sampler| sampler.channel().clone())
            .ok_or_else(|| SleepTrackerError::InvalidState("session is stopped".to_string()))
    }

    /// Flips to true once the session has stopped, for collaborators
    /// that outlive any single observer
    pub fn stopped(&self) -> watch::Receiver<bool> {
        self.stopped_tx.subscribe()
    }

    /// Stop monitoring and persist the finished series. Idempotent: the
    /// first call waits for the sampler task to fully stop and returns
    /// the export, later calls return `None`.
    pub async fn stop_and_save<S: SessionStore>(
        &mut self,
        store: &S,
    ) -> TrackerResult<Option<SessionExport>> {
        let Some(sampler) = self.sampler.take() else {
            return Ok(None);
        };

        let series = sampler.stop().await?;
        self.status = SessionStatus::Stopped;
        let _ = self.stopped_tx.send(true);

        let export = SessionExport {
            metadata: SessionMetadata {
                session_id: self.session_id.clone(),
                start_time: self.start_time.to_rfc3339(),
                status: self.status,
                sample_count: series.len() as u32,
                peak_magnitude: series.peak_magnitude(),
                thresholds: self.config.thresholds,
            },
            series,
        };
        store.save(&export)?;
        Ok(Some(export))
    }
}
