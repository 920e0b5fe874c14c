// Sleep Tracker core library
// Movement monitoring, device calibration, chart sync and smart wake

pub mod calibration;
pub mod channel;
pub mod error;
pub mod observer;
pub mod sampler;
pub mod scheduler;
pub mod sensor;
pub mod series;
pub mod session;
pub mod storage;

// Re-export public types for library consumers
pub use calibration::{
    CalibrationStage, CalibrationThresholds, CalibrationWizard, DEFAULT_ALARM_SENSITIVITY,
};
pub use channel::{ChartSync, ChartUpdate, SessionMeta, SyncChannel};
pub use error::{SleepTrackerError, TrackerResult};
pub use observer::{alarm_status_line, ChartView, DimScreenTimer, DIM_SCREEN_AFTER_MS};
pub use sampler::{normalize, MotionSampler, SamplerConfig, SamplerHandle};
pub use scheduler::{
    next_alarm_or_none, AlarmDecision, AlarmRegistry, FixedAlarmRegistry, ScheduledAlarm,
    SmartAlarmScheduler,
};
pub use sensor::{MockMotionSource, MotionSource, RawReading, ScriptedMotionSource, GRAVITY_MS2};
pub use series::{MovementSample, MovementSeries};
pub use session::{
    SessionConfig, SessionMetadata, SessionStatus, SleepSession, DEFAULT_ALARM_WINDOW_MINUTES,
    DEFAULT_SAMPLE_INTERVAL_MS,
};
pub use storage::{
    FileSessionStore, FileSettingsStore, MemorySessionStore, MemorySettingsStore, SessionExport,
    SessionStore, SettingsStore, SETTINGS_VERSION,
};
