use thiserror::Error;

/// Sleep tracker error types
#[derive(Error, Debug)]
pub enum SleepTrackerError {
    #[error("Calibration trial failed: {0}")]
    CalibrationFailed(String),

    #[error("Motion source unavailable: {0}")]
    SamplerUnavailable(String),

    #[error("Alarm registry query failed: {0}")]
    AlarmQueryFailed(String),

    #[error("Invalid thresholds: {0}")]
    InvalidThresholds(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, SleepTrackerError>;
