use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationThresholds;
use crate::error::{SleepTrackerError, TrackerResult};
use crate::series::MovementSeries;
use crate::session::SessionMetadata;

/// Stamped into every settings record, bumped on layout changes
pub const SETTINGS_VERSION: u32 = 1;

/// Durable calibration settings. Commits are atomic: a reader never
/// observes a partial record, and a rejected commit leaves the previous
/// record untouched.
pub trait SettingsStore {
    fn commit_thresholds(&self, thresholds: &CalibrationThresholds) -> TrackerResult<()>;
    fn read_thresholds(&self) -> TrackerResult<Option<CalibrationThresholds>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsRecord {
    version: u32,
    thresholds: CalibrationThresholds,
}

/// JSON settings file, swapped in with a temp-file rename so an
/// interrupted commit can never leave a half-written record behind.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn commit_thresholds(&self, thresholds: &CalibrationThresholds) -> TrackerResult<()> {
        thresholds.validate()?;
        let record = SettingsRecord {
            version: SETTINGS_VERSION,
            thresholds: *thresholds,
        };
        let json = serde_json::to_string_pretty(&record)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn read_thresholds(&self) -> TrackerResult<Option<CalibrationThresholds>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => {
                let record: SettingsRecord = serde_json::from_str(&text)?;
                Ok(Some(record.thresholds))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory settings, used by tests and callers without a filesystem
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: Mutex<Option<CalibrationThresholds>>,
}

impl SettingsStore for MemorySettingsStore {
    fn commit_thresholds(&self, thresholds: &CalibrationThresholds) -> TrackerResult<()> {
        thresholds.validate()?;
        let mut slot = self
            .inner
            .lock()
            .map_err(|_| SleepTrackerError::StorageError("settings lock poisoned".to_string()))?;
        *slot = Some(*thresholds);
        Ok(())
    }

    fn read_thresholds(&self) -> TrackerResult<Option<CalibrationThresholds>> {
        let slot = self
            .inner
            .lock()
            .map_err(|_| SleepTrackerError::StorageError("settings lock poisoned".to_string()))?;
        Ok(*slot)
    }
}

/// Complete session export (JSON-serializable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub metadata: SessionMetadata,
    pub series: MovementSeries,
}

impl SessionExport {
    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serialize to JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

/// Finished-session sink used by `stop_and_save`
pub trait SessionStore {
    fn save(&self, export: &SessionExport) -> TrackerResult<()>;
}

/// Writes one `<session_id>.json` per finished session
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, export: &SessionExport) -> TrackerResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.session_path(&export.metadata.session_id);
        fs::write(&path, export.to_json()?)?;
        log::info!(
            "saved {} samples to {}",
            export.metadata.sample_count,
            path.display()
        );
        Ok(())
    }
}

/// In-memory session sink for tests
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    saved: Mutex<Vec<SessionExport>>,
}

impl MemorySessionStore {
    pub fn saved(&self) -> TrackerResult<Vec<SessionExport>> {
        let saved = self
            .saved
            .lock()
            .map_err(|_| {
                SleepTrackerError::StorageError("session store lock poisoned".to_string())
            })?;
        Ok(saved.clone())
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, export: &SessionExport) -> TrackerResult<()> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| {
                SleepTrackerError::StorageError("session store lock poisoned".to_string())
            })?;
        saved.push(export.clone());
        Ok(())
    }
}
