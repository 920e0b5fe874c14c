use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::channel::SessionMeta;
use crate::error::{SleepTrackerError, TrackerResult};
use crate::sampler::{MotionSampler, SamplerConfig, SamplerHandle};
use crate::sensor::MotionSource;
use crate::storage::SettingsStore;

pub const MIN_TEST_INTERVAL_MS: u64 = 10_000;
pub const MAX_TEST_INTERVAL_MS: u64 = 5_000;
pub const ALARM_TEST_INTERVAL_MS: u64 = 2_500;

/// Fallback alarm trigger sensitivity for uncalibrated devices
pub const DEFAULT_ALARM_SENSITIVITY: i32 = 60;

/// How long each trial listens for movement by default
pub const DEFAULT_TRIAL_DURATION: Duration = Duration::from_secs(30);

/// Per-device amplitude bounds produced by the calibration wizard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationThresholds {
    pub min: i32,
    pub max: i32,
    pub alarm_trigger: i32,
}

impl CalibrationThresholds {
    pub fn new(min: i32, max: i32, alarm_trigger: i32) -> Self {
        Self {
            min,
            max,
            alarm_trigger,
        }
    }

    /// The source these come from does not guarantee ordering, so every
    /// consumer validates before trusting a record.
    pub fn validate(&self) -> TrackerResult<()> {
        if self.min < 0 || self.min > self.max {
            return Err(SleepTrackerError::InvalidThresholds(format!(
                "min/max out of order: min={} max={}",
                self.min, self.max
            )));
        }
        if self.alarm_trigger < self.min || self.alarm_trigger > self.max {
            return Err(SleepTrackerError::InvalidThresholds(format!(
                "alarm trigger {} outside {}..{}",
                self.alarm_trigger, self.min, self.max
            )));
        }
        Ok(())
    }
}

impl Default for CalibrationThresholds {
    fn default() -> Self {
        Self {
            min: 0,
            max: 100,
            alarm_trigger: DEFAULT_ALARM_SENSITIVITY,
        }
    }
}

/// Wizard stages, in running order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationStage {
    MinTest,
    MaxTest,
    AlarmTest,
    Committed,
}

impl fmt::Display for CalibrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CalibrationStage::MinTest => "minimum sensitivity test",
            CalibrationStage::MaxTest => "maximum sensitivity test",
            CalibrationStage::AlarmTest => "alarm trigger test",
            CalibrationStage::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Three-stage calibration state machine. Each stage runs a timed
/// sampling trial at its own interval and normalization range; a failed
/// trial leaves the stage unchanged so the caller can retry it.
pub struct CalibrationWizard {
    stage: CalibrationStage,
    min: i32,
    max: i32,
    alarm_trigger: i32,
    trial_duration: Duration,
    active: Option<SamplerHandle>,
}

impl CalibrationWizard {
    pub fn new() -> Self {
        Self {
            stage: CalibrationStage::MinTest,
            min: 0,
            max: 0,
            alarm_trigger: 0,
            trial_duration: DEFAULT_TRIAL_DURATION,
            active: None,
        }
    }

    /// Resume a wizard torn down mid-sequence. The caller is expected to
    /// have persisted the stage and the earlier stage results externally
    /// and replays them here.
    pub fn resume(stage: CalibrationStage, min: i32, max: i32) -> Self {
        Self {
            stage,
            min,
            max,
            alarm_trigger: 0,
            trial_duration: DEFAULT_TRIAL_DURATION,
            active: None,
        }
    }

    pub fn with_trial_duration(mut self, trial_duration: Duration) -> Self {
        self.trial_duration = trial_duration;
        self
    }

    pub fn stage(&self) -> CalibrationStage {
        self.stage
    }

    /// Current progress for external persistence across process restarts
    pub fn progress(&self) -> (CalibrationStage, i32, i32) {
        (self.stage, self.min, self.max)
    }

    /// Sampler configuration for a stage: the min test scans the full
    /// scale, each later stage narrows the range with earlier results.
    pub fn stage_config(&self, stage: CalibrationStage) -> TrackerResult<SamplerConfig> {
        match stage {
            CalibrationStage::MinTest => Ok(SamplerConfig::new(
                Duration::from_millis(MIN_TEST_INTERVAL_MS),
                0,
                100,
            )),
            CalibrationStage::MaxTest => Ok(SamplerConfig::new(
                Duration::from_millis(MAX_TEST_INTERVAL_MS),
                self.min,
                100,
            )),
            CalibrationStage::AlarmTest => Ok(SamplerConfig::new(
                Duration::from_millis(ALARM_TEST_INTERVAL_MS),
                self.min,
                self.max,
            )),
            CalibrationStage::Committed => Err(SleepTrackerError::InvalidState(
                "calibration already complete".to_string(),
            )),
        }
    }

    /// Run the current stage's trial: supersede any leftover sampler,
    /// restart with the stage config, listen for the trial duration and
    /// return the peak normalized level. Advances on success only.
    pub async fn run_stage(&mut self, source: Box<dyn MotionSource>) -> TrackerResult<i32> {
        let stage = self.stage;
        let config = self.stage_config(stage)?;

        if let Some(leftover) = self.active.take() {
            let _ = leftover.stop().await;
        }

        let handle = MotionSampler::start(source, config, SessionMeta::default())?;
        let channel = handle.channel().clone();
        self.active = Some(handle);

        let (mut updates, sync) = channel.attach().await?;
        let mut peak: Option<f64> = None;
        for sample in sync.series.samples() {
            peak = Some(peak.map_or(sample.magnitude, |p| p.max(sample.magnitude)));
        }

        let deadline = tokio::time::Instant::now() + self.trial_duration;
        loop {
            match tokio::time::timeout_at(deadline, updates.recv()).await {
                Ok(Ok(update)) => {
                    peak = Some(peak.map_or(update.sample.magnitude, |p| {
                        p.max(update.sample.magnitude)
                    }));
                }
                Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => break,
            }
        }

        if let Some(active) = self.active.take() {
            active.stop().await?;
        }

        let measured = peak
            .ok_or_else(|| {
                SleepTrackerError::CalibrationFailed(format!("{stage} produced no samples"))
            })?
            .round() as i32;

        match stage {
            CalibrationStage::MinTest => {
                self.min = measured;
                self.stage = CalibrationStage::MaxTest;
            }
            CalibrationStage::MaxTest => {
                self.max = measured;
                self.stage = CalibrationStage::AlarmTest;
            }
            CalibrationStage::AlarmTest => {
                self.alarm_trigger = measured;
                self.stage = CalibrationStage::Committed;
            }
            // stage_config already rejected Committed
            CalibrationStage::Committed => {}
        }

        log::info!("{stage} measured {measured}");
        Ok(measured)
    }

    /// Thresholds from the completed trial sequence
    pub fn thresholds(&self) -> TrackerResult<CalibrationThresholds> {
        if self.stage != CalibrationStage::Committed {
            return Err(SleepTrackerError::InvalidState(format!(
                "calibration incomplete, still at {}",
                self.stage
            )));
        }
        Ok(CalibrationThresholds::new(
            self.min,
            self.max,
            self.alarm_trigger,
        ))
    }

    /// Commit all three thresholds in one atomic store write. Validation
    /// failure leaves whatever was previously committed intact.
    pub fn commit<S: SettingsStore>(&self, store: &S) -> TrackerResult<CalibrationThresholds> {
        let thresholds = self.thresholds()?;
        thresholds.validate()?;
        store.commit_thresholds(&thresholds)?;
        Ok(thresholds)
    }
}

impl Default for CalibrationWizard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{MockMotionSource, RawReading, ScriptedMotionSource, GRAVITY_MS2};
    use crate::storage::{MemorySettingsStore, SettingsStore};

    #[test]
    fn test_stage_ranges_narrow_with_results() {
        let wizard = CalibrationWizard::new();
        let min_config = wizard.stage_config(CalibrationStage::MinTest).unwrap();
        assert_eq!(min_config.interval, Duration::from_millis(10_000));
        assert_eq!((min_config.range_lo, min_config.range_hi), (0, 100));

        let wizard = CalibrationWizard::resume(CalibrationStage::MaxTest, 10, 0);
        let max_config = wizard.stage_config(CalibrationStage::MaxTest).unwrap();
        assert_eq!(max_config.interval, Duration::from_millis(5_000));
        assert_eq!((max_config.range_lo, max_config.range_hi), (10, 100));

        let wizard = CalibrationWizard::resume(CalibrationStage::AlarmTest, 10, 80);
        let alarm_config = wizard.stage_config(CalibrationStage::AlarmTest).unwrap();
        assert_eq!(alarm_config.interval, Duration::from_millis(2_500));
        assert_eq!((alarm_config.range_lo, alarm_config.range_hi), (10, 80));
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(CalibrationThresholds::new(10, 80, 60).validate().is_ok());
        assert!(CalibrationThresholds::new(80, 10, 60).validate().is_err());
        assert!(CalibrationThresholds::new(-5, 80, 60).validate().is_err());
        assert!(CalibrationThresholds::new(10, 80, 90).validate().is_err());
        assert!(CalibrationThresholds::new(10, 80, 5).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_leaves_stage_unchanged() {
        let mut wizard = CalibrationWizard::new().with_trial_duration(Duration::from_millis(100));

        // single reading feeds the probe, every trial tick then fails
        let dead_after_probe =
            ScriptedMotionSource::new(vec![RawReading::new(0.0, 0.0, GRAVITY_MS2, 0)]);
        let result = wizard.run_stage(Box::new(dead_after_probe)).await;
        assert!(matches!(
            result,
            Err(SleepTrackerError::CalibrationFailed(_))
        ));
        assert_eq!(wizard.stage(), CalibrationStage::MinTest);

        // retrying the same stage with a live source succeeds
        wizard
            .run_stage(Box::new(MockMotionSource::steady()))
            .await
            .unwrap();
        assert_eq!(wizard.stage(), CalibrationStage::MaxTest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sequence_commits_trial_outputs() {
        let store = MemorySettingsStore::default();
        let mut wizard = CalibrationWizard::new().with_trial_duration(Duration::from_millis(100));

        let min = wizard
            .run_stage(Box::new(MockMotionSource::steady()))
            .await
            .unwrap();
        let max = wizard
            .run_stage(Box::new(MockMotionSource::with_burst(1, 5.0)))
            .await
            .unwrap();
        let alarm = wizard
            .run_stage(Box::new(MockMotionSource::with_burst(1, 3.0)))
            .await
            .unwrap();
        assert_eq!(wizard.stage(), CalibrationStage::Committed);

        let committed = wizard.commit(&store).unwrap();
        assert_eq!(committed, CalibrationThresholds::new(min, max, alarm));
        assert_eq!(store.read_thresholds().unwrap(), Some(committed));
        assert!(committed.alarm_trigger >= committed.min);
        assert!(committed.alarm_trigger <= committed.max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_wizard_keeps_previous_thresholds() {
        let store = MemorySettingsStore::default();
        let previous = CalibrationThresholds::new(5, 90, 40);
        store.commit_thresholds(&previous).unwrap();

        let mut wizard = CalibrationWizard::new().with_trial_duration(Duration::from_millis(100));
        wizard
            .run_stage(Box::new(MockMotionSource::steady()))
            .await
            .unwrap();
        wizard
            .run_stage(Box::new(MockMotionSource::with_burst(1, 5.0)))
            .await
            .unwrap();
        // process dies before the alarm test commits anything
        drop(wizard);

        assert_eq!(store.read_thresholds().unwrap(), Some(previous));
    }

    #[tokio::test]
    async fn test_commit_requires_completed_sequence() {
        let store = MemorySettingsStore::default();
        let wizard = CalibrationWizard::new();
        assert!(matches!(
            wizard.commit(&store),
            Err(SleepTrackerError::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_replays_persisted_progress() {
        let mut wizard = CalibrationWizard::resume(CalibrationStage::AlarmTest, 0, 80)
            .with_trial_duration(Duration::from_millis(100));

        let alarm = wizard
            .run_stage(Box::new(MockMotionSource::with_burst(1, 3.0)))
            .await
            .unwrap();
        let thresholds = wizard.thresholds().unwrap();
        assert_eq!(thresholds, CalibrationThresholds::new(0, 80, alarm));
    }
}
