use chrono::{DateTime, Duration, Utc};

use crate::error::TrackerResult;
use crate::series::MovementSeries;

/// Next scheduled wake time from the external alarm registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledAlarm {
    pub fire_time: DateTime<Utc>,
}

impl ScheduledAlarm {
    pub fn new(fire_time: DateTime<Utc>) -> Self {
        Self { fire_time }
    }
}

/// Read-only "next scheduled alarm" query. The core never mutates
/// alarm definitions.
pub trait AlarmRegistry {
    fn next_alarm(&self, now: DateTime<Utc>) -> TrackerResult<Option<ScheduledAlarm>>;
}

/// Registry with one fixed alarm, for the demo binary and tests
pub struct FixedAlarmRegistry {
    alarm: Option<ScheduledAlarm>,
}

impl FixedAlarmRegistry {
    pub fn new(fire_time: DateTime<Utc>) -> Self {
        Self {
            alarm: Some(ScheduledAlarm::new(fire_time)),
        }
    }

    pub fn none() -> Self {
        Self { alarm: None }
    }
}

impl AlarmRegistry for FixedAlarmRegistry {
    fn next_alarm(&self, _now: DateTime<Utc>) -> TrackerResult<Option<ScheduledAlarm>> {
        Ok(self.alarm)
    }
}

/// Smart wake is best-effort: a failing registry degrades to "no
/// alarm" instead of surfacing an error into the monitoring loop.
pub fn next_alarm_or_none<R: AlarmRegistry>(
    registry: &R,
    now: DateTime<Utc>,
) -> Option<ScheduledAlarm> {
    match registry.next_alarm(now) {
        Ok(alarm) => alarm,
        Err(err) => {
            log::warn!("alarm query failed, smart wake disabled: {err}");
            None
        }
    }
}

/// Per-evaluation wake decision, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmDecision {
    NoAlarm,
    Deferred(DateTime<Utc>),
    FireNow,
}

/// Decides when to wake: early on the first light-sleep movement inside
/// the pre-alarm window, or at the scheduled time as a fail-safe.
///
/// Firing is edge-triggered on the below-to-above threshold transition
/// and latches: once `FireNow` is decided, repeat evaluations keep
/// returning the same decision until `reset`. There is no automatic
/// re-arm for a later alarm.
pub struct SmartAlarmScheduler {
    alarm_trigger: i32,
    cursor: usize,
    above: bool,
    fired: bool,
}

impl SmartAlarmScheduler {
    pub fn new(alarm_trigger: i32) -> Self {
        Self {
            alarm_trigger,
            cursor: 0,
            above: false,
            fired: false,
        }
    }

    /// Re-arm for a new alarm or a fresh series
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.above = false;
        self.fired = false;
    }

    /// Evaluate the series against the scheduled alarm. Invoked on every
    /// new sample; repeat calls with unchanged inputs return the same
    /// decision.
    pub fn evaluate(
        &mut self,
        series: &MovementSeries,
        alarm: Option<ScheduledAlarm>,
        window_minutes: i32,
        use_alarm: bool,
        now: DateTime<Utc>,
    ) -> AlarmDecision {
        if !use_alarm {
            return AlarmDecision::NoAlarm;
        }
        let Some(alarm) = alarm else {
            return AlarmDecision::NoAlarm;
        };
        if self.fired {
            return AlarmDecision::FireNow;
        }

        let window_end = alarm.fire_time;
        let window_start = window_end - Duration::minutes(window_minutes.max(0) as i64);

        if let Some(crossing) = self.scan(series, window_start, window_end) {
            log::info!("movement crossed alarm trigger at {crossing}, waking early");
            self.fired = true;
            return AlarmDecision::FireNow;
        }

        // fail-safe: never sleep past the scheduled time
        if now >= window_end {
            self.fired = true;
            return AlarmDecision::FireNow;
        }

        AlarmDecision::Deferred(window_end)
    }

    /// Walk samples not yet examined, tracking the threshold state so a
    /// plateau that started before the window never counts as an
    /// in-window crossing. Returns the earliest qualifying crossing.
    fn scan(
        &mut self,
        series: &MovementSeries,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut crossing = None;
        for sample in series.samples().iter().skip(self.cursor) {
            let is_above = sample.magnitude >= self.alarm_trigger as f64;
            if is_above && !self.above && crossing.is_none() {
                if let Some(ts) = DateTime::from_timestamp_millis(sample.timestamp_ms) {
                    if ts >= window_start && ts < window_end {
                        crossing = Some(ts);
                    }
                }
            }
            self.above = is_above;
            self.cursor += 1;
        }
        crossing
    }
}
