use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::time::Duration;
use tokio::time::sleep;

use sleep_tracker_rs::{
    alarm_status_line, next_alarm_or_none, AlarmDecision, CalibrationStage, CalibrationWizard,
    ChartView, DimScreenTimer, FileSessionStore, FileSettingsStore, FixedAlarmRegistry,
    MockMotionSource, MotionSource, SessionConfig, SettingsStore, SleepSession,
    SmartAlarmScheduler, DIM_SCREEN_AFTER_MS,
};

#[derive(Parser, Debug)]
#[command(name = "sleep_tracker")]
#[command(about = "Sleep movement monitor with smart wake", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Sampling interval in milliseconds
    #[arg(long, default_value = "30000")]
    interval_ms: u64,

    /// Run the three-stage calibration wizard before monitoring
    #[arg(long)]
    calibrate: bool,

    /// Seconds per calibration trial
    #[arg(long, default_value = "30")]
    trial_secs: u64,

    /// Wake early on light-sleep movement inside the alarm window
    #[arg(long)]
    use_alarm: bool,

    /// Minutes before the scheduled alarm in which early wake is allowed
    #[arg(long, default_value = "30")]
    alarm_window: i32,

    /// Schedule the demo alarm this many minutes from now
    #[arg(long, default_value = "480")]
    alarm_in: i64,

    /// Keep the screen on and arm the dim timer
    #[arg(long)]
    force_screen_on: bool,

    /// Settings file holding calibration thresholds
    #[arg(long, default_value = "sleep_settings.json")]
    settings: String,

    /// Output directory for saved sessions
    #[arg(long, default_value = "sleep_sessions")]
    output_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    println!("[{}] Sleep Tracker RS Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Sample Interval: {} ms", args.interval_ms);
    println!("  Smart Wake: {}", args.use_alarm);
    println!("  Alarm Window: {} minutes", args.alarm_window);
    println!("  Output Dir: {}", args.output_dir);

    let settings = FileSettingsStore::new(&args.settings);

    if args.calibrate {
        let mut wizard = CalibrationWizard::new()
            .with_trial_duration(Duration::from_secs(args.trial_secs));
        while wizard.stage() != CalibrationStage::Committed {
            let stage = wizard.stage();
            println!("[{}] Running {} ({}s trial)...", ts_now(), stage, args.trial_secs);
            // lie still, then move strongly, then move like waking up
            let source: Box<dyn MotionSource> = match stage {
                CalibrationStage::MinTest => Box::new(MockMotionSource::steady()),
                CalibrationStage::MaxTest => Box::new(MockMotionSource::with_burst(2, 8.0)),
                _ => Box::new(MockMotionSource::with_burst(3, 4.0)),
            };
            match wizard.run_stage(source).await {
                Ok(level) => {
                    println!("[{}] Calibration succeeded with result: {}", ts_now(), level)
                }
                Err(err) => {
                    println!("[{}] Calibration failed ({}), retrying stage", ts_now(), err)
                }
            }
        }
        let committed = wizard.commit(&settings)?;
        println!(
            "[{}] Committed thresholds: min={} max={} alarm_trigger={}",
            ts_now(),
            committed.min,
            committed.max,
            committed.alarm_trigger
        );
    }

    let thresholds = settings.read_thresholds()?.unwrap_or_default();
    println!(
        "[{}] Using thresholds: min={} max={} alarm_trigger={}",
        ts_now(),
        thresholds.min,
        thresholds.max,
        thresholds.alarm_trigger
    );

    let config = SessionConfig {
        interval: Duration::from_millis(args.interval_ms),
        thresholds,
        use_alarm: args.use_alarm,
        force_screen_on: args.force_screen_on,
        alarm_window_minutes: args.alarm_window,
    };
    let mut session = SleepSession::start(config, Box::new(MockMotionSource::new()))?;
    println!("[{}] Monitoring session {}", ts_now(), session.session_id());

    let registry = FixedAlarmRegistry::new(Utc::now() + chrono::Duration::minutes(args.alarm_in));
    let channel = session.channel()?;
    let mut view = ChartView::attach(&channel).await?;
    let mut scheduler = SmartAlarmScheduler::new(thresholds.alarm_trigger);

    let window = args.alarm_window;
    let use_alarm = args.use_alarm;
    let force_screen_on = args.force_screen_on;

    let mut observer = tokio::spawn(async move {
        let dim_timer = force_screen_on.then(|| {
            DimScreenTimer::start(Duration::from_millis(DIM_SCREEN_AFTER_MS), || {
                println!("[{}] Screen dimmed", ts_now())
            })
        });

        loop {
            match view.next_update().await {
                Ok(Some(sample)) => {
                    let now = Utc::now();
                    let alarm = next_alarm_or_none(&registry, now);
                    let decision =
                        scheduler.evaluate(view.series(), alarm, window, use_alarm, now);
                    println!(
                        "[{}] movement {:.1} ({} samples) - {}",
                        ts_now(),
                        sample.magnitude,
                        view.series().len(),
                        alarm_status_line(&decision, window)
                    );
                    if decision == AlarmDecision::FireNow {
                        println!("[{}] ALARM: waking now", ts_now());
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    eprintln!("[{}] Observer error: {}", ts_now(), err);
                    break;
                }
            }
        }

        if let Some(timer) = dim_timer {
            timer.cancel();
        }
    });

    if args.duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {
                println!("[{}] Duration reached, stopping...", ts_now());
            }
            _ = &mut observer => {}
        }
    } else {
        let _ = observer.await;
    }

    let store = FileSessionStore::new(&args.output_dir);
    if let Some(export) = session.stop_and_save(&store).await? {
        println!(
            "[{}] Final save: {} samples (peak {:.1}) to {}",
            ts_now(),
            export.metadata.sample_count,
            export.metadata.peak_magnitude,
            store.session_path(&export.metadata.session_id).display()
        );
    }

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
