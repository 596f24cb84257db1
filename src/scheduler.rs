//! Poll scheduler for reminder checks
//!
//! Runs one background task that asks the engine for due reminders immediately
//! and then once per interval. Starting while running replaces the loop, so
//! there is never more than one live timer. Stopping lets an in-flight cycle
//! finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::ReminderError;
use crate::reminders::{minutes, ReminderEngine};

/// Extra wall-clock gap between ticks that counts as a sleep/wake (2 minutes)
const TIME_JUMP_THRESHOLD_SECS: i64 = 120;

struct PollLoop {
    interval: Duration,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct PollScheduler {
    engine: Arc<ReminderEngine>,
    running: Mutex<Option<PollLoop>>,
}

impl PollScheduler {
    pub fn new(engine: Arc<ReminderEngine>) -> Self {
        Self {
            engine,
            running: Mutex::new(None),
        }
    }

    /// Start polling every `interval_minutes`, replacing any running loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval_minutes: u32) -> Result<(), ReminderError> {
        if interval_minutes == 0 {
            return Err(ReminderError::Configuration(
                "poll interval must be at least 1 minute".to_string(),
            ));
        }
        self.start_every(minutes(interval_minutes));
        Ok(())
    }

    pub fn start_every(&self, interval: Duration) {
        let mut running = self.running.lock();
        if let Some(previous) = running.take() {
            let _ = previous.shutdown.send(());
            log::info!("Reminder scheduler: replacing loop ({:?})", previous.interval);
        }

        let (shutdown, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_poll_loop(Arc::clone(&self.engine), interval, stop_rx));
        *running = Some(PollLoop {
            interval,
            shutdown,
            task,
        });
        log::info!("Reminder scheduler: started, polling every {:?}", interval);
    }

    /// Stop polling. Returns whether a loop was running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(poll_loop) => {
                let _ = poll_loop.shutdown.send(());
                log::info!("Reminder scheduler: stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|poll_loop| !poll_loop.task.is_finished())
    }

    pub fn interval(&self) -> Option<Duration> {
        self.running.lock().as_ref().map(|poll_loop| poll_loop.interval)
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_poll_loop(
    engine: Arc<ReminderEngine>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let expected_gap = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
    let mut last_tick: Option<DateTime<Utc>> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let now = Utc::now();
        if let Some(previous) = last_tick {
            let jump = (now - previous - expected_gap).num_seconds();
            if jump > TIME_JUMP_THRESHOLD_SECS {
                log::info!(
                    "Reminder scheduler: detected system wake (clock jumped {} seconds)",
                    jump
                );
            }
        }
        last_tick = Some(now);

        match engine.run_cycle().await {
            Ok(report) => {
                log::debug!(
                    "Reminder scheduler: cycle at {} found {} due",
                    report.evaluated_at,
                    report.due
                );
            }
            Err(e) if e.is_transient() => {
                log::warn!("Reminder scheduler: cycle skipped, will retry: {}", e);
            }
            Err(e) => {
                log::error!("Reminder scheduler: cycle failed: {}", e);
            }
        }
    }
}
