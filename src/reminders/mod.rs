//! Reminder engine: window selection, delivery and acknowledgement.
//!
//! One [`ReminderEngine`] per process, built with its store, channels and clock
//! injected. The poll loop in `scheduler.rs` drives [`ReminderEngine::run_cycle`];
//! commands call the rest.

pub mod acknowledge;
pub mod activation;
pub mod channels;
pub mod dispatcher;
pub mod lifecycle;
pub mod window;

#[cfg(test)]
pub mod test_support;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::db::{appointments, StoreAdapter};
use crate::error::ReminderError;
use crate::types::{Appointment, AppointmentStatus, AppointmentUpdate};

use self::acknowledge::Acknowledgement;
use self::channels::{AUDIO_CHANNEL, IN_APP_CHANNEL, SYSTEM_CHANNEL};
use self::dispatcher::{DispatchReport, Dispatcher};
use self::lifecycle::RedeliveryPolicy;
use self::window::{select_due, ReminderWindow};

const DEFAULT_LOOKAHEAD_MINUTES: u32 = 120;
const DEFAULT_POLL_INTERVAL_MINUTES: u32 = 5;

fn default_lookahead_minutes() -> u32 {
    DEFAULT_LOOKAHEAD_MINUTES
}

fn default_poll_interval_minutes() -> u32 {
    DEFAULT_POLL_INTERVAL_MINUTES
}

fn default_true() -> bool {
    true
}

/// Which delivery channels are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelToggles {
    #[serde(default = "default_true")]
    pub audio: bool,
    #[serde(default = "default_true")]
    pub system: bool,
    #[serde(default = "default_true")]
    pub in_app: bool,
}

impl Default for ChannelToggles {
    fn default() -> Self {
        Self {
            audio: true,
            system: true,
            in_app: true,
        }
    }
}

impl ChannelToggles {
    pub fn disabled(&self) -> HashSet<&'static str> {
        [
            (AUDIO_CHANNEL, self.audio),
            (SYSTEM_CHANNEL, self.system),
            (IN_APP_CHANNEL, self.in_app),
        ]
        .into_iter()
        .filter(|(_, enabled)| !enabled)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Reminder tunables, the `reminders` section of `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderConfig {
    #[serde(default = "default_lookahead_minutes")]
    pub lookahead_minutes: u32,
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u32,
    /// How long after its start an appointment is still reminded about.
    #[serde(default)]
    pub grace_minutes: u32,
    #[serde(default = "default_true")]
    pub redeliver_until_acknowledged: bool,
    #[serde(default)]
    pub channels: ChannelToggles,
    /// WAV file played instead of the built-in bell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound_path: Option<String>,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            lookahead_minutes: DEFAULT_LOOKAHEAD_MINUTES,
            poll_interval_minutes: DEFAULT_POLL_INTERVAL_MINUTES,
            grace_minutes: 0,
            redeliver_until_acknowledged: true,
            channels: ChannelToggles::default(),
            sound_path: None,
        }
    }
}

impl ReminderConfig {
    pub fn validate(&self) -> Result<(), ReminderError> {
        if self.lookahead_minutes == 0 {
            return Err(ReminderError::Configuration(
                "lookaheadMinutes must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_minutes == 0 {
            return Err(ReminderError::Configuration(
                "pollIntervalMinutes must be at least 1".to_string(),
            ));
        }
        if let Some(path) = &self.sound_path {
            if path.trim().is_empty() {
                return Err(ReminderError::Configuration(
                    "soundPath cannot be blank".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn window(&self) -> Result<ReminderWindow, ReminderError> {
        ReminderWindow::new(
            chrono::Duration::minutes(i64::from(self.lookahead_minutes)),
            chrono::Duration::minutes(i64::from(self.grace_minutes)),
        )
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        minutes(self.poll_interval_minutes)
    }

    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy::from_flag(self.redeliver_until_acknowledged)
    }
}

pub fn minutes(n: u32) -> std::time::Duration {
    std::time::Duration::from_secs(u64::from(n) * 60)
}

/// Source of "now" for window evaluation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub evaluated_at: DateTime<Utc>,
    pub due: usize,
    pub dispatches: Vec<DispatchReport>,
}

pub struct ReminderEngine {
    store: Arc<dyn StoreAdapter>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    config: RwLock<ReminderConfig>,
    /// Serializes poll cycles so two cycles never interleave dispatches.
    cycle_lock: tokio::sync::Mutex<()>,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        config: ReminderConfig,
    ) -> Result<Self, ReminderError> {
        config.validate()?;
        dispatcher.set_policy(config.redelivery_policy());
        dispatcher.set_disabled(config.channels.disabled());
        Ok(Self {
            store,
            dispatcher,
            clock,
            config: RwLock::new(config),
            cycle_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn store(&self) -> &dyn StoreAdapter {
        self.store.as_ref()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> ReminderConfig {
        self.config.read().clone()
    }

    /// Swap in new tunables. Takes effect at the next cycle.
    pub fn apply_config(&self, config: ReminderConfig) -> Result<(), ReminderError> {
        config.validate()?;
        self.dispatcher.set_policy(config.redelivery_policy());
        self.dispatcher.set_disabled(config.channels.disabled());
        *self.config.write() = config;
        Ok(())
    }

    /// Appointments currently due, without delivering anything.
    pub async fn check_upcoming(&self) -> Result<Vec<Appointment>, ReminderError> {
        let window = self.config.read().window()?;
        select_due(self.store(), self.clock.now(), &window).await
    }

    /// One poll: select what is due and hand each appointment to the dispatcher,
    /// earliest first.
    pub async fn run_cycle(&self) -> Result<CycleReport, ReminderError> {
        let _cycle = self.cycle_lock.lock().await;

        // Taken before selection so a confirmation racing the read is seen
        let epoch = self.dispatcher.begin_cycle();
        let now = self.clock.now();
        let window = self.config.read().window()?;
        let due = select_due(self.store(), now, &window).await?;

        let due_ids: HashSet<i64> = due.iter().map(|a| a.id).collect();
        let stale = self.dispatcher.pending().retain_due(&due_ids);
        if stale > 0 {
            log::debug!("Reminder engine: dropped {} stale pending deliveries", stale);
        }

        let mut dispatches = Vec::with_capacity(due.len());
        for appointment in &due {
            dispatches.push(self.dispatcher.dispatch(appointment, now, epoch).await);
        }

        if !due.is_empty() {
            log::info!(
                "Reminder engine: {} appointment(s) due, {} dispatched",
                due.len(),
                dispatches
                    .iter()
                    .filter(|d| !d.suppressed && !d.withdrawn)
                    .count()
            );
        }
        Ok(CycleReport {
            evaluated_at: now,
            due: due.len(),
            dispatches,
        })
    }

    pub async fn acknowledge(&self, appointment_id: i64) -> Result<Acknowledgement, ReminderError> {
        acknowledge::acknowledge(self.store(), &self.dispatcher, appointment_id).await
    }

    pub async fn reset(&self, appointment_id: i64) -> Result<bool, ReminderError> {
        acknowledge::reset(self.store(), &self.dispatcher, appointment_id).await
    }

    // -------------------------------------------------------------------------
    // Record operations that affect outstanding reminders
    // -------------------------------------------------------------------------

    pub async fn update_appointment(
        &self,
        id: i64,
        update: &AppointmentUpdate,
    ) -> Result<Appointment, ReminderError> {
        let (after, transition) = appointments::update_appointment(self.store(), id, update).await?;
        // A shown reminder for the old time or description is stale either way
        let rescheduled = update.scheduled_at.is_some() || update.description.is_some();
        if transition.changed() || rescheduled || after.status != AppointmentStatus::Pending {
            self.dispatcher.cancel(id).await;
        }
        Ok(after)
    }

    pub async fn set_status(
        &self,
        id: i64,
        status: AppointmentStatus,
    ) -> Result<(), ReminderError> {
        appointments::set_status(self.store(), id, status).await?;
        if status != AppointmentStatus::Pending {
            self.dispatcher.cancel(id).await;
        }
        Ok(())
    }

    pub async fn delete_appointment(&self, id: i64) -> Result<bool, ReminderError> {
        let deleted = appointments::delete_appointment(self.store(), id).await?;
        self.dispatcher.cancel(id).await;
        Ok(deleted)
    }

    /// Forget every pending delivery. Called on shutdown.
    pub fn shutdown(&self) {
        self.dispatcher.pending().clear();
    }
}
