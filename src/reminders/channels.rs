//! The three reminder surfaces: an audio cue, a system notification and an
//! in-app notification.
//!
//! Each channel talks to its platform through a small trait ([`CuePlayer`],
//! [`SystemNotifier`], [`EventSink`]) so the Tauri and cpal backends stay in
//! `notification.rs` and `audio.rs`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::error::ReminderError;
use crate::reminders::dispatcher::{DeliveryOutcome, NotificationChannel};
use crate::types::Appointment;

pub const AUDIO_CHANNEL: &str = "audio";
pub const SYSTEM_CHANNEL: &str = "system";
pub const IN_APP_CHANNEL: &str = "in-app";

/// Event carrying the full appointment to the UI.
pub const NOTIFICATION_EVENT: &str = "rendezvous-notification";
/// Event telling the UI to drop an in-app notification.
pub const DISMISSED_EVENT: &str = "rendezvous-notification-dismissed";

pub const REMINDER_TITLE: &str = "Upcoming appointment";

// =============================================================================
// Audio
// =============================================================================

/// Plays the reminder cue. Blocking; called from a blocking worker.
pub trait CuePlayer: Send + Sync + 'static {
    fn play(&self) -> Result<(), String>;
}

pub struct AudioChannel {
    player: Arc<dyn CuePlayer>,
}

impl AudioChannel {
    pub fn new(player: Arc<dyn CuePlayer>) -> Self {
        Self { player }
    }
}

#[async_trait]
impl NotificationChannel for AudioChannel {
    fn name(&self) -> &'static str {
        AUDIO_CHANNEL
    }

    async fn deliver(&self, _appointment: &Appointment) -> Result<DeliveryOutcome, ReminderError> {
        let player = Arc::clone(&self.player);
        match tokio::task::spawn_blocking(move || player.play()).await {
            Ok(Ok(())) => Ok(DeliveryOutcome::Delivered),
            Ok(Err(e)) => Err(ReminderError::channel_failure(AUDIO_CHANNEL, e)),
            Err(e) => Err(ReminderError::channel_failure(
                AUDIO_CHANNEL,
                format!("playback task aborted: {}", e),
            )),
        }
    }
}

// =============================================================================
// System notification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    Granted,
    Denied,
    /// Not decided yet; the platform may ask the user.
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemNotification {
    /// Platform notification id, see [`notification_id`].
    pub id: i32,
    /// Carried with the notification so an activation can name the appointment.
    pub appointment_id: i64,
    pub title: String,
    pub body: String,
}

/// Called with the appointment id when the user activates a system notification.
pub type ActivationHandler = Arc<dyn Fn(i64) + Send + Sync>;

#[async_trait]
pub trait SystemNotifier: Send + Sync {
    async fn permission_state(&self) -> Result<Permission, String>;

    async fn request_permission(&self) -> Result<Permission, String>;

    async fn show(&self, notification: &SystemNotification) -> Result<(), String>;

    /// Route activations (a click on the notification or one of its actions)
    /// to `handler`, replacing any earlier handler.
    fn on_activated(&self, handler: ActivationHandler);
}

/// Holds the activation handler for a notifier until the platform reports a click.
#[derive(Default)]
pub struct ActivationSlot {
    handler: Mutex<Option<ActivationHandler>>,
}

impl ActivationSlot {
    pub fn set(&self, handler: ActivationHandler) {
        *self.handler.lock() = Some(handler);
    }

    /// Returns false when nothing is listening yet.
    pub fn fire(&self, appointment_id: i64) -> bool {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(appointment_id);
                true
            }
            None => false,
        }
    }
}

/// Platform notification ids are 32-bit. Appointment ids wrap modulo
/// `i32::MAX`, so two reminders only share an id when their appointments are
/// `i32::MAX` apart; the full id travels in [`SystemNotification::appointment_id`].
pub fn notification_id(appointment_id: i64) -> i32 {
    let wrapped = appointment_id.rem_euclid(i64::from(i32::MAX));
    i32::try_from(wrapped).unwrap_or_default()
}

/// Renders a reminder time for the notification body.
pub type TimeLabel = fn(DateTime<Utc>) -> String;

pub fn local_time_label(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

pub fn utc_time_label(at: DateTime<Utc>) -> String {
    at.format("%H:%M").to_string()
}

/// Notification body: who, when and, if present, what.
pub fn reminder_body(appointment: &Appointment, time_label: TimeLabel) -> String {
    let mut body = format!(
        "{} at {}",
        appointment.display_name(),
        time_label(appointment.scheduled_at)
    );
    if let Some(description) = &appointment.description {
        body.push_str(" - ");
        body.push_str(description);
    }
    body
}

/// System notification channel.
///
/// Asks the platform for permission at most once per process. After a denial
/// it keeps reading the current permission so a grant made in system settings
/// takes effect, but never prompts again.
pub struct SystemChannel {
    notifier: Arc<dyn SystemNotifier>,
    time_label: TimeLabel,
    prompted: AtomicBool,
    denial_logged: AtomicBool,
}

impl SystemChannel {
    pub fn new(notifier: Arc<dyn SystemNotifier>) -> Self {
        Self::with_time_label(notifier, local_time_label)
    }

    pub fn with_time_label(notifier: Arc<dyn SystemNotifier>, time_label: TimeLabel) -> Self {
        Self {
            notifier,
            time_label,
            prompted: AtomicBool::new(false),
            denial_logged: AtomicBool::new(false),
        }
    }

    async fn resolve_permission(&self) -> Result<Permission, ReminderError> {
        let state = self
            .notifier
            .permission_state()
            .await
            .map_err(|e| ReminderError::channel_failure(SYSTEM_CHANNEL, e))?;

        if state != Permission::Prompt || self.prompted.swap(true, Ordering::SeqCst) {
            return Ok(state);
        }

        log::info!("System notifications: requesting permission");
        self.notifier
            .request_permission()
            .await
            .map_err(|e| ReminderError::channel_failure(SYSTEM_CHANNEL, e))
    }
}

#[async_trait]
impl NotificationChannel for SystemChannel {
    fn name(&self) -> &'static str {
        SYSTEM_CHANNEL
    }

    async fn deliver(&self, appointment: &Appointment) -> Result<DeliveryOutcome, ReminderError> {
        match self.resolve_permission().await? {
            Permission::Granted => {
                self.denial_logged.store(false, Ordering::SeqCst);
            }
            Permission::Denied | Permission::Prompt => {
                if !self.denial_logged.swap(true, Ordering::SeqCst) {
                    log::info!("System notifications: permission not granted, skipping");
                }
                return Ok(DeliveryOutcome::skipped("notification permission not granted"));
            }
        }

        let notification = SystemNotification {
            id: notification_id(appointment.id),
            appointment_id: appointment.id,
            title: REMINDER_TITLE.to_string(),
            body: reminder_body(appointment, self.time_label),
        };
        self.notifier
            .show(&notification)
            .await
            .map_err(|e| ReminderError::channel_failure(SYSTEM_CHANNEL, e))?;
        Ok(DeliveryOutcome::Delivered)
    }
}

// =============================================================================
// In-app notification
// =============================================================================

/// Pushes named JSON events to the UI.
pub trait EventSink: Send + Sync {
    fn emit_json(&self, event: &str, payload: serde_json::Value) -> Result<(), String>;
}

/// In-app notification channel.
///
/// Keeps the set of appointments currently shown so one appointment never has
/// two notifications on screen.
pub struct InAppChannel {
    sink: Arc<dyn EventSink>,
    active: Mutex<HashSet<i64>>,
}

impl InAppChannel {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_active(&self, appointment_id: i64) -> bool {
        self.active.lock().contains(&appointment_id)
    }

    /// The user closed the notification without confirming; allow it to be shown again.
    pub fn dismiss(&self, appointment_id: i64) -> bool {
        self.active.lock().remove(&appointment_id)
    }
}

#[async_trait]
impl NotificationChannel for InAppChannel {
    fn name(&self) -> &'static str {
        IN_APP_CHANNEL
    }

    async fn deliver(&self, appointment: &Appointment) -> Result<DeliveryOutcome, ReminderError> {
        if !self.active.lock().insert(appointment.id) {
            return Ok(DeliveryOutcome::skipped("already on screen"));
        }

        let payload = serde_json::to_value(appointment)
            .map_err(|e| ReminderError::channel_failure(IN_APP_CHANNEL, e.to_string()))?;
        if let Err(e) = self.sink.emit_json(NOTIFICATION_EVENT, payload) {
            self.active.lock().remove(&appointment.id);
            return Err(ReminderError::channel_failure(IN_APP_CHANNEL, e));
        }
        Ok(DeliveryOutcome::Delivered)
    }

    async fn cancel(&self, appointment_id: i64) {
        self.active.lock().remove(&appointment_id);
        if let Err(e) = self
            .sink
            .emit_json(DISMISSED_EVENT, json!({ "id": appointment_id }))
        {
            log::debug!(
                "In-app notification: dismiss event for {} not sent: {}",
                appointment_id,
                e
            );
        }
    }
}
