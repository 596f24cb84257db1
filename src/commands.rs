//! Tauri command handlers.
//!
//! Reminder commands keep a forgiving contract: engine failures are logged and
//! answered with `false` or an empty list, so the UI never shows an error for a
//! background concern. Record operations surface their error message.

use std::sync::Arc;

use tauri::State;

use crate::db::appointments;
use crate::reminders::acknowledge::Acknowledgement;
use crate::reminders::ReminderConfig;
use crate::state::{AppState, NotificationStatus};
use crate::types::{
    Appointment, AppointmentStatus, AppointmentUpdate, Contact, NewAppointment, NewContact,
};

// =============================================================================
// Reminder commands
// =============================================================================

/// Start (or restart) periodic reminder checks.
#[tauri::command]
pub async fn start_notification_check(
    state: State<'_, Arc<AppState>>,
    interval_minutes: Option<u32>,
) -> Result<(), String> {
    let interval = match interval_minutes {
        Some(minutes) => minutes,
        None => state.reminder_config()?.poll_interval_minutes,
    };
    state.scheduler.start(interval).map_err(|e| e.to_string())
}

/// Stop periodic checks. Returns whether they were running.
#[tauri::command]
pub async fn stop_notification_check(state: State<'_, Arc<AppState>>) -> Result<bool, String> {
    Ok(state.scheduler.stop())
}

/// Appointments currently in the reminder window.
#[tauri::command]
pub async fn check_upcoming_rendezvous(
    state: State<'_, Arc<AppState>>,
) -> Result<Vec<Appointment>, String> {
    match state.engine.check_upcoming().await {
        Ok(due) => Ok(due),
        Err(e) => {
            log::warn!("check_upcoming_rendezvous failed: {}", e);
            Ok(Vec::new())
        }
    }
}

/// The user confirmed a reminder.
#[tauri::command]
pub async fn confirm_notification(
    state: State<'_, Arc<AppState>>,
    appointment_id: i64,
) -> Result<bool, String> {
    Ok(confirm(&state, appointment_id).await)
}

/// The webview saw a system notification activation (the notification
/// plugin's `onAction`). Hands it to the activation route, which confirms the
/// reminder and opens the appointments view. Returns whether it was routed.
#[tauri::command]
pub async fn acknowledge_from_notification(
    state: State<'_, Arc<AppState>>,
    appointment_id: i64,
) -> Result<bool, String> {
    Ok(state.notification_activated(appointment_id))
}

async fn confirm(state: &AppState, appointment_id: i64) -> bool {
    match state.engine.acknowledge(appointment_id).await {
        Ok(Acknowledgement::Missing) => {
            log::debug!("Confirmed reminder for missing appointment {}", appointment_id);
            true
        }
        Ok(_) => true,
        Err(e) => {
            log::warn!("confirm_notification({}) failed: {}", appointment_id, e);
            false
        }
    }
}

/// Make an appointment eligible for reminders again.
#[tauri::command]
pub async fn reset_notification_state(
    state: State<'_, Arc<AppState>>,
    appointment_id: i64,
) -> Result<bool, String> {
    match state.engine.reset(appointment_id).await {
        Ok(_) => Ok(true),
        Err(e) => {
            log::warn!("reset_notification_state({}) failed: {}", appointment_id, e);
            Ok(false)
        }
    }
}

/// The user closed an in-app notification without confirming it.
#[tauri::command]
pub async fn dismiss_notification(
    state: State<'_, Arc<AppState>>,
    appointment_id: i64,
) -> Result<(), String> {
    state.in_app.dismiss(appointment_id);
    Ok(())
}

#[tauri::command]
pub async fn get_notification_status(
    state: State<'_, Arc<AppState>>,
) -> Result<NotificationStatus, String> {
    state.notification_status()
}

#[tauri::command]
pub async fn get_reminder_config(
    state: State<'_, Arc<AppState>>,
) -> Result<ReminderConfig, String> {
    state.reminder_config()
}

#[tauri::command]
pub async fn set_reminder_config(
    state: State<'_, Arc<AppState>>,
    config: ReminderConfig,
) -> Result<ReminderConfig, String> {
    state.update_reminder_config(config)
}

// =============================================================================
// Record commands
// =============================================================================

#[tauri::command]
pub async fn create_contact(
    state: State<'_, Arc<AppState>>,
    contact: NewContact,
) -> Result<Contact, String> {
    appointments::create_contact(state.engine.store(), &contact)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_contacts(state: State<'_, Arc<AppState>>) -> Result<Vec<Contact>, String> {
    appointments::list_contacts(state.engine.store())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_appointments(state: State<'_, Arc<AppState>>) -> Result<Vec<Appointment>, String> {
    appointments::list_appointments(state.engine.store())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn create_appointment(
    state: State<'_, Arc<AppState>>,
    appointment: NewAppointment,
) -> Result<Appointment, String> {
    appointments::create_appointment(state.engine.store(), &appointment)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn update_appointment(
    state: State<'_, Arc<AppState>>,
    appointment_id: i64,
    update: AppointmentUpdate,
) -> Result<Appointment, String> {
    state
        .engine
        .update_appointment(appointment_id, &update)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn set_appointment_status(
    state: State<'_, Arc<AppState>>,
    appointment_id: i64,
    status: AppointmentStatus,
) -> Result<(), String> {
    state
        .engine
        .set_status(appointment_id, status)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn delete_appointment(
    state: State<'_, Arc<AppState>>,
    appointment_id: i64,
) -> Result<bool, String> {
    state
        .engine
        .delete_appointment(appointment_id)
        .await
        .map_err(|e| e.to_string())
}
