//! Native notification and UI event wrappers
//!
//! Connects the reminder channels to Tauri: system notifications through
//! tauri-plugin-notification and in-app events through the webview emitter.
//!
//! The plugin reports notification activations to the webview (`onAction`),
//! not to Rust. The UI forwards them with the `acknowledge_from_notification`
//! command, which lands in [`TauriNotifier::activated`].

use async_trait::async_trait;
use tauri::plugin::PermissionState;
use tauri::{AppHandle, Emitter, Manager};
use tauri_plugin_notification::NotificationExt;

use crate::reminders::activation::WindowFocus;
use crate::reminders::channels::{
    ActivationHandler, ActivationSlot, EventSink, Permission, SystemNotification, SystemNotifier,
};

fn to_permission(state: PermissionState) -> Permission {
    match state {
        PermissionState::Granted => Permission::Granted,
        PermissionState::Denied => Permission::Denied,
        _ => Permission::Prompt,
    }
}

/// System notifier backed by tauri-plugin-notification.
pub struct TauriNotifier {
    app: AppHandle,
    activations: ActivationSlot,
}

impl TauriNotifier {
    pub fn new(app: AppHandle) -> Self {
        Self {
            app,
            activations: ActivationSlot::default(),
        }
    }

    /// The user activated the notification for `appointment_id`.
    pub fn activated(&self, appointment_id: i64) -> bool {
        self.activations.fire(appointment_id)
    }
}

#[async_trait]
impl SystemNotifier for TauriNotifier {
    async fn permission_state(&self) -> Result<Permission, String> {
        self.app
            .notification()
            .permission_state()
            .map(to_permission)
            .map_err(|e| format!("Failed to read notification permission: {}", e))
    }

    async fn request_permission(&self) -> Result<Permission, String> {
        self.app
            .notification()
            .request_permission()
            .map(to_permission)
            .map_err(|e| format!("Failed to request notification permission: {}", e))
    }

    async fn show(&self, notification: &SystemNotification) -> Result<(), String> {
        self.app
            .notification()
            .builder()
            .id(notification.id)
            .title(&notification.title)
            .body(&notification.body)
            .extra("appointmentId", notification.appointment_id)
            .show()
            .map_err(|e| format!("Failed to send notification: {}", e))
    }

    fn on_activated(&self, handler: ActivationHandler) {
        self.activations.set(handler);
    }
}

impl WindowFocus for AppHandle {
    fn focus_main_window(&self) {
        if let Some(window) = self.get_webview_window("main") {
            let _ = window.show();
            let _ = window.unminimize();
            let _ = window.set_focus();
        }
    }
}

/// In-app events go to every webview of the app.
impl EventSink for AppHandle {
    fn emit_json(&self, event: &str, payload: serde_json::Value) -> Result<(), String> {
        self.emit(event, payload)
            .map_err(|e| format!("Failed to emit {}: {}", event, e))
    }
}
