//! Activation of a system notification: the user clicked it (or one of its
//! actions), which confirms the reminder and opens the appointments view.

use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use crate::error::ReminderError;
use crate::reminders::acknowledge::Acknowledgement;
use crate::reminders::channels::{EventSink, SystemNotifier};
use crate::reminders::ReminderEngine;

/// Event asking the UI to switch views; the payload is the route.
pub const NAVIGATE_EVENT: &str = "navigate";
pub const REMINDERS_ROUTE: &str = "/rendezvous";

/// Brings the main window to the front.
pub trait WindowFocus: Send + Sync {
    fn focus_main_window(&self);
}

/// Confirm the reminder, raise the window and point the UI at the appointments view.
///
/// The window is raised even when the confirmation fails, so the user lands
/// where the reminder can be confirmed by hand.
pub async fn activate(
    engine: &ReminderEngine,
    ui: &dyn EventSink,
    focus: &dyn WindowFocus,
    appointment_id: i64,
) -> Result<Acknowledgement, ReminderError> {
    let ack = engine.acknowledge(appointment_id).await;

    focus.focus_main_window();
    if let Err(e) = ui.emit_json(NAVIGATE_EVENT, json!(REMINDERS_ROUTE)) {
        log::warn!("Notification activation: navigate event not sent: {}", e);
    }
    ack
}

/// Send every activation `notifier` reports through [`activate`].
///
/// Registers the handler right away; the returned future does the work and
/// must be spawned on the async runtime. It ends when the notifier drops the
/// handler.
pub fn route_activations(
    notifier: &dyn SystemNotifier,
    engine: Arc<ReminderEngine>,
    ui: Arc<dyn EventSink>,
    focus: Arc<dyn WindowFocus>,
) -> impl Future<Output = ()> + Send + 'static {
    let (tx, mut rx) = mpsc::unbounded_channel::<i64>();
    notifier.on_activated(Arc::new(move |appointment_id| {
        if tx.send(appointment_id).is_err() {
            log::debug!(
                "Notification activation for {} dropped: router stopped",
                appointment_id
            );
        }
    }));

    async move {
        while let Some(appointment_id) = rx.recv().await {
            match activate(&engine, ui.as_ref(), focus.as_ref(), appointment_id).await {
                Ok(ack) => log::info!(
                    "Notification activation: appointment {} {:?}",
                    appointment_id,
                    ack
                ),
                Err(e) => log::warn!(
                    "Notification activation: appointment {} not confirmed: {}",
                    appointment_id,
                    e
                ),
            }
        }
    }
}
