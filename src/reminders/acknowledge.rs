//! User confirmation of a reminder, and the explicit reset that undoes it.
//!
//! Both writes are compare-and-set on `notification_state`, so confirming an
//! already confirmed reminder (from a stale notification, say) changes nothing
//! and still succeeds.

use serde::Serialize;
use serde_json::json;

use crate::db::StoreAdapter;
use crate::error::ReminderError;
use crate::reminders::dispatcher::Dispatcher;
use crate::reminders::lifecycle::{NotificationState, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Acknowledgement {
    Confirmed,
    AlreadyConfirmed,
    /// No such appointment; treated as success since there is nothing left to remind about.
    Missing,
}

/// Apply a lifecycle transition to one appointment, if its state still matches.
async fn apply(
    store: &dyn StoreAdapter,
    appointment_id: i64,
    event: fn(NotificationState) -> Transition,
) -> Result<Option<Transition>, ReminderError> {
    let Some(row) = store
        .get(
            "SELECT notification_state FROM appointments WHERE id = ?1",
            &[json!(appointment_id)],
        )
        .await?
    else {
        return Ok(None);
    };

    let current: NotificationState = row
        .get("notification_state")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ReminderError::MalformedRecord(format!(
                "appointment {} has no notification state",
                appointment_id
            ))
        })?
        .parse()?;

    let transition = event(current);
    if let Transition::Moved { from, to } = transition {
        let result = store
            .execute(
                "UPDATE appointments SET notification_state = ?1
                 WHERE id = ?2 AND notification_state = ?3",
                &[json!(to.as_str()), json!(appointment_id), json!(from.as_str())],
            )
            .await?;
        if result.changes == 0 {
            // Someone else moved it first; the end state is what we wanted
            return Ok(Some(Transition::Unchanged(to)));
        }
    }
    Ok(Some(transition))
}

/// Mark the reminder confirmed and withdraw it from every channel.
pub async fn acknowledge(
    store: &dyn StoreAdapter,
    dispatcher: &Dispatcher,
    appointment_id: i64,
) -> Result<Acknowledgement, ReminderError> {
    let outcome = apply(store, appointment_id, NotificationState::acknowledge).await?;
    dispatcher.cancel(appointment_id).await;

    let ack = match outcome {
        None => Acknowledgement::Missing,
        Some(t) if t.changed() => Acknowledgement::Confirmed,
        Some(_) => Acknowledgement::AlreadyConfirmed,
    };
    log::info!("Reminder for appointment {} acknowledged: {:?}", appointment_id, ack);
    Ok(ack)
}

/// Make the appointment eligible for reminders again.
///
/// Returns whether the stored state changed.
pub async fn reset(
    store: &dyn StoreAdapter,
    dispatcher: &Dispatcher,
    appointment_id: i64,
) -> Result<bool, ReminderError> {
    let outcome = apply(store, appointment_id, NotificationState::reset)
        .await?
        .ok_or(ReminderError::NotFound(appointment_id))?;
    dispatcher.cancel(appointment_id).await;
    Ok(outcome.changed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_store;
    use crate::reminders::lifecycle::RedeliveryPolicy;
    use crate::reminders::test_support::{
        fixed_now, insert_appointment, insert_contact, notification_state, sample_appointment,
        FailingStore, RecordingChannel,
    };
    use chrono::Duration;

    #[tokio::test]
    async fn test_acknowledge_marks_sent_and_cancels_delivery() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        let id = insert_appointment(
            &store,
            contact,
            fixed_now() + Duration::minutes(30),
            "pending",
            "pending",
        )
        .await;
        let channel = RecordingChannel::new("in-app");
        let dispatcher =
            Dispatcher::new(vec![channel.clone()], RedeliveryPolicy::UntilAcknowledged);
        dispatcher
            .dispatch(&sample_appointment(id), fixed_now(), dispatcher.epoch())
            .await;

        let ack = acknowledge(&store, &dispatcher, id).await.expect("ack");
        assert_eq!(ack, Acknowledgement::Confirmed);
        assert_eq!(notification_state(&store, id).await, "sent");
        assert!(!dispatcher.pending().contains(id));
        assert_eq!(channel.cancelled(), vec![id]);
    }

    #[tokio::test]
    async fn test_acknowledge_twice_is_idempotent() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        let id = insert_appointment(&store, contact, fixed_now(), "pending", "pending").await;
        let dispatcher = Dispatcher::new(Vec::new(), RedeliveryPolicy::UntilAcknowledged);

        assert_eq!(acknowledge(&store, &dispatcher, id).await.unwrap(), Acknowledgement::Confirmed);
        assert_eq!(
            acknowledge(&store, &dispatcher, id).await.unwrap(),
            Acknowledgement::AlreadyConfirmed
        );
        assert_eq!(notification_state(&store, id).await, "sent");
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_appointment_succeeds() {
        let store = test_store();
        let dispatcher = Dispatcher::new(Vec::new(), RedeliveryPolicy::UntilAcknowledged);
        assert_eq!(
            acknowledge(&store, &dispatcher, 404).await.unwrap(),
            Acknowledgement::Missing
        );
    }

    #[tokio::test]
    async fn test_acknowledge_clears_legacy_failed_state() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        let id = insert_appointment(&store, contact, fixed_now(), "pending", "failed").await;
        let dispatcher = Dispatcher::new(Vec::new(), RedeliveryPolicy::UntilAcknowledged);

        assert_eq!(acknowledge(&store, &dispatcher, id).await.unwrap(), Acknowledgement::Confirmed);
        assert_eq!(notification_state(&store, id).await, "sent");
    }

    #[tokio::test]
    async fn test_acknowledge_store_failure_is_transient() {
        let dispatcher = Dispatcher::new(Vec::new(), RedeliveryPolicy::UntilAcknowledged);
        let err = acknowledge(&FailingStore, &dispatcher, 1).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_reset_returns_to_pending() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        let id = insert_appointment(&store, contact, fixed_now(), "pending", "sent").await;
        let dispatcher = Dispatcher::new(Vec::new(), RedeliveryPolicy::UntilAcknowledged);

        assert!(reset(&store, &dispatcher, id).await.unwrap());
        assert_eq!(notification_state(&store, id).await, "pending");
        assert!(!reset(&store, &dispatcher, id).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_unknown_appointment_is_not_found() {
        let store = test_store();
        let dispatcher = Dispatcher::new(Vec::new(), RedeliveryPolicy::UntilAcknowledged);
        let err = reset(&store, &dispatcher, 9).await.unwrap_err();
        assert!(matches!(err, ReminderError::NotFound(9)));
    }
}
