//! Reminder window selection.
//!
//! An appointment is due when it is still `pending`, its reminder has not been
//! confirmed, and its time falls in `(now - grace, now + lookahead]`. Selection
//! is re-evaluated from scratch on every poll; nothing expires explicitly, an
//! appointment whose time leaves the window simply stops being selected.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::db::StoreAdapter;
use crate::error::ReminderError;
use crate::types::{format_timestamp, Appointment};

const SELECT_DUE_SQL: &str = "SELECT a.id, a.contact_id, a.scheduled_at, a.description,
            a.status, a.notification_state, c.name AS contact_name
     FROM appointments a
     LEFT JOIN contacts c ON c.id = a.contact_id
     WHERE a.status = 'pending'
       AND a.notification_state = 'pending'
       AND datetime(a.scheduled_at) > datetime(?1)
       AND datetime(a.scheduled_at) <= datetime(?2)
     ORDER BY datetime(a.scheduled_at) ASC, a.id ASC";

/// Bounds of the "remind now" window relative to an evaluation instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    lookahead: Duration,
    grace: Duration,
}

impl ReminderWindow {
    pub fn new(lookahead: Duration, grace: Duration) -> Result<Self, ReminderError> {
        if lookahead <= Duration::zero() {
            return Err(ReminderError::Configuration(
                "lookahead window must be positive".to_string(),
            ));
        }
        if grace < Duration::zero() {
            return Err(ReminderError::Configuration(
                "grace period cannot be negative".to_string(),
            ));
        }
        Ok(Self { lookahead, grace })
    }

    /// Exclusive lower and inclusive upper bound for `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.grace, now + self.lookahead)
    }

    pub fn contains(&self, now: DateTime<Utc>, scheduled_at: DateTime<Utc>) -> bool {
        let (after, until) = self.bounds(now);
        scheduled_at > after && scheduled_at <= until
    }
}

/// Appointments due for a reminder at `now`, earliest first.
///
/// Undecodable rows are logged and skipped so one bad record never hides the rest.
pub async fn select_due(
    store: &dyn StoreAdapter,
    now: DateTime<Utc>,
    window: &ReminderWindow,
) -> Result<Vec<Appointment>, ReminderError> {
    let (after, until) = window.bounds(now);
    let rows = store
        .query(
            SELECT_DUE_SQL,
            &[json!(format_timestamp(after)), json!(format_timestamp(until))],
        )
        .await?;

    let mut due = Vec::with_capacity(rows.len());
    for row in &rows {
        match Appointment::from_row(row) {
            Ok(appointment) => due.push(appointment),
            Err(e) => log::warn!("Reminder window: skipping row {:?}: {}", row.get("id"), e),
        }
    }
    Ok(due)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_store;
    use crate::reminders::test_support::{insert_appointment, insert_contact, FailingStore};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn two_hours() -> ReminderWindow {
        ReminderWindow::new(Duration::minutes(120), Duration::zero()).unwrap()
    }

    #[test]
    fn test_window_rejects_non_positive_lookahead() {
        assert!(ReminderWindow::new(Duration::zero(), Duration::zero()).is_err());
        assert!(ReminderWindow::new(Duration::minutes(10), Duration::minutes(-1)).is_err());
    }

    #[test]
    fn test_window_bounds_are_half_open() {
        let window = two_hours();
        assert!(!window.contains(now(), now()));
        assert!(window.contains(now(), now() + Duration::seconds(1)));
        assert!(window.contains(now(), now() + Duration::minutes(120)));
        assert!(!window.contains(now(), now() + Duration::minutes(121)));
    }

    #[tokio::test]
    async fn test_selects_appointment_inside_window() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        let id = insert_appointment(
            &store,
            contact,
            now() + Duration::minutes(90),
            "pending",
            "pending",
        )
        .await;

        let due = select_due(&store, now(), &two_hours()).await.expect("select");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].contact_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_excludes_appointment_beyond_lookahead() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        insert_appointment(
            &store,
            contact,
            now() + Duration::minutes(150),
            "pending",
            "pending",
        )
        .await;

        let due = select_due(&store, now(), &two_hours()).await.expect("select");
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_excludes_past_canceled_completed_and_confirmed() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        let soon = now() + Duration::minutes(30);
        insert_appointment(
            &store,
            contact,
            now() - Duration::minutes(5),
            "pending",
            "pending",
        )
        .await;
        insert_appointment(&store, contact, soon, "canceled", "pending").await;
        insert_appointment(&store, contact, soon, "completed", "pending").await;
        insert_appointment(&store, contact, soon, "pending", "sent").await;
        insert_appointment(&store, contact, soon, "pending", "failed").await;

        let due = select_due(&store, now(), &two_hours()).await.expect("select");
        assert!(due.is_empty(), "nothing should be due: {:?}", due);
    }

    #[tokio::test]
    async fn test_boundaries_match_window_predicate() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        let at_now = insert_appointment(&store, contact, now(), "pending", "pending").await;
        let at_edge =
            insert_appointment(
                &store,
                contact,
                now() + Duration::minutes(120),
                "pending",
                "pending",
            )
            .await;

        let due = select_due(&store, now(), &two_hours()).await.expect("select");
        let ids: Vec<i64> = due.iter().map(|a| a.id).collect();
        assert!(!ids.contains(&at_now));
        assert!(ids.contains(&at_edge));
    }

    #[tokio::test]
    async fn test_grace_keeps_just_started_appointments() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        let started = insert_appointment(
            &store,
            contact,
            now() - Duration::minutes(10),
            "pending",
            "pending",
        )
        .await;

        let window = ReminderWindow::new(Duration::minutes(120), Duration::minutes(15)).unwrap();
        let due = select_due(&store, now(), &window).await.expect("select");
        assert_eq!(due.iter().map(|a| a.id).collect::<Vec<_>>(), vec![started]);
    }

    #[tokio::test]
    async fn test_results_ordered_earliest_first() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        let late = insert_appointment(
            &store,
            contact,
            now() + Duration::minutes(100),
            "pending",
            "pending",
        )
        .await;
        let early = insert_appointment(
            &store,
            contact,
            now() + Duration::minutes(10),
            "pending",
            "pending",
        )
        .await;
        let middle = insert_appointment(
            &store,
            contact,
            now() + Duration::minutes(50),
            "pending",
            "pending",
        )
        .await;

        let due = select_due(&store, now(), &two_hours()).await.expect("select");
        let ids: Vec<i64> = due.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![early, middle, late]);
    }

    #[tokio::test]
    async fn test_date_only_legacy_rows_are_selected() {
        let store = test_store();
        let contact = insert_contact(&store, "Ada").await;
        store
            .execute(
                "INSERT INTO appointments (contact_id, scheduled_at) VALUES (?1, '2026-10-19')",
                &[json!(contact)],
            )
            .await
            .expect("insert");

        let late_evening = Utc.with_ymd_and_hms(2026, 10, 18, 23, 0, 0).unwrap();
        let due = select_due(&store, late_evening, &two_hours()).await.expect("select");
        assert_eq!(due.len(), 1);
        assert_eq!(
            due[0].scheduled_at,
            Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_store_failure_propagates_as_transient() {
        let err = select_due(&FailingStore, now(), &two_hours())
            .await
            .expect_err("must fail");
        assert!(err.is_transient());
    }
}
