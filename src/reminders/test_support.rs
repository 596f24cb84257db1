//! Fakes and fixtures shared by the reminder tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::db::{ExecuteResult, Row, SqliteStore, StoreAdapter};
use crate::error::ReminderError;
use crate::reminders::activation::WindowFocus;
use crate::reminders::channels::{
    ActivationHandler, ActivationSlot, EventSink, Permission, SystemNotification, SystemNotifier,
};
use crate::reminders::dispatcher::{DeliveryOutcome, NotificationChannel};
use crate::reminders::lifecycle::NotificationState;
use crate::reminders::Clock;
use crate::types::{format_timestamp, Appointment, AppointmentStatus};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
}

pub async fn insert_contact(store: &dyn StoreAdapter, name: &str) -> i64 {
    store
        .execute("INSERT INTO contacts (name) VALUES (?1)", &[json!(name)])
        .await
        .expect("insert contact")
        .last_insert_rowid
}

pub async fn insert_appointment(
    store: &dyn StoreAdapter,
    contact_id: i64,
    scheduled_at: DateTime<Utc>,
    status: &str,
    notification_state: &str,
) -> i64 {
    store
        .execute(
            "INSERT INTO appointments
                 (contact_id, scheduled_at, description, status, notification_state)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            &[
                json!(contact_id),
                json!(format_timestamp(scheduled_at)),
                json!("Checkup"),
                json!(status),
                json!(notification_state),
            ],
        )
        .await
        .expect("insert appointment")
        .last_insert_rowid
}

pub async fn notification_state(store: &dyn StoreAdapter, id: i64) -> String {
    let row = store
        .get(
            "SELECT notification_state FROM appointments WHERE id = ?1",
            &[json!(id)],
        )
        .await
        .expect("get")
        .expect("row exists");
    row["notification_state"]
        .as_str()
        .expect("text column")
        .to_string()
}

pub fn sample_appointment(id: i64) -> Appointment {
    Appointment {
        id,
        contact_id: 1,
        contact_name: Some("Ada Lovelace".to_string()),
        scheduled_at: fixed_now() + Duration::minutes(45),
        description: Some("Dental checkup".to_string()),
        status: AppointmentStatus::Pending,
        notification_state: NotificationState::Pending,
    }
}

/// Store whose every call fails as if the database were unreachable.
pub struct FailingStore;

#[async_trait]
impl StoreAdapter for FailingStore {
    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<ExecuteResult, ReminderError> {
        Err(ReminderError::StoreUnavailable("database is locked".to_string()))
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, ReminderError> {
        Err(ReminderError::StoreUnavailable("database is locked".to_string()))
    }

    async fn get(&self, _sql: &str, _params: &[Value]) -> Result<Option<Row>, ReminderError> {
        Err(ReminderError::StoreUnavailable("database is locked".to_string()))
    }
}

/// Store wrapper counting `query` calls, one per poll cycle.
pub struct CountingStore<S> {
    inner: S,
    queries: AtomicUsize,
}

impl<S: StoreAdapter> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: StoreAdapter> StoreAdapter for CountingStore<S> {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, ReminderError> {
        self.inner.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ReminderError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(sql, params).await
    }

    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, ReminderError> {
        self.inner.get(sql, params).await
    }
}

pub fn counting_sqlite() -> Arc<CountingStore<SqliteStore>> {
    Arc::new(CountingStore::new(crate::db::test_utils::test_store()))
}

/// Store wrapper that holds back writes whose SQL contains `pattern`, so a
/// test can land another operation between an edit's read and its write.
pub struct DelayedStore<S> {
    inner: S,
    pattern: &'static str,
    delay: StdDuration,
}

impl<S: StoreAdapter> DelayedStore<S> {
    pub fn new(inner: S, pattern: &'static str, delay: StdDuration) -> Self {
        Self {
            inner,
            pattern,
            delay,
        }
    }
}

#[async_trait]
impl<S: StoreAdapter> StoreAdapter for DelayedStore<S> {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, ReminderError> {
        if sql.contains(self.pattern) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ReminderError> {
        self.inner.query(sql, params).await
    }

    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, ReminderError> {
        self.inner.get(sql, params).await
    }
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Channel that records what it was asked to do.
pub struct RecordingChannel {
    name: &'static str,
    fail: bool,
    delay: Option<StdDuration>,
    delivered: Mutex<Vec<i64>>,
    cancelled: Mutex<Vec<i64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingChannel {
    fn build(name: &'static str, fail: bool, delay: Option<StdDuration>) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail,
            delay,
            delivered: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn new(name: &'static str) -> Arc<Self> {
        Self::build(name, false, None)
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Self::build(name, true, None)
    }

    /// Channel that sleeps during delivery, for overlap checks.
    pub fn slow(name: &'static str, delay: StdDuration) -> Arc<Self> {
        Self::build(name, false, Some(delay))
    }

    pub fn delivered(&self) -> Vec<i64> {
        self.delivered.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<i64> {
        self.cancelled.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn deliver(&self, appointment: &Appointment) -> Result<DeliveryOutcome, ReminderError> {
        if self.fail {
            return Err(ReminderError::channel_failure(self.name, "device unavailable"));
        }
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.delivered.lock().push(appointment.id);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(DeliveryOutcome::Delivered)
    }

    async fn cancel(&self, appointment_id: i64) {
        self.cancelled.lock().push(appointment_id);
    }
}

/// Event sink that keeps every emitted event.
#[derive(Default)]
pub struct RecordingSink {
    fail: bool,
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    pub fn events_named(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit_json(&self, event: &str, payload: Value) -> Result<(), String> {
        if self.fail {
            return Err("webview is gone".to_string());
        }
        self.events.lock().push((event.to_string(), payload));
        Ok(())
    }
}

/// Platform notifier with scripted permission answers.
pub struct FakeNotifier {
    state: Mutex<Permission>,
    answer: Permission,
    requests: AtomicUsize,
    shown: Mutex<Vec<SystemNotification>>,
    activations: ActivationSlot,
}

impl FakeNotifier {
    /// `state` is the current permission; `answer` is what a prompt resolves to.
    pub fn new(state: Permission, answer: Permission) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            answer,
            requests: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
            activations: ActivationSlot::default(),
        })
    }

    /// The user clicks the notification shown for `appointment_id`.
    pub fn click(&self, appointment_id: i64) -> bool {
        self.activations.fire(appointment_id)
    }

    pub fn set_state(&self, state: Permission) {
        *self.state.lock() = state;
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn shown(&self) -> Vec<SystemNotification> {
        self.shown.lock().clone()
    }
}

#[async_trait]
impl SystemNotifier for FakeNotifier {
    async fn permission_state(&self) -> Result<Permission, String> {
        Ok(*self.state.lock())
    }

    async fn request_permission(&self) -> Result<Permission, String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = self.answer;
        Ok(self.answer)
    }

    async fn show(&self, notification: &SystemNotification) -> Result<(), String> {
        self.shown.lock().push(notification.clone());
        Ok(())
    }

    fn on_activated(&self, handler: ActivationHandler) {
        self.activations.set(handler);
    }
}

/// Counts requests to bring the main window forward.
#[derive(Default)]
pub struct RecordingFocus {
    raised: AtomicUsize,
}

impl RecordingFocus {
    pub fn raised(&self) -> usize {
        self.raised.load(Ordering::SeqCst)
    }
}

impl WindowFocus for RecordingFocus {
    fn focus_main_window(&self) {
        self.raised.fetch_add(1, Ordering::SeqCst);
    }
}
