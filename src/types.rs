use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Row;
use crate::error::ReminderError;
use crate::reminders::lifecycle::NotificationState;
use crate::reminders::ReminderConfig;

/// Storage format for timestamps: UTC in SQLite's native `datetime()` form.
const STORE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Application configuration stored in `~/.rendezvous/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub reminders: ReminderConfig,
    /// Overrides the default `~/.rendezvous/rendezvous.db` location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

/// Lifecycle of the appointment itself. Only `Pending` appointments get reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Completed,
    Canceled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AppointmentStatus::Pending),
            "completed" => Ok(AppointmentStatus::Completed),
            "canceled" => Ok(AppointmentStatus::Canceled),
            other => Err(ReminderError::MalformedRecord(format!(
                "unknown appointment status '{}'",
                other
            ))),
        }
    }
}

/// Read view of an appointment row joined with its contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: i64,
    pub contact_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: AppointmentStatus,
    pub notification_state: NotificationState,
}

impl Appointment {
    /// Decode a store row (`appointments` columns plus optional `contact_name`).
    pub fn from_row(row: &Row) -> Result<Self, ReminderError> {
        let id = row_i64(row, "id")?;
        let contact_id = row_i64(row, "contact_id")?;
        let scheduled_at = parse_timestamp(&row_string(row, "scheduled_at")?)?;
        let status = row_string(row, "status")?.parse()?;
        let notification_state = row_string(row, "notification_state")?.parse()?;

        Ok(Appointment {
            id,
            contact_id,
            contact_name: row_opt_string(row, "contact_name"),
            scheduled_at,
            description: row_opt_string(row, "description").filter(|d| !d.trim().is_empty()),
            status,
            notification_state,
        })
    }

    /// Name shown in reminders, falling back to the contact reference.
    pub fn display_name(&self) -> String {
        self.contact_name
            .clone()
            .unwrap_or_else(|| format!("Contact #{}", self.contact_id))
    }
}

/// A row from the `contacts` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub registered_at: String,
}

impl Contact {
    pub fn from_row(row: &Row) -> Result<Self, ReminderError> {
        Ok(Contact {
            id: row_i64(row, "id")?,
            name: row_string(row, "name")?,
            phone: row_opt_string(row, "phone"),
            email: row_opt_string(row, "email"),
            address: row_opt_string(row, "address"),
            notes: row_opt_string(row, "notes"),
            registered_at: row_string(row, "registered_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    pub contact_id: i64,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Edit of an existing appointment. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentUpdate {
    #[serde(default)]
    pub contact_id: Option<i64>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears the description.
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
}

fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Format a timestamp for storage and for window-query parameters.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(STORE_TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp.
///
/// Accepts the storage form, RFC 3339, `YYYY-MM-DDTHH:MM[:SS]` and date-only
/// values (midnight UTC), all of which exist in older databases.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ReminderError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in [
        STORE_TIMESTAMP_FORMAT,
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }

    Err(ReminderError::MalformedRecord(format!(
        "unrecognized timestamp '{}'",
        raw
    )))
}

fn row_i64(row: &Row, column: &str) -> Result<i64, ReminderError> {
    row.get(column).and_then(Value::as_i64).ok_or_else(|| {
        ReminderError::MalformedRecord(format!("missing integer column '{}'", column))
    })
}

fn row_string(row: &Row, column: &str) -> Result<String, ReminderError> {
    row.get(column)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ReminderError::MalformedRecord(format!("missing text column '{}'", column)))
}

fn row_opt_string(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}
