//! Contact and appointment record operations.
//!
//! Everything goes through [`StoreAdapter`] so the engine and these operations
//! share one connection and one set of query shapes.

use serde_json::{json, Value};

use crate::db::StoreAdapter;
use crate::error::ReminderError;
use crate::reminders::lifecycle::{schedule_changed, Transition};
use crate::types::{
    format_timestamp, Appointment, AppointmentStatus, AppointmentUpdate, Contact, NewAppointment,
    NewContact,
};

const SELECT_APPOINTMENT: &str = "SELECT a.id, a.contact_id, a.scheduled_at, a.description,
            a.status, a.notification_state, c.name AS contact_name
     FROM appointments a
     LEFT JOIN contacts c ON c.id = a.contact_id";

/// Trim optional free text, mapping blank to `NULL`.
fn text_param(value: Option<&str>) -> Value {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => json!(s),
        None => Value::Null,
    }
}

// =============================================================================
// Contacts
// =============================================================================

pub async fn create_contact(
    store: &dyn StoreAdapter,
    contact: &NewContact,
) -> Result<Contact, ReminderError> {
    let name = contact.name.trim();
    if name.is_empty() {
        return Err(ReminderError::InvalidInput("contact name is required".to_string()));
    }

    let result = store
        .execute(
            "INSERT INTO contacts (name, phone, email, address, notes) VALUES (?1, ?2, ?3, ?4, ?5)",
            &[
                json!(name),
                text_param(contact.phone.as_deref()),
                text_param(contact.email.as_deref()),
                text_param(contact.address.as_deref()),
                text_param(contact.notes.as_deref()),
            ],
        )
        .await?;

    get_contact(store, result.last_insert_rowid)
        .await?
        .ok_or_else(|| ReminderError::StoreUnavailable("inserted contact vanished".to_string()))
}

pub async fn get_contact(
    store: &dyn StoreAdapter,
    id: i64,
) -> Result<Option<Contact>, ReminderError> {
    store
        .get("SELECT * FROM contacts WHERE id = ?1", &[json!(id)])
        .await?
        .map(|row| Contact::from_row(&row))
        .transpose()
}

pub async fn list_contacts(store: &dyn StoreAdapter) -> Result<Vec<Contact>, ReminderError> {
    let rows = store
        .query("SELECT * FROM contacts ORDER BY name COLLATE NOCASE, id", &[])
        .await?;
    rows.iter().map(Contact::from_row).collect()
}

// =============================================================================
// Appointments
// =============================================================================

pub async fn get_appointment(
    store: &dyn StoreAdapter,
    id: i64,
) -> Result<Option<Appointment>, ReminderError> {
    store
        .get(&format!("{} WHERE a.id = ?1", SELECT_APPOINTMENT), &[json!(id)])
        .await?
        .map(|row| Appointment::from_row(&row))
        .transpose()
}

/// All appointments, most recent first. Undecodable rows are skipped.
pub async fn list_appointments(
    store: &dyn StoreAdapter,
) -> Result<Vec<Appointment>, ReminderError> {
    let rows = store
        .query(
            &format!("{} ORDER BY datetime(a.scheduled_at) DESC, a.id DESC", SELECT_APPOINTMENT),
            &[],
        )
        .await?;

    Ok(rows
        .iter()
        .filter_map(|row| match Appointment::from_row(row) {
            Ok(a) => Some(a),
            Err(e) => {
                log::warn!("Appointments: skipping row {:?}: {}", row.get("id"), e);
                None
            }
        })
        .collect())
}

async fn ensure_contact(store: &dyn StoreAdapter, contact_id: i64) -> Result<(), ReminderError> {
    if get_contact(store, contact_id).await?.is_none() {
        return Err(ReminderError::InvalidInput(format!(
            "contact {} does not exist",
            contact_id
        )));
    }
    Ok(())
}

/// Insert a new appointment. It starts `pending` with its reminder unconfirmed.
pub async fn create_appointment(
    store: &dyn StoreAdapter,
    appointment: &NewAppointment,
) -> Result<Appointment, ReminderError> {
    ensure_contact(store, appointment.contact_id).await?;

    let result = store
        .execute(
            "INSERT INTO appointments (contact_id, scheduled_at, description) VALUES (?1, ?2, ?3)",
            &[
                json!(appointment.contact_id),
                json!(format_timestamp(appointment.scheduled_at)),
                text_param(appointment.description.as_deref()),
            ],
        )
        .await?;

    log::info!(
        "Appointments: created {} for contact {} at {}",
        result.last_insert_rowid,
        appointment.contact_id,
        appointment.scheduled_at
    );
    get_appointment(store, result.last_insert_rowid)
        .await?
        .ok_or(ReminderError::NotFound(result.last_insert_rowid))
}

/// Apply an edit. A new time or description puts a confirmed reminder back to
/// pending in the same write.
///
/// Only the columns the edit names are written. `notification_state` is never
/// written back from the read, so a confirmation that lands between the read and
/// the write survives unless the edit itself re-arms the reminder.
pub async fn update_appointment(
    store: &dyn StoreAdapter,
    id: i64,
    update: &AppointmentUpdate,
) -> Result<(Appointment, Transition), ReminderError> {
    let before = get_appointment(store, id)
        .await?
        .ok_or(ReminderError::NotFound(id))?;

    if let Some(contact_id) = update.contact_id {
        if contact_id != before.contact_id {
            ensure_contact(store, contact_id).await?;
        }
    }

    let changed = schedule_changed(&before, update.scheduled_at, update.description.as_ref());
    let transition = before.notification_state.after_edit(changed);

    let mut columns: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(contact_id) = update.contact_id {
        columns.push("contact_id");
        params.push(json!(contact_id));
    }
    if let Some(scheduled_at) = update.scheduled_at {
        columns.push("scheduled_at");
        params.push(json!(format_timestamp(scheduled_at)));
    }
    if let Some(description) = &update.description {
        columns.push("description");
        params.push(text_param(description.as_deref()));
    }
    if let Some(status) = update.status {
        columns.push("status");
        params.push(json!(status.as_str()));
    }

    let mut assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", column, i + 1))
        .collect();
    if changed {
        assignments.push("notification_state = 'pending'".to_string());
    }

    if !assignments.is_empty() {
        params.push(json!(id));
        let sql = format!(
            "UPDATE appointments SET {} WHERE id = ?{}",
            assignments.join(", "),
            params.len()
        );
        let result = store.execute(&sql, &params).await?;
        if result.changes == 0 {
            return Err(ReminderError::NotFound(id));
        }
    }

    if transition.changed() {
        log::info!("Appointments: {} rescheduled, reminder re-armed", id);
    }
    let after = get_appointment(store, id)
        .await?
        .ok_or(ReminderError::NotFound(id))?;
    Ok((after, transition))
}

pub async fn set_status(
    store: &dyn StoreAdapter,
    id: i64,
    status: AppointmentStatus,
) -> Result<(), ReminderError> {
    let result = store
        .execute(
            "UPDATE appointments SET status = ?1 WHERE id = ?2",
            &[json!(status.as_str()), json!(id)],
        )
        .await?;
    if result.changes == 0 {
        return Err(ReminderError::NotFound(id));
    }
    Ok(())
}

/// Returns whether a row was deleted.
pub async fn delete_appointment(store: &dyn StoreAdapter, id: i64) -> Result<bool, ReminderError> {
    let result = store
        .execute("DELETE FROM appointments WHERE id = ?1", &[json!(id)])
        .await?;
    Ok(result.changes > 0)
}
