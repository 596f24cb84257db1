//! Error types for the reminder engine
//!
//! Errors are classified by how the engine recovers:
//! - Transient: the store could not be reached; the poll cycle is skipped and
//!   retried on the next tick
//! - Per-channel: one delivery channel failed; the other channels still run
//! - Rejected: invalid configuration or a record that does not exist

use thiserror::Error;

use crate::db::DbError;

/// Error types for reminder selection, delivery and acknowledgement
#[derive(Debug, Error)]
pub enum ReminderError {
    // Transient
    #[error("Appointment store unavailable: {0}")]
    StoreUnavailable(String),

    // Per-channel
    #[error("{channel} channel failed to deliver: {message}")]
    ChannelDeliveryFailure {
        channel: &'static str,
        message: String,
    },

    // Rejected
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed appointment record: {0}")]
    MalformedRecord(String),

    #[error("Appointment {0} not found")]
    NotFound(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ReminderError {
    /// Returns true if the next poll may succeed without user intervention
    pub fn is_transient(&self) -> bool {
        matches!(self, ReminderError::StoreUnavailable(_))
    }

    pub fn channel_failure(channel: &'static str, message: impl Into<String>) -> Self {
        ReminderError::ChannelDeliveryFailure {
            channel,
            message: message.into(),
        }
    }
}

impl From<DbError> for ReminderError {
    fn from(err: DbError) -> Self {
        ReminderError::StoreUnavailable(err.to_string())
    }
}
