//! Per-appointment notification lifecycle.
//!
//! ```text
//!   Pending ──acknowledge──▶ Sent
//!      ▲                      │
//!      └──reset / reschedule──┘
//! ```
//!
//! Delivering a reminder never moves the state: only the user's confirmation
//! does. `Failed` can be read from older databases but no transition here
//! produces it; it leaves through the same acknowledge/reset edges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReminderError;
use crate::types::Appointment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    /// Reminder not yet confirmed; eligible for selection.
    Pending,
    /// Confirmed by the user.
    Sent,
    Failed,
}

impl NotificationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationState::Pending => "pending",
            NotificationState::Sent => "sent",
            NotificationState::Failed => "failed",
        }
    }

    /// State after the user confirms the reminder.
    pub fn acknowledge(self) -> Transition {
        match self {
            NotificationState::Sent => Transition::Unchanged(self),
            NotificationState::Pending | NotificationState::Failed => {
                Transition::Moved {
                    from: self,
                    to: NotificationState::Sent,
                }
            }
        }
    }

    /// State after an explicit reset.
    pub fn reset(self) -> Transition {
        match self {
            NotificationState::Pending => Transition::Unchanged(self),
            NotificationState::Sent | NotificationState::Failed => Transition::Moved {
                from: self,
                to: NotificationState::Pending,
            },
        }
    }

    /// State after the appointment was edited.
    ///
    /// A changed date or description is a new commitment, so an earlier
    /// confirmation must not suppress the reminder for it.
    pub fn after_edit(self, schedule_changed: bool) -> Transition {
        if schedule_changed {
            self.reset()
        } else {
            Transition::Unchanged(self)
        }
    }
}

impl fmt::Display for NotificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationState {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationState::Pending),
            "sent" => Ok(NotificationState::Sent),
            "failed" => Ok(NotificationState::Failed),
            other => Err(ReminderError::MalformedRecord(format!(
                "unknown notification state '{}'",
                other
            ))),
        }
    }
}

/// Outcome of applying a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged(NotificationState),
    Moved {
        from: NotificationState,
        to: NotificationState,
    },
}

impl Transition {
    pub fn state(&self) -> NotificationState {
        match self {
            Transition::Unchanged(state) => *state,
            Transition::Moved { to, .. } => *to,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Transition::Moved { .. })
    }
}

/// Whether an edit touches what the reminder is about.
pub fn schedule_changed(
    before: &Appointment,
    scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    description: Option<&Option<String>>,
) -> bool {
    let date_changed = scheduled_at.is_some_and(|at| at != before.scheduled_at);
    let description_changed = description.is_some_and(|d| {
        let new = d.as_deref().map(str::trim).filter(|s| !s.is_empty());
        new != before.description.as_deref()
    });
    date_changed || description_changed
}

/// How often a still-unconfirmed reminder is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RedeliveryPolicy {
    /// Every poll re-runs the channels until the user confirms.
    UntilAcknowledged,
    /// One delivery per process lifetime until confirmed or reset.
    Once,
}

impl RedeliveryPolicy {
    pub fn from_flag(redeliver_until_acknowledged: bool) -> Self {
        if redeliver_until_acknowledged {
            RedeliveryPolicy::UntilAcknowledged
        } else {
            RedeliveryPolicy::Once
        }
    }
}
