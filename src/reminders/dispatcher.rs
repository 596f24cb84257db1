//! Fan-out of a due appointment to every enabled notification channel.
//!
//! Channels are independent: each one's outcome is recorded in the
//! [`DispatchReport`] and a failing channel never stops the others. The
//! dispatcher also owns the process-local pending-delivery map, which is written
//! before any channel runs and cleared on acknowledgement.
//!
//! A poll cycle selects its appointments before it dispatches them, so the user
//! can confirm one in between. Every [`Dispatcher::cancel`] is stamped with a
//! sequence number; a dispatch started under an older [`Epoch`] sees the stamp
//! and stops before recording or before the next channel runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::ReminderError;
use crate::reminders::lifecycle::RedeliveryPolicy;
use crate::types::Appointment;

/// A way of telling the user about an appointment.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, appointment: &Appointment) -> Result<DeliveryOutcome, ReminderError>;

    /// Withdraw anything still outstanding for this appointment.
    async fn cancel(&self, _appointment_id: i64) {}
}

/// What a channel did with a reminder it was handed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum DeliveryOutcome {
    Delivered,
    Skipped { reason: String },
}

impl DeliveryOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        DeliveryOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ChannelOutcome {
    Delivered,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReport {
    pub channel: &'static str,
    #[serde(flatten)]
    pub outcome: ChannelOutcome,
}

/// Per-appointment result of one dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub appointment_id: i64,
    /// Number of dispatches for this appointment since it became pending in this process.
    pub attempt: u32,
    /// True when the redelivery policy held this dispatch back.
    pub suppressed: bool,
    /// True when the appointment was withdrawn while this dispatch was pending.
    pub withdrawn: bool,
    pub channels: Vec<ChannelReport>,
}

impl DispatchReport {
    pub fn delivered_any(&self) -> bool {
        self.channels
            .iter()
            .any(|c| c.outcome == ChannelOutcome::Delivered)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ChannelReport> {
        self.channels
            .iter()
            .filter(|c| matches!(c.outcome, ChannelOutcome::Failed { .. }))
    }
}

/// Bookkeeping for a reminder that has been dispatched but not confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDelivery {
    pub first_dispatched_at: DateTime<Utc>,
    pub last_dispatched_at: DateTime<Utc>,
    pub attempts: u32,
}

/// In-flight reminders keyed by appointment id.
#[derive(Default)]
pub struct PendingDeliveries {
    inner: Mutex<HashMap<i64, PendingDelivery>>,
}

impl PendingDeliveries {
    /// Record a dispatch and return the updated entry.
    pub fn record(&self, appointment_id: i64, now: DateTime<Utc>) -> PendingDelivery {
        let mut guard = self.inner.lock();
        let entry = guard.entry(appointment_id).or_insert(PendingDelivery {
            first_dispatched_at: now,
            last_dispatched_at: now,
            attempts: 0,
        });
        entry.last_dispatched_at = now;
        entry.attempts += 1;
        *entry
    }

    pub fn get(&self, appointment_id: i64) -> Option<PendingDelivery> {
        self.inner.lock().get(&appointment_id).copied()
    }

    pub fn contains(&self, appointment_id: i64) -> bool {
        self.inner.lock().contains_key(&appointment_id)
    }

    pub fn remove(&self, appointment_id: i64) -> Option<PendingDelivery> {
        self.inner.lock().remove(&appointment_id)
    }

    /// Drop entries for appointments that are no longer due.
    pub fn retain_due(&self, due: &HashSet<i64>) -> usize {
        let mut guard = self.inner.lock();
        let before = guard.len();
        guard.retain(|id, _| due.contains(id));
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Point in the dispatcher's withdrawal history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(u64);

/// Withdrawal stamps: `seq` counts every cancel, `by_id` keeps the latest per id.
#[derive(Default)]
struct Withdrawals {
    seq: u64,
    by_id: HashMap<i64, u64>,
}

pub struct Dispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    disabled: RwLock<HashSet<&'static str>>,
    policy: RwLock<RedeliveryPolicy>,
    pending: PendingDeliveries,
    withdrawals: Mutex<Withdrawals>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>, policy: RedeliveryPolicy) -> Self {
        Self {
            channels,
            disabled: RwLock::new(HashSet::new()),
            policy: RwLock::new(policy),
            pending: PendingDeliveries::default(),
            withdrawals: Mutex::new(Withdrawals::default()),
        }
    }

    pub fn policy(&self) -> RedeliveryPolicy {
        *self.policy.read()
    }

    pub fn set_policy(&self, policy: RedeliveryPolicy) {
        *self.policy.write() = policy;
    }

    /// Replace the set of channels that are skipped entirely.
    pub fn set_disabled(&self, names: HashSet<&'static str>) {
        *self.disabled.write() = names;
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn pending(&self) -> &PendingDeliveries {
        &self.pending
    }

    /// Current position in the withdrawal history.
    pub fn epoch(&self) -> Epoch {
        Epoch(self.withdrawals.lock().seq)
    }

    /// Start a poll cycle. Call before selecting appointments and pass the
    /// returned epoch to every [`Dispatcher::dispatch`] in the cycle.
    ///
    /// Stamps older than the returned epoch can no longer matter, so they are
    /// dropped here. Cycles must not overlap.
    pub fn begin_cycle(&self) -> Epoch {
        let mut withdrawals = self.withdrawals.lock();
        withdrawals.by_id.clear();
        Epoch(withdrawals.seq)
    }

    /// Whether the appointment was cancelled after `epoch`.
    pub fn withdrawn_since(&self, appointment_id: i64, epoch: Epoch) -> bool {
        self.withdrawals
            .lock()
            .by_id
            .get(&appointment_id)
            .is_some_and(|stamp| *stamp > epoch.0)
    }

    /// Deliver one due appointment through every enabled channel.
    ///
    /// `epoch` is the point at which the appointment was known to be due;
    /// a cancel after it stops the dispatch.
    pub async fn dispatch(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
        epoch: Epoch,
    ) -> DispatchReport {
        let entry = {
            // Checked and recorded under the withdrawal lock, so a cancel
            // either sees this record or is seen here.
            let withdrawals = self.withdrawals.lock();
            if withdrawals
                .by_id
                .get(&appointment.id)
                .is_some_and(|stamp| *stamp > epoch.0)
            {
                log::debug!(
                    "Dispatcher: appointment {} was withdrawn before delivery",
                    appointment.id
                );
                return DispatchReport {
                    appointment_id: appointment.id,
                    attempt: 0,
                    suppressed: false,
                    withdrawn: true,
                    channels: Vec::new(),
                };
            }

            if self.policy() == RedeliveryPolicy::Once {
                if let Some(previous) = self.pending.get(appointment.id) {
                    log::debug!(
                        "Dispatcher: appointment {} already delivered at {}, awaiting confirmation",
                        appointment.id,
                        previous.last_dispatched_at
                    );
                    return DispatchReport {
                        appointment_id: appointment.id,
                        attempt: previous.attempts,
                        suppressed: true,
                        withdrawn: false,
                        channels: Vec::new(),
                    };
                }
            }

            self.pending.record(appointment.id, now)
        };

        let disabled = self.disabled.read().clone();
        let mut reports = Vec::with_capacity(self.channels.len());
        let mut withdrawn = false;
        for channel in &self.channels {
            if disabled.contains(channel.name()) {
                continue;
            }
            if self.withdrawn_since(appointment.id, epoch) {
                withdrawn = true;
                break;
            }
            let outcome = match channel.deliver(appointment).await {
                Ok(DeliveryOutcome::Delivered) => ChannelOutcome::Delivered,
                Ok(DeliveryOutcome::Skipped { reason }) => {
                    log::debug!(
                        "Dispatcher: {} skipped appointment {}: {}",
                        channel.name(),
                        appointment.id,
                        reason
                    );
                    ChannelOutcome::Skipped { reason }
                }
                Err(e) => {
                    log::warn!("Dispatcher: appointment {}: {}", appointment.id, e);
                    ChannelOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            reports.push(ChannelReport {
                channel: channel.name(),
                outcome,
            });
        }

        // A cancel that ran while a channel was delivering may have been undone
        // by that delivery (an in-app entry shown again); withdraw once more.
        if withdrawn || self.withdrawn_since(appointment.id, epoch) {
            withdrawn = true;
            log::debug!(
                "Dispatcher: appointment {} withdrawn during delivery",
                appointment.id
            );
            self.withdraw(appointment.id).await;
        }

        DispatchReport {
            appointment_id: appointment.id,
            attempt: entry.attempts,
            suppressed: false,
            withdrawn,
            channels: reports,
        }
    }

    /// Forget an appointment's pending delivery and withdraw it from every channel.
    ///
    /// Dispatches started before this call stop short of delivering it.
    pub async fn cancel(&self, appointment_id: i64) {
        {
            let mut withdrawals = self.withdrawals.lock();
            withdrawals.seq += 1;
            let seq = withdrawals.seq;
            withdrawals.by_id.insert(appointment_id, seq);
        }
        self.withdraw(appointment_id).await;
    }

    async fn withdraw(&self, appointment_id: i64) {
        self.pending.remove(appointment_id);
        for channel in &self.channels {
            channel.cancel(appointment_id).await;
        }
    }
}
