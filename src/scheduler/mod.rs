//! Scheduled-message delivery.
//!
//! A worker sweeps the `scheduled_messages` collection once a minute and
//! delivers everything due. Recurring schedules are re-armed for the next
//! occurrence from their anchor day; one-shot schedules are marked
//! delivered. A schedule whose delivery keeps failing is marked failed after
//! `schedule_max_retries` attempts and never retried again.

#[cfg(test)]
mod tests;

use crate::config::EngineConfig;
use crate::firestore::models::{Direction, FieldOperator};
use crate::firestore::query::Query;
use crate::firestore::{FirestoreClient, FirestoreError};
use crate::types::{ChatMessage, MessageStatus, Recurrence, ScheduleStatus, ScheduledMessage};
use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// The occurrence after `after` for the given recurrence.
///
/// Monthly and yearly schedules snap back to `anchor_day` whenever the
/// target month is long enough, clamping to the month's last day otherwise.
/// A schedule anchored on the 31st fires Jan 31, Feb 29 (leap) or Feb 28,
/// then Mar 31.
pub fn next_occurrence(
    recurrence: Recurrence,
    after: DateTime<Utc>,
    anchor_day: u32,
) -> DateTime<Utc> {
    match recurrence {
        Recurrence::Daily => after + Duration::days(1),
        Recurrence::Weekly => after + Duration::days(7),
        Recurrence::Monthly => {
            let (year, month) = match after.month() {
                12 => (after.year() + 1, 1),
                m => (after.year(), m + 1),
            };
            anchored(year, month, anchor_day, after)
        }
        Recurrence::Yearly => anchored(after.year() + 1, after.month(), anchor_day, after),
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
            if leap {
                29
            } else {
                28
            }
        }
    }
}

fn anchored(year: i32, month: u32, anchor_day: u32, template: DateTime<Utc>) -> DateTime<Utc> {
    let day = anchor_day.clamp(1, days_in_month(year, month));
    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) => Utc.from_utc_datetime(&date.and_time(template.time())),
        // `day` is clamped into the month, so this arm never fires.
        None => template + Duration::days(1),
    }
}

/// Sweeps due schedules out of Firestore and into their chats.
pub struct ScheduleWorker {
    firestore: FirestoreClient,
    config: EngineConfig,
}

impl ScheduleWorker {
    pub fn new(firestore: FirestoreClient, config: EngineConfig) -> Self {
        Self { firestore, config }
    }

    /// Runs until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.schedule_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_due(Utc::now()).await {
                        Ok(0) => {}
                        Ok(delivered) => tracing::info!(delivered, "delivered scheduled messages"),
                        Err(e) => tracing::error!(error = %e, "schedule sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("schedule worker stopping");
                    break;
                }
            }
        }
    }

    /// One sweep over everything due at `now`; returns how many messages
    /// were delivered. Public so callers (and tests) can sweep without
    /// waiting for the interval.
    pub async fn sweep_due(&self, now: DateTime<Utc>) -> Result<u32, FirestoreError> {
        let query = Query::collection("scheduled_messages")
            .filter("status", FieldOperator::Equal, "pending")?
            // Stored `scheduledAt` strings carry a fixed six-digit fraction;
            // the cutoff must match or the lexicographic comparison misses
            // whole-second values ('.' sorts before 'Z').
            .filter(
                "scheduledAt",
                FieldOperator::LessThanOrEqual,
                now.to_rfc3339_opts(SecondsFormat::Micros, true),
            )?
            .order_by("scheduledAt", Direction::Ascending);

        let mut delivered = 0;
        for hit in self.firestore.run_query(query).await? {
            let schedule: ScheduledMessage = match hit.data() {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(doc = hit.relative_path(), error = %e, "malformed schedule, skipping");
                    continue;
                }
            };
            let schedule_path = hit.relative_path().to_string();

            match self.deliver(&schedule, now).await {
                Ok(()) => {
                    delivered += 1;
                    self.advance(&schedule, &schedule_path, now).await?;
                }
                Err(e) => {
                    tracing::warn!(schedule = %schedule.id, error = %e, "scheduled delivery failed");
                    self.record_failure(&schedule, &schedule_path).await?;
                }
            }
        }
        Ok(delivered)
    }

    async fn deliver(
        &self,
        schedule: &ScheduledMessage,
        now: DateTime<Utc>,
    ) -> Result<(), FirestoreError> {
        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: schedule.chat_id.clone(),
            sender_id: schedule.sender_id.clone(),
            body: Some(schedule.body.clone()),
            media: schedule.media.clone(),
            status: MessageStatus::Sent,
            sent_at: now,
            read_at: None,
        };

        self.firestore
            .doc(&format!("chats/{}/messages/{}", message.chat_id, message.id))
            .set(&message)
            .await
    }

    /// Re-arms a recurring schedule or retires a one-shot one.
    async fn advance(
        &self,
        schedule: &ScheduledMessage,
        schedule_path: &str,
        now: DateTime<Utc>,
    ) -> Result<(), FirestoreError> {
        match schedule.recurrence {
            Some(recurrence) => {
                // Advance from the slot that just fired, not from the sweep
                // time, so a late sweep does not shift the cadence.
                let mut next = schedule.scheduled_at;
                while next <= now {
                    next = next_occurrence(recurrence, next, schedule.anchor_day);
                }
                self.firestore
                    .doc(schedule_path)
                    .update(
                        &serde_json::json!({
                            "scheduledAt": next.to_rfc3339_opts(SecondsFormat::Micros, true),
                            "retries": 0,
                        }),
                        &["scheduledAt", "retries"],
                    )
                    .await
            }
            None => {
                self.firestore
                    .doc(schedule_path)
                    .update(
                        &serde_json::json!({ "status": ScheduleStatus::Delivered }),
                        &["status"],
                    )
                    .await
            }
        }
    }

    async fn record_failure(
        &self,
        schedule: &ScheduledMessage,
        schedule_path: &str,
    ) -> Result<(), FirestoreError> {
        let retries = schedule.retries + 1;
        if retries >= self.config.schedule_max_retries {
            tracing::warn!(schedule = %schedule.id, "marking schedule failed");
            self.firestore
                .doc(schedule_path)
                .update(
                    &serde_json::json!({ "status": ScheduleStatus::Failed, "retries": retries }),
                    &["status", "retries"],
                )
                .await
        } else {
            self.firestore
                .doc(schedule_path)
                .update(&serde_json::json!({ "retries": retries }), &["retries"])
                .await
        }
    }
}
