use super::{next_occurrence, ScheduleWorker};
use crate::config::EngineConfig;
use crate::firestore::FirestoreClient;
use crate::testutil::plain_client;
use crate::types::{Recurrence, ScheduleStatus, ScheduledMessage};
use chrono::{TimeZone, Utc};
use httpmock::prelude::*;
use serde_json::json;

fn at(y: i32, m: u32, d: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
}

#[test]
fn new_schedules_anchor_on_their_creation_day() {
    let schedule =
        ScheduledMessage::recurring("c1", "alice", "rent due", at(2024, 1, 31), Recurrence::Monthly);
    assert_eq!(schedule.anchor_day, 31);
    assert_eq!(schedule.status, ScheduleStatus::Pending);
    assert_eq!(schedule.retries, 0);

    let one_shot = ScheduledMessage::once("c1", "alice", "reminder", at(2024, 3, 15));
    assert_eq!(one_shot.anchor_day, 15);
    assert!(one_shot.recurrence.is_none());
}

#[test]
fn daily_and_weekly_keep_the_time_of_day() {
    assert_eq!(
        next_occurrence(Recurrence::Daily, at(2024, 3, 1), 1),
        at(2024, 3, 2)
    );
    assert_eq!(
        next_occurrence(Recurrence::Weekly, at(2024, 2, 26), 26),
        at(2024, 3, 4)
    );
}

#[test]
fn monthly_anchored_on_the_31st_clamps_and_recovers() {
    let jan = at(2024, 1, 31);
    let feb = next_occurrence(Recurrence::Monthly, jan, 31);
    assert_eq!(feb, at(2024, 2, 29));

    // The anchor survives the short month.
    let mar = next_occurrence(Recurrence::Monthly, feb, 31);
    assert_eq!(mar, at(2024, 3, 31));
}

#[test]
fn monthly_in_a_non_leap_february() {
    assert_eq!(
        next_occurrence(Recurrence::Monthly, at(2023, 1, 31), 31),
        at(2023, 2, 28)
    );
}

#[test]
fn monthly_rolls_over_the_year() {
    assert_eq!(
        next_occurrence(Recurrence::Monthly, at(2024, 12, 15), 15),
        at(2025, 1, 15)
    );
}

#[test]
fn yearly_leap_day_clamps_until_the_next_leap_year() {
    let leap = at(2024, 2, 29);
    let y2025 = next_occurrence(Recurrence::Yearly, leap, 29);
    assert_eq!(y2025, at(2025, 2, 28));

    let y2026 = next_occurrence(Recurrence::Yearly, y2025, 29);
    let y2027 = next_occurrence(Recurrence::Yearly, y2026, 29);
    let y2028 = next_occurrence(Recurrence::Yearly, y2027, 29);
    assert_eq!(y2028, at(2028, 2, 29));
}

fn worker(server: &MockServer) -> ScheduleWorker {
    let firestore = FirestoreClient::new_with_client(
        plain_client(),
        server.url("/v1/projects/p/databases/(default)/documents"),
    );
    ScheduleWorker::new(firestore, EngineConfig::default())
}

fn schedule_hit(recurrence: Option<&str>, retries: i64) -> serde_json::Value {
    let mut fields = json!({
        "id": { "stringValue": "s1" },
        "chatId": { "stringValue": "c1" },
        "senderId": { "stringValue": "alice" },
        "body": { "stringValue": "happy birthday" },
        "scheduledAt": { "stringValue": "2024-01-31T09:30:00Z" },
        "anchorDay": { "integerValue": "31" },
        "status": { "stringValue": "pending" },
        "retries": { "integerValue": retries.to_string() }
    });
    if let Some(r) = recurrence {
        fields["recurrence"] = json!({ "stringValue": r });
    }
    json!([{
        "document": {
            "name": "projects/p/databases/(default)/documents/scheduled_messages/s1",
            "fields": fields
        },
        "readTime": "2024-01-31T09:31:00Z"
    }])
}

#[test]
fn schedule_timestamps_serialize_with_a_fixed_fraction() {
    let schedule = ScheduledMessage::once("c1", "alice", "reminder", at(2024, 1, 31));
    let json = serde_json::to_value(&schedule).unwrap();
    assert_eq!(json["scheduledAt"], "2024-01-31T09:30:00.000000Z");
}

#[tokio::test]
async fn sweep_cutoff_matches_whole_second_schedules() {
    let server = MockServer::start();

    // A sweep at a fractional instant must still catch a schedule stored at
    // a whole second, so the cutoff carries the same six-digit fraction the
    // stored values do.
    let query_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/p/databases/(default)/documents:runQuery")
            .json_body_includes(
                r#"{
                    "structuredQuery": {
                        "where": { "compositeFilter": { "op": "AND", "filters": [
                            { "fieldFilter": {
                                "field": { "fieldPath": "status" },
                                "op": "EQUAL",
                                "value": { "stringValue": "pending" }
                            } },
                            { "fieldFilter": {
                                "field": { "fieldPath": "scheduledAt" },
                                "op": "LESS_THAN_OR_EQUAL",
                                "value": { "stringValue": "2024-01-31T09:31:00.123456Z" }
                            } }
                        ] } }
                    }
                }"#,
            );
        then.status(200).json_body(json!([]));
    });

    let now = Utc.with_ymd_and_hms(2024, 1, 31, 9, 31, 0).unwrap()
        + chrono::Duration::microseconds(123_456);
    let delivered = worker(&server).sweep_due(now).await.unwrap();

    assert_eq!(delivered, 0);
    query_mock.assert();
}

#[tokio::test]
async fn run_stops_promptly_on_shutdown() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/p/databases/(default)/documents:runQuery");
        then.status(200).json_body(json!([]));
    });

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker(&server).run(rx));

    tokio::task::yield_now().await;
    tx.send(true).unwrap();

    // The interval is a minute long; the worker must not sleep it out.
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn sweep_delivers_one_shot_and_marks_it_delivered() {
    let server = MockServer::start();

    let query_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/p/databases/(default)/documents:runQuery")
            .json_body_includes(
                r#"{
                    "structuredQuery": {
                        "from": [{ "collectionId": "scheduled_messages" }]
                    }
                }"#,
            );
        then.status(200).json_body(schedule_hit(None, 0));
    });

    let message_mock = server.mock(|when, then| {
        when.method(PATCH)
            .path_matches("/documents/chats/c1/messages/.*")
            .json_body_includes(
                r#"{
                    "fields": {
                        "senderId": { "stringValue": "alice" },
                        "body": { "stringValue": "happy birthday" },
                        "status": { "stringValue": "sent" }
                    }
                }"#,
            );
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/chats/c1/messages/x",
            "fields": {}
        }));
    });

    let retire_mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/v1/projects/p/databases/(default)/documents/scheduled_messages/s1")
            .query_param("updateMask.fieldPaths", "status")
            .json_body_includes(
                r#"{ "fields": { "status": { "stringValue": "delivered" } } }"#,
            );
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/scheduled_messages/s1",
            "fields": {}
        }));
    });

    let delivered = worker(&server)
        .sweep_due(Utc.with_ymd_and_hms(2024, 1, 31, 9, 31, 0).unwrap())
        .await
        .unwrap();

    assert_eq!(delivered, 1);
    query_mock.assert();
    message_mock.assert();
    retire_mock.assert();
}

#[tokio::test]
async fn sweep_rearms_a_monthly_schedule_for_the_next_occurrence() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/p/databases/(default)/documents:runQuery");
        then.status(200).json_body(schedule_hit(Some("monthly"), 0));
    });

    server.mock(|when, then| {
        when.method(PATCH)
            .path_matches("/documents/chats/c1/messages/.*");
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/chats/c1/messages/x",
            "fields": {}
        }));
    });

    let rearm_mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/v1/projects/p/databases/(default)/documents/scheduled_messages/s1")
            .json_body_includes(
                r#"{
                    "fields": {
                        "scheduledAt": { "stringValue": "2024-02-29T09:30:00.000000Z" },
                        "retries": { "integerValue": "0" }
                    }
                }"#,
            );
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/scheduled_messages/s1",
            "fields": {}
        }));
    });

    let delivered = worker(&server)
        .sweep_due(Utc.with_ymd_and_hms(2024, 1, 31, 9, 31, 0).unwrap())
        .await
        .unwrap();

    assert_eq!(delivered, 1);
    rearm_mock.assert();
}

#[tokio::test]
async fn failed_delivery_bumps_retries_then_marks_failed() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/p/databases/(default)/documents:runQuery");
        then.status(200).json_body(schedule_hit(None, 0));
    });

    server.mock(|when, then| {
        when.method(PATCH)
            .path_matches("/documents/chats/c1/messages/.*");
        then.status(503).body("unavailable");
    });

    let bump_mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/v1/projects/p/databases/(default)/documents/scheduled_messages/s1")
            .json_body_includes(r#"{ "fields": { "retries": { "integerValue": "1" } } }"#);
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/scheduled_messages/s1",
            "fields": {}
        }));
    });

    let delivered = worker(&server)
        .sweep_due(Utc.with_ymd_and_hms(2024, 1, 31, 9, 31, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(delivered, 0);
    bump_mock.assert();

    // Third failure in a row crosses the limit.
    let server2 = MockServer::start();
    server2.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/p/databases/(default)/documents:runQuery");
        then.status(200).json_body(schedule_hit(None, 2));
    });
    server2.mock(|when, then| {
        when.method(PATCH)
            .path_matches("/documents/chats/c1/messages/.*");
        then.status(503).body("unavailable");
    });
    let fail_mock = server2.mock(|when, then| {
        when.method(PATCH)
            .path("/v1/projects/p/databases/(default)/documents/scheduled_messages/s1")
            .json_body_includes(
                r#"{
                    "fields": {
                        "status": { "stringValue": "failed" },
                        "retries": { "integerValue": "3" }
                    }
                }"#,
            );
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/scheduled_messages/s1",
            "fields": {}
        }));
    });

    worker(&server2)
        .sweep_due(Utc.with_ymd_and_hms(2024, 1, 31, 9, 31, 0).unwrap())
        .await
        .unwrap();
    fail_mock.assert();
}
