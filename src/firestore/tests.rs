use super::models::{Direction, FieldOperator};
use super::query::Query;
use super::FirestoreClient;
use crate::testutil::plain_client;
use crate::types::{ChatMessage, MessageStatus};
use chrono::{TimeZone, Utc};
use httpmock::prelude::*;
use serde_json::json;

fn test_client(server: &MockServer) -> FirestoreClient {
    FirestoreClient::new_with_client(
        plain_client(),
        server.url("/v1/projects/p/databases/(default)/documents"),
    )
}

fn sample_message() -> ChatMessage {
    ChatMessage {
        id: "m1".to_string(),
        chat_id: "c1".to_string(),
        sender_id: "alice".to_string(),
        body: Some("hello".to_string()),
        media: None,
        status: MessageStatus::Sent,
        sent_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        read_at: None,
    }
}

#[tokio::test]
async fn get_document_deserializes_typed_fields() {
    let server = MockServer::start();
    let db = test_client(&server);

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/projects/p/databases/(default)/documents/chats/c1/messages/m1");
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/chats/c1/messages/m1",
            "fields": {
                "id": { "stringValue": "m1" },
                "chatId": { "stringValue": "c1" },
                "senderId": { "stringValue": "alice" },
                "body": { "stringValue": "hello" },
                "status": { "stringValue": "sent" },
                "sentAt": { "stringValue": "2024-03-01T12:00:00Z" }
            },
            "createTime": "2024-03-01T12:00:00Z",
            "updateTime": "2024-03-01T12:00:00Z"
        }));
    });

    let message: Option<ChatMessage> = db.doc("chats/c1/messages/m1").get().await.unwrap();
    assert_eq!(message.unwrap(), sample_message());
    mock.assert();
}

#[tokio::test]
async fn get_missing_document_is_none() {
    let server = MockServer::start();
    let db = test_client(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/projects/p/databases/(default)/documents/users/nobody");
        then.status(404).json_body(json!({
            "error": { "code": 404, "message": "Document not found", "status": "NOT_FOUND" }
        }));
    });

    let user: Option<ChatMessage> = db.doc("users/nobody").get().await.unwrap();
    assert!(user.is_none());
}

#[tokio::test]
async fn set_document_writes_firestore_values() {
    let server = MockServer::start();
    let db = test_client(&server);

    let mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/v1/projects/p/databases/(default)/documents/chats/c1/messages/m1")
            .json_body_includes(
                r#"{
                    "fields": {
                        "senderId": { "stringValue": "alice" },
                        "status": { "stringValue": "sent" }
                    }
                }"#,
            );
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/chats/c1/messages/m1",
            "fields": {},
            "createTime": "2024-03-01T12:00:00Z",
            "updateTime": "2024-03-01T12:00:00Z"
        }));
    });

    db.doc("chats/c1/messages/m1")
        .set(&sample_message())
        .await
        .unwrap();
    mock.assert();
}

#[tokio::test]
async fn update_sends_field_mask() {
    let server = MockServer::start();
    let db = test_client(&server);

    let mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/v1/projects/p/databases/(default)/documents/chats/c1/messages/m1")
            .query_param("updateMask.fieldPaths", "status");
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/chats/c1/messages/m1",
            "fields": {}
        }));
    });

    db.doc("chats/c1/messages/m1")
        .update(&json!({ "status": "read" }), &["status"])
        .await
        .unwrap();
    mock.assert();
}

#[tokio::test]
async fn delete_document() {
    let server = MockServer::start();
    let db = test_client(&server);

    let mock = server.mock(|when, then| {
        when.method(DELETE)
            .path("/v1/projects/p/databases/(default)/documents/chats/c1/messages/m1");
        then.status(200).json_body(json!({}));
    });

    db.doc("chats/c1/messages/m1").delete().await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn api_error_keeps_status_for_transience_check() {
    let server = MockServer::start();
    let db = test_client(&server);

    server.mock(|when, then| {
        when.method(DELETE)
            .path("/v1/projects/p/databases/(default)/documents/chats/c1/messages/m1");
        then.status(403).json_body(json!({
            "error": { "code": 403, "message": "Missing permission", "status": "PERMISSION_DENIED" }
        }));
    });

    let err = db.doc("chats/c1/messages/m1").delete().await.unwrap_err();
    assert!(!err.is_transient());

    let server2 = MockServer::start();
    let db2 = test_client(&server2);
    server2.mock(|when, then| {
        when.method(DELETE)
            .path("/v1/projects/p/databases/(default)/documents/chats/c1/messages/m1");
        then.status(503).body("unavailable");
    });

    let err = db2.doc("chats/c1/messages/m1").delete().await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn run_query_filters_and_parses_hits() {
    let server = MockServer::start();
    let db = test_client(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/p/databases/(default)/documents:runQuery")
            .json_body_includes(
                r#"{
                    "structuredQuery": {
                        "from": [{ "collectionId": "scheduled_messages" }],
                        "where": {
                            "compositeFilter": {
                                "op": "AND",
                                "filters": [
                                    { "fieldFilter": {
                                        "field": { "fieldPath": "status" },
                                        "op": "EQUAL",
                                        "value": { "stringValue": "pending" }
                                    }},
                                    { "fieldFilter": {
                                        "field": { "fieldPath": "scheduledAt" },
                                        "op": "LESS_THAN_OR_EQUAL",
                                        "value": { "stringValue": "2024-03-01T12:00:00Z" }
                                    }}
                                ]
                            }
                        }
                    }
                }"#,
            );
        then.status(200).json_body(json!([
            {
                "document": {
                    "name": "projects/p/databases/(default)/documents/scheduled_messages/s1",
                    "fields": {
                        "id": { "stringValue": "s1" },
                        "chatId": { "stringValue": "c1" },
                        "senderId": { "stringValue": "alice" },
                        "body": { "stringValue": "later" },
                        "scheduledAt": { "stringValue": "2024-03-01T11:59:00Z" },
                        "anchorDay": { "integerValue": "1" },
                        "status": { "stringValue": "pending" },
                        "retries": { "integerValue": "0" }
                    }
                },
                "readTime": "2024-03-01T12:00:00Z"
            },
            { "readTime": "2024-03-01T12:00:00Z" }
        ]));
    });

    let query = Query::collection("scheduled_messages")
        .filter("status", FieldOperator::Equal, "pending")
        .unwrap()
        .filter(
            "scheduledAt",
            FieldOperator::LessThanOrEqual,
            "2024-03-01T12:00:00Z",
        )
        .unwrap()
        .order_by("scheduledAt", Direction::Ascending);

    let hits = db.run_query(query).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id(), "s1");
    assert_eq!(hits[0].relative_path(), "scheduled_messages/s1");

    let schedule: crate::types::ScheduledMessage = hits[0].data().unwrap();
    assert_eq!(schedule.chat_id, "c1");
    assert_eq!(schedule.retries, 0);
    mock.assert();
}

#[tokio::test]
async fn collection_add_returns_created_document() {
    let server = MockServer::start();
    let db = test_client(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/p/databases/(default)/documents/reports");
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/reports/generated-id",
            "fields": {},
            "createTime": "2024-03-01T12:00:00Z",
            "updateTime": "2024-03-01T12:00:00Z"
        }));
    });

    let doc = db
        .collection("reports")
        .add(&json!({ "reason": "spam" }))
        .await
        .unwrap();
    assert!(doc.name.ends_with("reports/generated-id"));
    mock.assert();
}
