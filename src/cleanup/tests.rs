use super::CleanupWorker;
use crate::cache::{LocalCache, MediaRecord, MessageKey};
use crate::config::EngineConfig;
use crate::firestore::FirestoreClient;
use crate::media::MediaStore;
use crate::testutil::plain_client;
use crate::types::{ChatMessage, MessageStatus};
use chrono::{DateTime, Duration, Utc};
use httpmock::prelude::*;
use serde_json::json;

fn worker(server: &MockServer, cache: LocalCache) -> CleanupWorker {
    let firestore = FirestoreClient::new_with_client(
        plain_client(),
        server.url("/v1/projects/p/databases/(default)/documents"),
    );
    let media = MediaStore::new_with_client(
        plain_client(),
        server.url("/storage/v1"),
        server.url("/upload/storage/v1"),
        "bucket".to_string(),
    );
    CleanupWorker::new(firestore, media, cache, EngineConfig::default())
}

fn message(id: &str, sent_at: DateTime<Utc>, read_at: Option<DateTime<Utc>>) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        chat_id: "c1".to_string(),
        sender_id: "alice".to_string(),
        body: Some("hi".to_string()),
        media: None,
        status: if read_at.is_some() {
            MessageStatus::Read
        } else {
            MessageStatus::Sent
        },
        sent_at,
        read_at,
    }
}

#[tokio::test]
async fn sweep_purges_expired_messages_and_their_media() {
    let server = MockServer::start();
    let cache = LocalCache::open(None).unwrap();
    let now = Utc::now();

    // Read four days ago, past the three-day read TTL, with an attachment.
    cache
        .upsert_message(&message(
            "old",
            now - Duration::days(10),
            Some(now - Duration::days(4)),
        ))
        .unwrap();
    cache
        .record_media(&MediaRecord {
            key: MessageKey::new("c1", "old"),
            object_path: "chats/c1/media/old".to_string(),
            local_path: None,
            size_bytes: 10,
        })
        .unwrap();

    // Read an hour ago, stays.
    cache
        .upsert_message(&message(
            "fresh",
            now - Duration::days(10),
            Some(now - Duration::hours(1)),
        ))
        .unwrap();

    // Unread but only two days old, stays.
    cache
        .upsert_message(&message("recent", now - Duration::days(2), None))
        .unwrap();

    let doc_mock = server.mock(|when, then| {
        when.method(DELETE)
            .path("/v1/projects/p/databases/(default)/documents/chats/c1/messages/old");
        then.status(200).json_body(json!({}));
    });
    let media_mock = server.mock(|when, then| {
        when.method(DELETE).path_matches("/storage/v1/b/bucket/o/.*");
        then.status(200).json_body(json!({}));
    });

    let deleted = worker(&server, cache.clone()).sweep(now).await.unwrap();

    assert_eq!(deleted, 1);
    doc_mock.assert();
    media_mock.assert();
    assert!(cache
        .get_message(&MessageKey::new("c1", "old"))
        .unwrap()
        .is_none());
    assert!(cache
        .media_for_message(&MessageKey::new("c1", "old"))
        .unwrap()
        .is_none());
    assert!(cache
        .get_message(&MessageKey::new("c1", "fresh"))
        .unwrap()
        .is_some());
    assert!(cache
        .get_message(&MessageKey::new("c1", "recent"))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn unread_messages_expire_after_seven_days() {
    let server = MockServer::start();
    let cache = LocalCache::open(None).unwrap();
    let now = Utc::now();

    cache
        .upsert_message(&message("stale", now - Duration::days(8), None))
        .unwrap();

    let doc_mock = server.mock(|when, then| {
        when.method(DELETE)
            .path("/v1/projects/p/databases/(default)/documents/chats/c1/messages/stale");
        then.status(200).json_body(json!({}));
    });

    let deleted = worker(&server, cache.clone()).sweep(now).await.unwrap();
    assert_eq!(deleted, 1);
    doc_mock.assert();
}

#[tokio::test]
async fn failing_batch_is_retried_three_times_then_left_for_next_sweep() {
    let server = MockServer::start();
    let cache = LocalCache::open(None).unwrap();
    let now = Utc::now();

    cache
        .upsert_message(&message("stuck", now - Duration::days(8), None))
        .unwrap();

    let doc_mock = server.mock(|when, then| {
        when.method(DELETE)
            .path("/v1/projects/p/databases/(default)/documents/chats/c1/messages/stuck");
        then.status(503).body("unavailable");
    });

    let deleted = worker(&server, cache.clone()).sweep(now).await.unwrap();

    assert_eq!(deleted, 0);
    doc_mock.assert_hits(3);
    // Still cached, so the next sweep picks it up again.
    assert!(cache
        .get_message(&MessageKey::new("c1", "stuck"))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn empty_sweep_makes_no_requests() {
    let server = MockServer::start();
    let cache = LocalCache::open(None).unwrap();

    let deleted = worker(&server, cache).sweep(Utc::now()).await.unwrap();
    assert_eq!(deleted, 0);
}

#[tokio::test]
async fn run_stops_when_the_shutdown_channel_closes() {
    let server = MockServer::start();
    let cache = LocalCache::open(None).unwrap();
    let worker = worker(&server, cache);

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));

    tokio::task::yield_now().await;
    // A dropped sender is a shutdown too.
    drop(tx);

    // The tick interval is six hours; the worker must break out of it.
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop when the channel closed")
        .unwrap();
}
