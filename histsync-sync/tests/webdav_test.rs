use bytes::Bytes;
use histsync_core::retry::RetryPolicy;
use histsync_core::{Error, HistoryFetcher, HistoryRecord, ManualClock, MemoryHistorySource, RawHistoryItem};
use histsync_sync::store::{increment_name, EntryKind, SNAPSHOT_NAME};
use histsync_sync::{encode_records, MemoryKvStore, NoCipher, RemoteStore, SyncEngine, SyncStateStore};
use histsync_sync::store::WebDavStore;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW: i64 = 1_700_000_000_000;
// base64("alice:secret")
const AUTH: &str = "Basic YWxpY2U6c2VjcmV0";

fn store(server: &MockServer) -> WebDavStore {
    WebDavStore::new(&format!("{}/dav/", server.uri()), "alice", "secret")
        .unwrap()
        .with_retry_policy(RetryPolicy::fast())
}

fn record(id: &str, url: &str, t: i64) -> HistoryRecord {
    HistoryRecord {
        id: Some(id.to_string()),
        url: url.to_string(),
        title: "title".to_string(),
        last_visit_time: t,
        visit_count: 1,
        formatted_time: String::new(),
    }
}

fn multistatus(names: &[&str]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="utf-8"?><d:multistatus xmlns:d="DAV:">
<d:response><d:href>/dav/</d:href><d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat></d:response>"#,
    );
    for name in names {
        body.push_str(&format!(
            "<d:response><d:href>/dav/{}</d:href><d:propstat><d:prop><d:resourcetype/><d:getcontentlength>10</d:getcontentlength></d:prop></d:propstat></d:response>",
            name
        ));
    }
    body.push_str("</d:multistatus>");
    body
}

#[tokio::test]
async fn test_read_sends_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dav/browser-history-total.json"))
        .and(header("Authorization", AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let data = store(&server).read(SNAPSHOT_NAME).await.unwrap();
    assert_eq!(data, Bytes::from("[]"));
}

#[tokio::test]
async fn test_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dav/locked.json"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/dav/missing.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = store(&server);
    let err = store.read("locked.json").await.unwrap_err();
    assert!(matches!(err, Error::RemoteAuth(_)));
    assert!(err.is_fatal_for_schedule());
    assert!(!store.exists("missing.json").await.unwrap());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/dav/browser-history-total.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/dav/browser-history-total.json"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    store(&server)
        .write(SNAPSHOT_NAME, Bytes::from("[]"), true)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_write_once_refuses_existing_object() {
    let server = MockServer::start().await;
    let name = increment_name(NOW);
    Mock::given(method("HEAD"))
        .and(path(format!("/dav/{}", name)))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let err = store(&server)
        .write(&name, Bytes::from("[]"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
}

#[tokio::test]
async fn test_precondition_failed_maps_to_already_exists() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(header("If-None-Match", "*"))
        .respond_with(ResponseTemplate::new(412))
        .expect(1)
        .mount(&server)
        .await;

    let err = store(&server)
        .write("x.json", Bytes::from("[]"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
}

#[tokio::test]
async fn test_propfind_listing() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("Depth", "1"))
        .and(body_string_contains("propfind"))
        .respond_with(
            ResponseTemplate::new(207)
                .set_body_string(multistatus(&[SNAPSHOT_NAME, "browser-history-increment-5.json"])),
        )
        .mount(&server)
        .await;

    let entries = store(&server).list_directory("").await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![SNAPSHOT_NAME, "browser-history-increment-5.json"]);
    assert!(entries.iter().all(|e| e.kind == EntryKind::File && e.size == 10));
}

#[tokio::test]
async fn test_engine_merge_over_webdav() {
    let server = MockServer::start().await;
    let first = increment_name(100);
    let second = increment_name(200);

    Mock::given(method("HEAD"))
        .and(path("/dav/browser-history-total.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus(&[&second, &first])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/dav/{}", first)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(
            encode_records(&[record("1", "https://a", 100), record("2", "https://b", 100)], &NoCipher)
                .unwrap()
                .to_vec(),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/dav/{}", second)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(
            encode_records(&[record("1", "https://a-new", 200)], &NoCipher)
                .unwrap()
                .to_vec(),
        ))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/dav/browser-history-total.json"))
        .and(body_string_contains("https://a-new"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::new(NOW));
    let fetcher = Arc::new(HistoryFetcher::new(Arc::new(MemoryHistorySource::new())).with_clock(clock.clone()));
    let state = SyncStateStore::new(Arc::new(MemoryKvStore::new()), clock.clone());
    let engine = SyncEngine::new(Arc::new(store(&server)), fetcher, state).with_clock(clock);

    let result = engine.download_and_merge().await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.count, Some(2));

    let cached = engine.state_store().cached_history().await.unwrap();
    let urls: Vec<&str> = cached.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec!["https://b", "https://a-new"]);
    assert_eq!(engine.state_store().last_sync().await.unwrap(), NOW);
}

#[tokio::test]
async fn test_incremental_upload_over_webdav() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/dav/{}", increment_name(NOW))))
        .and(header("If-None-Match", "*"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::new(NOW));
    let source = Arc::new(MemoryHistorySource::new());
    source.insert(RawHistoryItem::new("https://a.com", NOW - 1_000).with_id("1"));
    let fetcher = Arc::new(HistoryFetcher::new(source).with_clock(clock.clone()));
    let state = SyncStateStore::new(Arc::new(MemoryKvStore::new()), clock.clone());
    let engine = SyncEngine::new(Arc::new(store(&server)), fetcher, state).with_clock(clock);

    let result = engine.upload_incremental().await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.count, Some(1));
    assert_eq!(engine.state_store().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_auth_failure_does_not_queue() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::new(NOW));
    let source = Arc::new(MemoryHistorySource::new());
    source.insert(RawHistoryItem::new("https://a.com", NOW - 1_000).with_id("1"));
    let fetcher = Arc::new(HistoryFetcher::new(source).with_clock(clock.clone()));
    let state = SyncStateStore::new(Arc::new(MemoryKvStore::new()), clock.clone());
    let engine = SyncEngine::new(Arc::new(store(&server)), fetcher, state).with_clock(clock);

    let result = engine.upload_incremental().await;
    assert!(!result.success);
    assert_eq!(engine.state_store().pending_count().await.unwrap(), 0);
    assert_eq!(engine.state_store().last_sync().await.unwrap(), 0);
}
