use httprecorder::errors::RecorderError;
use httprecorder::format::format_payload;
use httprecorder::matcher::{RecordMatcher, SimpleMatcher};
use httprecorder::record::InteractionRecord;
use httprecorder::runtime::ProductionFileSystem;
use httprecorder::session::{SessionArchive, SessionLayout};
use httprecorder::store::SessionStore;
use std::path::Path;
use std::sync::Arc;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

fn matcher() -> Arc<dyn RecordMatcher> {
    Arc::new(SimpleMatcher::default())
}

fn archive() -> SessionArchive {
    SessionArchive::new(Arc::new(ProductionFileSystem))
}

fn recorded_session() -> SessionStore {
    let mut store = SessionStore::new(matcher());
    store.enqueue_range([
        InteractionRecord::new("POST", "/subscriptions/s1/services/networking/nsg?t=1")
            .with_request_header("x-ms-version", "2014-10-01")
            .with_request_body("<NetworkSecurityGroup><Name>web</Name></NetworkSecurityGroup>")
            .with_status(202)
            .with_response_header("x-ms-request-id", "a1")
            .normalize_payloads(),
        InteractionRecord::new("GET", "/subscriptions/s1/operations/a1?t=2")
            .with_response_body(r#"{"Status":"InProgress"}"#)
            .normalize_payloads(),
        InteractionRecord::new("GET", "/subscriptions/s1/operations/a1?t=3")
            .with_response_body(r#"{"Status":"Succeeded"}"#)
            .normalize_payloads(),
        InteractionRecord::new("DELETE", "/subscriptions/s1/services/networking/nsg/web")
            .with_status(200),
    ]);
    store
}

#[test]
fn save_then_load_is_observationally_equivalent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = SessionLayout::new(dir.path());
    let path = layout.session_path("Network", "NewAzureNetworkSecurityGroup");

    let original = recorded_session();
    archive().save(&original, &path).expect("save");
    let loaded = archive().load(&path, matcher()).expect("load");

    assert_eq!(
        loaded.keys().collect::<Vec<_>>(),
        original.keys().collect::<Vec<_>>()
    );
    for key in original.keys() {
        assert_eq!(loaded.get(key), original.get(key), "key {key}");
    }
}

#[test]
fn loaded_session_replays_like_the_recording() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.json");
    archive().save(&recorded_session(), &path).expect("save");

    let mut replay = archive().load(&path, matcher()).expect("load");
    let poll = InteractionRecord::new("GET", "/subscriptions/s1/operations/a1?t=77");
    let key = replay.key_for(&poll);
    assert_eq!(
        replay.dequeue(&key).expect("first poll").response_body,
        "{\n  \"Status\": \"InProgress\"\n}"
    );
    assert_eq!(
        replay.dequeue(&key).expect("second poll").response_body,
        "{\n  \"Status\": \"Succeeded\"\n}"
    );
    assert!(matches!(replay.dequeue(&key), Err(RecorderError::KeyNotFound(_))));
}

#[test]
fn compact_and_pretty_documents_load_identically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pretty = dir.path().join("pretty.json");
    let compact = dir.path().join("compact.json");
    let store = recorded_session();
    archive().save(&store, &pretty).expect("pretty");
    archive().with_pretty(false).save(&store, &compact).expect("compact");

    let compact_text = std::fs::read_to_string(&compact).expect("read compact");
    assert_eq!(compact_text.lines().count(), 1);

    let a = archive().load(&pretty, matcher()).expect("load pretty");
    let b = archive().load(&compact, matcher()).expect("load compact");
    assert_eq!(a.peek_all().collect::<Vec<_>>(), b.peek_all().collect::<Vec<_>>());
}

#[test]
fn fixture_session_keeps_recorded_keys_verbatim() {
    let store = archive()
        .load(Path::new(&fixture("sessions/storage-upload.json")), matcher())
        .expect("fixture loads");
    assert_eq!(
        store.keys().collect::<Vec<_>>(),
        vec![
            "PUT:/vhds/disk0.vhd?comp=block&blockid=AAAA",
            "GET:/vhds?restype=container&comp=list",
        ]
    );
    let put = &store
        .get("PUT:/vhds/disk0.vhd?comp=block&blockid=AAAA")
        .expect("put queue")[0];
    assert_eq!(put.status_code, 201);
    assert_eq!(
        put.request_header("x-ms-version"),
        Some(&["2014-02-14".to_string()][..])
    );
}

#[test]
fn corrupt_session_file_is_rejected_whole() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.json");
    std::fs::write(
        &path,
        r#"{"schema_version":1,"records":{"GET:/a":[{"method":"GET","target":"/a","status_code":200}],"GET:/b":[{"method":1}]}}"#,
    )
    .expect("write");
    assert!(matches!(
        archive().load(&path, matcher()),
        Err(RecorderError::SessionLoad(_))
    ));
    assert!(matches!(
        archive().load(&dir.path().join("absent.json"), matcher()),
        Err(RecorderError::SessionLoad(_))
    ));
}

#[test]
fn xml_fixture_normalises_to_expected_and_is_stable() {
    let raw = std::fs::read_to_string(fixture("payloads/list-blobs.xml")).expect("raw");
    let expected =
        std::fs::read_to_string(fixture("payloads/list-blobs.expected.xml")).expect("expected");
    let formatted = format_payload(&raw);
    assert_eq!(formatted, expected.trim_end());
    assert_eq!(format_payload(&formatted), formatted);
}

#[test]
fn json_fixture_normalisation_is_idempotent() {
    let raw = std::fs::read_to_string(fixture("payloads/job.json")).expect("raw");
    let once = format_payload(&raw);
    assert!(once.starts_with("{\n  \"Id\": \"2fa0\""));
    assert_eq!(format_payload(&once), once);
}
