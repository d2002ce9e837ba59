//! Session files: one JSON document per recorded test session.
//!
//! ```json
//! { "schema_version": 1,
//!   "records": { "GET:/foo": [ { "method": "GET", "target": "/foo?t=1", ... } ] } }
//! ```
//!
//! `records` keeps the store's key order. No type tags are written, so the
//! files stay readable by anything that understands plain JSON.

use crate::errors::RecorderError;
use crate::logging::{log_event, JsonlLogger};
use crate::matcher::RecordMatcher;
use crate::record::InteractionRecord;
use crate::runtime::FileSystem;
use crate::store::SessionStore;
use serde::de::{Error as _, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct SessionDocumentRef<'a> {
    schema_version: u32,
    records: RecordsRef<'a>,
}

struct RecordsRef<'a>(&'a SessionStore);

impl Serialize for RecordsRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.keys().count()))?;
        for (key, queue) in self.0.entries() {
            map.serialize_entry(key, queue)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    schema_version: Option<u32>,
}

#[derive(Deserialize)]
struct SessionDocument {
    records: OrderedRecords,
}

/// JSON object read back as a list so key order survives. A key that
/// appears twice is an error rather than a silent overwrite.
struct OrderedRecords(Vec<(String, Vec<InteractionRecord>)>);

impl<'de> Deserialize<'de> for OrderedRecords {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = OrderedRecords;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of match key to record list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                let mut seen = HashSet::new();
                while let Some((key, records)) =
                    access.next_entry::<String, Vec<InteractionRecord>>()?
                {
                    if !seen.insert(key.clone()) {
                        return Err(A::Error::custom(format!("duplicate match key `{key}`")));
                    }
                    entries.push((key, records));
                }
                Ok(OrderedRecords(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Renders `store` as a session document without consuming it.
pub fn to_json(store: &SessionStore, pretty: bool) -> Result<String, RecorderError> {
    let document = SessionDocumentRef {
        schema_version: SCHEMA_VERSION,
        records: RecordsRef(store),
    };
    let rendered = if pretty {
        serde_json::to_string_pretty(&document)
    } else {
        serde_json::to_string(&document)
    };
    rendered.map_err(|e| RecorderError::SessionSave(e.to_string()))
}

/// Parses a session document. Keys are taken verbatim from the document.
pub fn from_json(text: &str, matcher: Arc<dyn RecordMatcher>) -> Result<SessionStore, RecorderError> {
    let header: VersionHeader =
        serde_json::from_str(text).map_err(|e| RecorderError::SessionLoad(e.to_string()))?;
    match header.schema_version {
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(RecorderError::SessionLoad(format!(
                "unsupported schema_version {other}, expected {SCHEMA_VERSION}"
            )))
        }
        None => {
            return Err(RecorderError::SessionLoad(
                "session document has no schema_version".to_string(),
            ))
        }
    }
    let document: SessionDocument =
        serde_json::from_str(text).map_err(|e| RecorderError::SessionLoad(e.to_string()))?;
    Ok(SessionStore::with_records(document.records.0, matcher))
}

/// Reads and writes session files through a [`FileSystem`].
pub struct SessionArchive {
    fs: Arc<dyn FileSystem>,
    logger: Option<JsonlLogger>,
    pretty: bool,
}

impl SessionArchive {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            logger: None,
            pretty: true,
        }
    }

    pub fn with_logger(mut self, logger: Option<JsonlLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn save(&self, store: &SessionStore, path: &Path) -> Result<(), RecorderError> {
        let document = to_json(store, self.pretty)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs
                .ensure_dir(parent)
                .map_err(|e| RecorderError::SessionSave(e.to_string()))?;
        }
        self.fs
            .write_string(path, &document)
            .map_err(|e| RecorderError::SessionSave(e.to_string()))?;
        self.log(
            "info",
            "session_saved",
            json!({
                "path": path.display().to_string(),
                "keys": store.keys().count(),
                "records": store.len(),
            }),
        );
        Ok(())
    }

    pub fn load(
        &self,
        path: &Path,
        matcher: Arc<dyn RecordMatcher>,
    ) -> Result<SessionStore, RecorderError> {
        let loaded = self
            .fs
            .read_to_string(path)
            .map_err(|e| RecorderError::SessionLoad(e.to_string()))
            .and_then(|text| from_json(&text, matcher));
        match &loaded {
            Ok(store) => self.log(
                "info",
                "session_loaded",
                json!({
                    "path": path.display().to_string(),
                    "keys": store.keys().count(),
                    "records": store.len(),
                }),
            ),
            Err(error) => self.log(
                "error",
                "session_load_failed",
                json!({"path": path.display().to_string(), "error": error.to_string()}),
            ),
        }
        loaded
    }

    fn log(&self, level: &str, event_type: &str, payload: serde_json::Value) {
        log_event(self.logger.as_ref(), level, event_type, payload);
    }
}

/// Where session files live: `records_dir/<suite>/<test>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    records_dir: PathBuf,
}

impl SessionLayout {
    pub fn new(records_dir: impl Into<PathBuf>) -> Self {
        Self {
            records_dir: records_dir.into(),
        }
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    pub fn session_path(&self, suite: &str, test: &str) -> PathBuf {
        self.records_dir
            .join(sanitize_component(suite))
            .join(format!("{}.json", sanitize_component(test)))
    }
}

fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::SimpleMatcher;
    use crate::runtime::FakeFileSystem;

    fn matcher() -> Arc<dyn RecordMatcher> {
        Arc::new(SimpleMatcher::default())
    }

    #[test]
    fn document_has_version_and_keyed_records_without_type_tags() {
        let mut store = SessionStore::new(matcher());
        store.enqueue(InteractionRecord::new("GET", "/foo?t=1").with_response_body("ok"));
        let text = to_json(&store, false).expect("render");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["records"]["GET:/foo"][0]["target"], "/foo?t=1");
        assert!(!text.contains("$type"));
    }

    #[test]
    fn key_order_survives_a_round_trip() {
        let mut store = SessionStore::new(matcher());
        store.enqueue_range([
            InteractionRecord::new("GET", "/zeta"),
            InteractionRecord::new("GET", "/alpha"),
            InteractionRecord::new("GET", "/mid"),
        ]);
        let loaded = from_json(&to_json(&store, true).expect("render"), matcher()).expect("load");
        assert_eq!(
            loaded.keys().collect::<Vec<_>>(),
            vec!["GET:/zeta", "GET:/alpha", "GET:/mid"]
        );
    }

    #[test]
    fn unsupported_or_missing_version_is_rejected() {
        for text in [
            r#"{"schema_version": 2, "records": {}}"#,
            r#"{"records": {}}"#,
            r#"{"schema_version": 1, "records": {"k": [{"method": "GET"}]}}"#,
            "not json",
        ] {
            assert!(
                matches!(from_json(text, matcher()), Err(RecorderError::SessionLoad(_))),
                "accepted: {text}"
            );
        }
    }

    #[test]
    fn repeated_match_key_fails_the_whole_load() {
        let text = r#"{"schema_version":1,"records":{
            "GET:/k":[{"method":"GET","target":"/1","status_code":200}],
            "GET:/other":[{"method":"GET","target":"/other","status_code":200}],
            "GET:/k":[{"method":"GET","target":"/2","status_code":200}]}}"#;
        match from_json(text, matcher()) {
            Err(RecorderError::SessionLoad(message)) => {
                assert!(message.contains("duplicate match key `GET:/k`"), "{message}")
            }
            other => panic!("expected SessionLoad, got {other:?}"),
        }
    }

    #[test]
    fn archive_writes_through_file_system_and_creates_parent() {
        let fs = FakeFileSystem::default();
        let archive = SessionArchive::new(Arc::new(fs.clone()));
        let mut store = SessionStore::new(matcher());
        store.enqueue(InteractionRecord::new("DELETE", "/nsg/web"));

        archive
            .save(&store, Path::new("/records/Network/Remove.json"))
            .expect("save");

        assert!(fs.file("/records/Network/Remove.json").is_some());
        assert_eq!(fs.created_dirs(), vec![PathBuf::from("/records/Network")]);
        let loaded = archive
            .load(Path::new("/records/Network/Remove.json"), matcher())
            .expect("load");
        assert_eq!(loaded.remaining("DELETE:/nsg/web"), 1);
    }

    #[test]
    fn archive_surfaces_missing_file_and_write_failures() {
        let fs = FakeFileSystem::default();
        let archive = SessionArchive::new(Arc::new(fs.clone()));
        assert!(matches!(
            archive.load(Path::new("/missing.json"), matcher()),
            Err(RecorderError::SessionLoad(_))
        ));

        fs.set_fail_next(RecorderError::Io("disk full".to_string()));
        let store = SessionStore::new(matcher());
        match archive.save(&store, Path::new("session.json")) {
            Err(RecorderError::SessionSave(message)) => assert!(message.contains("disk full")),
            other => panic!("expected SessionSave, got {other:?}"),
        }
    }

    #[test]
    fn archive_logs_load_outcomes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_path = dir.path().join("events.jsonl");
        let fs = FakeFileSystem::with_file(
            "/s.json",
            r#"{"schema_version":1,"records":{"GET:/a":[{"method":"GET","target":"/a","status_code":200}]}}"#,
        );
        let archive =
            SessionArchive::new(Arc::new(fs)).with_logger(Some(JsonlLogger::new(&log_path)));

        archive.load(Path::new("/s.json"), matcher()).expect("load");
        let _ = archive.load(Path::new("/nope.json"), matcher());

        let log = std::fs::read_to_string(&log_path).expect("read log");
        let events: Vec<serde_json::Value> = log
            .lines()
            .map(|line| serde_json::from_str(line).expect("log line"))
            .collect();
        assert_eq!(events[0]["event_type"], "session_loaded");
        assert_eq!(events[0]["payload"]["records"], 1);
        assert_eq!(events[1]["event_type"], "session_load_failed");
        assert_eq!(events[1]["level"], "error");
    }

    #[test]
    fn layout_sanitises_suite_and_test_names() {
        let layout = SessionLayout::new("SessionRecords");
        assert_eq!(
            layout.session_path("Storage", "TestUploadBlob"),
            PathBuf::from("SessionRecords/Storage/TestUploadBlob.json")
        );
        assert_eq!(
            layout.session_path("../evil", "a/b c"),
            PathBuf::from("SessionRecords/.._evil/a_b_c.json")
        );
        assert_eq!(
            layout.session_path("..", ""),
            PathBuf::from("SessionRecords/_/_.json")
        );
    }
}
