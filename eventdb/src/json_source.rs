use std::path::Path;

use tracing::debug;
use wtf_format::{SnapshotBuffer, TraceDocument, JSON_MIME_TYPE};

use crate::arguments::ArgumentData;
use crate::database::{Database, SourceInfo, ZoneId};
use crate::error::SourceError;
use crate::event_type::EventTypeDescriptor;

/// Ingestion adapter for `.wtf-json` recordings: parses the document, feeds
/// its event list through the database batch API, and retains the raw bytes
/// for storage snapshots.
///
/// A parse or insert failure aborts the batch, leaving the zone at its last
/// commit.
pub struct JsonDataSource {
    document: TraceDocument,
    raw: Vec<u8>,
}

impl JsonDataSource {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SourceError> {
        let document: TraceDocument = serde_json::from_slice(bytes)?;
        Ok(JsonDataSource {
            document,
            raw: bytes.to_vec(),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    pub fn document(&self) -> &TraceDocument {
        &self.document
    }

    /// The session metadata carried by the document header.
    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            context_info: self.document.context_info.clone().unwrap_or_default(),
            flags: self.document.flags,
            metadata: self
                .document
                .metadata
                .clone()
                .unwrap_or(serde_json::Value::Null),
            timebase: self.document.timebase,
            time_delay: self.document.time_delay,
        }
    }

    /// Feeds every event into `zone` as one batch. Event names unknown to
    /// the type table are interned as instance types; scope semantics arrive
    /// through the builtin enter/leave events. Returns the number of events
    /// ingested.
    pub fn load_into(self, db: &mut Database, zone: ZoneId) -> Result<usize, SourceError> {
        let source = db.add_source(self.info());
        db.set_source_buffer(
            source,
            SnapshotBuffer {
                mime_type: JSON_MIME_TYPE.to_owned(),
                data: self.raw,
            },
        )?;

        db.begin_insert_batch()?;
        let mut inserted = 0usize;
        for entry in &self.document.events {
            let type_id = match db.event_types().by_name(&entry.event) {
                Some(ty) => ty.id(),
                None => db.define_type(EventTypeDescriptor::instance(entry.event.clone())),
            };
            let args = entry.args.as_ref().and_then(ArgumentData::from_json);
            if let Err(error) = db.add_event(zone, type_id, entry.time as u32, args) {
                db.abort_insert_batch();
                return Err(error.into());
            }
            inserted += 1;
        }
        db.commit_insert_batch()?;
        debug!(source, events = inserted, "json source loaded");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::ArgValue;
    use std::io::Write;

    const TRACE: &str = r#"{
        "contextInfo": "http://example.com/app.js",
        "flags": 1,
        "timebase": 1469084304.734,
        "events": [
            {"event": "wtf.scope#enter", "time": 0, "args": {"name": "frame"}},
            {"event": "app#tick", "time": 100, "args": {"n": 1}},
            {"event": "wtf.scope#leave", "time": 16000}
        ]
    }"#;

    #[test]
    fn loads_a_document_into_a_zone() {
        let mut db = Database::new();
        let zone = db.create_zone("main", "script", "test://");
        let source = JsonDataSource::from_slice(TRACE.as_bytes()).expect("parse failed");
        assert_eq!(source.info().context_info, "http://example.com/app.js");
        assert!(source.info().has_high_resolution_times());

        let inserted = source.load_into(&mut db, zone).expect("load failed");
        assert_eq!(inserted, 3);

        let store = db.zone(zone).unwrap().store();
        assert_eq!(store.len(), 3);
        let it = store.get_event(db.event_types(), 0);
        assert_eq!(it.name(), "frame");
        assert!(it.is_scope());
        assert_eq!(it.end_time_ms(), 16.0);
        assert_eq!(it.argument("name").and_then(ArgValue::as_str), Some("frame"));

        let it = store.get_event(db.event_types(), 1);
        assert_eq!(it.name(), "app#tick");
        assert_eq!(it.argument("n").and_then(ArgValue::as_int), Some(1));
        assert_eq!(it.depth(), 1);
    }

    #[test]
    fn snapshot_reproduces_the_raw_bytes() {
        let mut db = Database::new();
        let zone = db.create_zone("main", "script", "test://");
        JsonDataSource::from_slice(TRACE.as_bytes())
            .expect("parse failed")
            .load_into(&mut db, zone)
            .expect("load failed");

        let buffers = db.snapshot_data_stream_buffers();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].mime_type, JSON_MIME_TYPE);
        assert_eq!(buffers[0].data, TRACE.as_bytes());
    }

    #[test]
    fn malformed_documents_are_a_parse_error() {
        let result = JsonDataSource::from_slice(b"{\"events\": [{]");
        assert!(matches!(result, Err(SourceError::Parse(_))));
    }

    #[test]
    fn reads_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file failed");
        file.write_all(TRACE.as_bytes()).expect("write failed");
        let source = JsonDataSource::from_path(file.path()).expect("read failed");
        assert_eq!(source.document().events.len(), 3);
    }
}
