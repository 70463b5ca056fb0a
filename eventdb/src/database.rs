use std::collections::BTreeSet;

use tracing::{debug, warn};
use wtf_format::{source_flags, SnapshotBuffer};

use crate::ancillary::AncillaryIndex;
use crate::arguments::ArgumentData;
use crate::error::{DatabaseError, Result};
use crate::event_type::{EventTypeDescriptor, EventTypeTable};
use crate::query::{Query, QueryResult, ZoneMatches};
use crate::zone::Zone;

/// Index of a zone within its database.
pub type ZoneId = usize;

/// Index of a registered data source within its database.
pub type SourceId = usize;

/// Recording-session metadata delivered once per source, after the source's
/// header has been parsed.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Human-readable description of the recorded context.
    pub context_info: String,
    /// Source flag bitmask; `HAS_HIGH_RESOLUTION_TIMES` is the only bit the
    /// core observes.
    pub flags: u32,
    /// Free-form metadata attached by the recorder.
    pub metadata: serde_json::Value,
    /// Wall-clock seconds of t=0 in the trace.
    pub timebase: f64,
    /// Estimated source-to-local clock skew in seconds.
    pub time_delay: f64,
}

impl SourceInfo {
    pub fn has_high_resolution_times(&self) -> bool {
        self.flags & source_flags::HAS_HIGH_RESOLUTION_TIMES != 0
    }
}

struct SourceEntry {
    info: SourceInfo,
    buffer: Option<SnapshotBuffer>,
}

/// What an invalidation event covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    /// One zone finished an ancillary rebuild (or became invalid).
    Zone(ZoneId),
    /// The whole database finished an ingestion batch.
    Database,
}

/// Notification that derived state changed and consumers must re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    pub scope: InvalidationScope,
    /// Monotonically increasing across all invalidations of the database.
    pub revision: u64,
}

struct Batch {
    touched: BTreeSet<ZoneId>,
}

/// The trace event database: owns the event type table, the zones, the
/// registered data sources, and orchestrates ingestion batches.
///
/// One logical actor owns the database; `&mut` methods serialize ingestion
/// and rebuild, shared borrows serve readers. Events inserted since the last
/// committed batch are invisible to readers until the next commit.
pub struct Database {
    types: EventTypeTable,
    zones: Vec<Zone>,
    sources: Vec<SourceEntry>,
    listeners: Vec<Box<dyn FnMut(&Invalidation)>>,
    batch: Option<Batch>,
    revision: u64,
}

impl Database {
    pub fn new() -> Self {
        Database {
            types: EventTypeTable::new(),
            zones: Vec::new(),
            sources: Vec::new(),
            listeners: Vec::new(),
            batch: None,
            revision: 0,
        }
    }

    pub fn event_types(&self) -> &EventTypeTable {
        &self.types
    }

    /// Interns an event type definition; returns its id. Defining an
    /// already-known name returns the existing id.
    pub fn define_type(&mut self, descriptor: EventTypeDescriptor) -> u32 {
        self.types.define(descriptor).id()
    }

    pub fn create_zone(
        &mut self,
        name: impl Into<String>,
        zone_type: impl Into<String>,
        location: impl Into<String>,
    ) -> ZoneId {
        let id = self.zones.len();
        self.zones.push(Zone::new(name, zone_type, location));
        id
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Registers a recording session. Equivalent to the data-source
    /// `initialize` lifecycle step.
    pub fn add_source(&mut self, info: SourceInfo) -> SourceId {
        let id = self.sources.len();
        debug!(source = id, context = %info.context_info, "source registered");
        self.sources.push(SourceEntry { info, buffer: None });
        id
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceInfo> {
        self.sources.get(id).map(|entry| &entry.info)
    }

    /// Retains the raw recording bytes of a source so storage snapshots can
    /// reproduce them.
    pub fn set_source_buffer(&mut self, id: SourceId, buffer: SnapshotBuffer) -> Result<()> {
        let entry = self
            .sources
            .get_mut(id)
            .ok_or(DatabaseError::UnknownSource(id))?;
        entry.buffer = Some(buffer);
        Ok(())
    }

    /// One buffer per source that retained its bytes. Callers writing these
    /// to disk append the extension matching each buffer's MIME type.
    pub fn snapshot_data_stream_buffers(&self) -> Vec<SnapshotBuffer> {
        self.sources
            .iter()
            .filter_map(|entry| entry.buffer.clone())
            .collect()
    }

    /// Subscribes to invalidation events fired after every successful batch
    /// commit (and after a zone turns invalid).
    pub fn on_invalidated(&mut self, listener: impl FnMut(&Invalidation) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Revision of the most recent invalidation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn bump_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn notify(&mut self, invalidation: Invalidation) {
        for listener in &mut self.listeners {
            listener(&invalidation);
        }
    }

    /// Opens an ingestion batch. Ingestion is serialized: a second open
    /// without a commit or abort is an error.
    pub fn begin_insert_batch(&mut self) -> Result<()> {
        if self.batch.is_some() {
            return Err(DatabaseError::BatchAlreadyOpen);
        }
        self.batch = Some(Batch {
            touched: BTreeSet::new(),
        });
        Ok(())
    }

    /// Appends one decoded event to a zone inside the open batch. The record
    /// stays invisible to readers until the batch commits.
    pub fn add_event(
        &mut self,
        zone: ZoneId,
        type_id: u32,
        time_us: u32,
        args: Option<ArgumentData>,
    ) -> Result<u32> {
        if self.batch.is_none() {
            return Err(DatabaseError::BatchNotOpen);
        }
        if self.types.by_id(type_id).is_none() {
            return Err(DatabaseError::UnknownEventType(type_id));
        }
        let zone_ref = self
            .zones
            .get_mut(zone)
            .ok_or(DatabaseError::UnknownZone(zone))?;
        if zone_ref.is_invalid() {
            return Err(DatabaseError::ZoneInvalid(zone_ref.name().to_owned()));
        }
        match zone_ref.store_mut().insert(type_id, time_us, args) {
            Ok(id) => {
                if let Some(batch) = self.batch.as_mut() {
                    batch.touched.insert(zone);
                }
                Ok(id)
            }
            Err(error) => {
                warn!(
                    zone = %zone_ref.name(),
                    error = %error,
                    "event storage exhausted, marking zone invalid"
                );
                zone_ref.mark_invalid();
                let revision = self.bump_revision();
                self.notify(Invalidation {
                    scope: InvalidationScope::Zone(zone),
                    revision,
                });
                Err(error.into())
            }
        }
    }

    /// Commits the open batch: every touched zone is rebuilt (sort, re-scope,
    /// ancillary dispatch), zone invalidations fire per zone, then one
    /// database-wide invalidation aggregates them.
    pub fn commit_insert_batch(&mut self) -> Result<()> {
        let Some(batch) = self.batch.take() else {
            return Err(DatabaseError::BatchNotOpen);
        };
        for zone_id in batch.touched {
            let zone_ref = &mut self.zones[zone_id];
            if let Err(error) = zone_ref.rebuild(&mut self.types) {
                warn!(zone = %zone_ref.name(), error = %error, "rebuild failed, marking zone invalid");
                zone_ref.mark_invalid();
                let revision = self.bump_revision();
                self.notify(Invalidation {
                    scope: InvalidationScope::Zone(zone_id),
                    revision,
                });
                return Err(error.into());
            }
            let revision = self.bump_revision();
            self.notify(Invalidation {
                scope: InvalidationScope::Zone(zone_id),
                revision,
            });
        }
        let revision = self.bump_revision();
        self.notify(Invalidation {
            scope: InvalidationScope::Database,
            revision,
        });
        Ok(())
    }

    /// Discards the open batch: every touched zone drops its uncommitted
    /// records and stays at its last commit. Used when a source fails
    /// mid-parse.
    pub fn abort_insert_batch(&mut self) {
        let Some(batch) = self.batch.take() else {
            return;
        };
        for zone_id in batch.touched {
            if let Some(zone_ref) = self.zones.get_mut(zone_id) {
                zone_ref.store_mut().rollback();
            }
        }
        debug!("insert batch aborted");
    }

    /// Registers an extension index on a zone. Against already-committed
    /// events the index is rebuilt immediately. Returns a token for
    /// [`unregister_ancillary`](Database::unregister_ancillary).
    pub fn register_ancillary(
        &mut self,
        zone: ZoneId,
        index: Box<dyn AncillaryIndex>,
    ) -> Result<usize> {
        let zone_ref = self
            .zones
            .get_mut(zone)
            .ok_or(DatabaseError::UnknownZone(zone))?;
        Ok(zone_ref.register_ancillary(index, &self.types))
    }

    pub fn unregister_ancillary(
        &mut self,
        zone: ZoneId,
        token: usize,
    ) -> Result<Option<Box<dyn AncillaryIndex>>> {
        let zone_ref = self
            .zones
            .get_mut(zone)
            .ok_or(DatabaseError::UnknownZone(zone))?;
        Ok(zone_ref.unregister_ancillary(token))
    }

    /// Compiles `expression` and scans every zone with it. See [`Query`] for
    /// the accepted syntaxes.
    pub fn query(&self, expression: &str) -> std::result::Result<QueryResult, crate::error::QueryError> {
        let query = Query::compile(expression)?;
        let started = std::time::Instant::now();
        let mut zones = Vec::new();
        for (zone_id, zone_ref) in self.zones.iter().enumerate() {
            let store = zone_ref.store();
            if store.is_empty() {
                continue;
            }
            let mut matches = Vec::new();
            let mut it = store.begin(&self.types);
            while !it.done() {
                if query.matches(it.name()) {
                    matches.push(it.id());
                }
                it.next();
            }
            if !matches.is_empty() {
                zones.push(ZoneMatches {
                    zone: zone_id,
                    zone_name: zone_ref.name().to_owned(),
                    indices: matches,
                });
            }
        }
        Ok(QueryResult::new(query, zones, started.elapsed()))
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_type::well_known;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn type_id(db: &Database, name: &str) -> u32 {
        db.event_types().by_name(name).unwrap().id()
    }

    #[test]
    fn events_are_invisible_until_commit() {
        let mut db = Database::new();
        let zone = db.create_zone("main", "script", "test://");
        let mark = type_id(&db, well_known::TRACE_MARK);

        db.begin_insert_batch().unwrap();
        db.add_event(zone, mark, 100, None).unwrap();
        assert_eq!(db.zone(zone).unwrap().store().uncommitted(), 1);
        db.commit_insert_batch().unwrap();
        assert_eq!(db.zone(zone).unwrap().store().uncommitted(), 0);
        assert_eq!(db.zone(zone).unwrap().store().len(), 1);
    }

    #[test]
    fn abort_restores_last_commit() {
        let mut db = Database::new();
        let zone = db.create_zone("main", "script", "test://");
        let mark = type_id(&db, well_known::TRACE_MARK);

        db.begin_insert_batch().unwrap();
        db.add_event(zone, mark, 100, None).unwrap();
        db.commit_insert_batch().unwrap();

        db.begin_insert_batch().unwrap();
        db.add_event(zone, mark, 200, None).unwrap();
        db.add_event(zone, mark, 300, None).unwrap();
        db.abort_insert_batch();

        assert_eq!(db.zone(zone).unwrap().store().len(), 1);
        db.begin_insert_batch().unwrap();
        assert!(db.add_event(zone, mark, 400, None).is_ok());
        db.commit_insert_batch().unwrap();
        assert_eq!(db.zone(zone).unwrap().store().len(), 2);
    }

    #[test]
    fn batches_are_serialized() {
        let mut db = Database::new();
        assert!(matches!(
            db.commit_insert_batch(),
            Err(DatabaseError::BatchNotOpen)
        ));
        db.begin_insert_batch().unwrap();
        assert!(matches!(
            db.begin_insert_batch(),
            Err(DatabaseError::BatchAlreadyOpen)
        ));
    }

    #[test]
    fn add_event_validates_zone_and_type() {
        let mut db = Database::new();
        let zone = db.create_zone("main", "script", "test://");
        let mark = type_id(&db, well_known::TRACE_MARK);
        db.begin_insert_batch().unwrap();
        assert!(matches!(
            db.add_event(99, mark, 0, None),
            Err(DatabaseError::UnknownZone(99))
        ));
        assert!(matches!(
            db.add_event(zone, 0, 0, None),
            Err(DatabaseError::UnknownEventType(0))
        ));
    }

    #[test]
    fn invalidation_fires_per_zone_then_database_wide() {
        let mut db = Database::new();
        let zone = db.create_zone("main", "script", "test://");
        let mark = type_id(&db, well_known::TRACE_MARK);

        let seen: Rc<RefCell<Vec<Invalidation>>> = Rc::default();
        let sink = seen.clone();
        db.on_invalidated(move |invalidation| sink.borrow_mut().push(*invalidation));

        db.begin_insert_batch().unwrap();
        db.add_event(zone, mark, 100, None).unwrap();
        db.commit_insert_batch().unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].scope, InvalidationScope::Zone(zone));
        assert_eq!(seen[1].scope, InvalidationScope::Database);
        assert!(seen[0].revision < seen[1].revision);
        assert_eq!(db.revision(), seen[1].revision);
    }

    #[test]
    fn snapshot_returns_retained_buffers() {
        let mut db = Database::new();
        let source = db.add_source(SourceInfo {
            context_info: "test".to_owned(),
            flags: source_flags::HAS_HIGH_RESOLUTION_TIMES,
            metadata: serde_json::Value::Null,
            timebase: 0.0,
            time_delay: 0.0,
        });
        assert!(db.source(source).unwrap().has_high_resolution_times());
        assert!(db.snapshot_data_stream_buffers().is_empty());

        db.set_source_buffer(
            source,
            SnapshotBuffer {
                mime_type: wtf_format::JSON_MIME_TYPE.to_owned(),
                data: b"{}".to_vec(),
            },
        )
        .unwrap();
        let buffers = db.snapshot_data_stream_buffers();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].mime_type, wtf_format::JSON_MIME_TYPE);
    }
}
