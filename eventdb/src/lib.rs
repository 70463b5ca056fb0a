//! In-memory columnar database for trace event recordings.
//!
//! One or more recording sessions feed zones (logical event streams); each
//! zone owns a packed column buffer of fixed-width event records. Ingestion
//! happens in batches: events are appended unsorted, then a rebuild sorts
//! them by (time, insertion order), reconstructs scope nesting and timing
//! aggregates, and refreshes the ancillary indexes (frames, marks, time
//! ranges) subscribed to the stream. Readers consume the committed state
//! through cursors; statistics and queries are computed on demand.

pub mod ancillary;
pub mod arguments;
pub mod database;
pub mod error;
pub mod event_type;
pub mod frames;
pub mod iterator;
pub mod json_source;
pub mod marks;
pub mod query;
pub mod statistics;
pub mod store;
pub mod time_ranges;
pub mod zone;

pub use ancillary::AncillaryIndex;
pub use arguments::{ArgValue, ArgumentData};
pub use database::{
    Database, Invalidation, InvalidationScope, SourceId, SourceInfo, ZoneId,
};
pub use error::{DatabaseError, QueryError, SourceError, StoreError};
pub use event_type::{
    flags, well_known, ArgKind, ArgSpec, EventClass, EventType, EventTypeDescriptor,
    EventTypeTable,
};
pub use frames::{Frame, FrameIndex};
pub use iterator::EventIterator;
pub use json_source::JsonDataSource;
pub use marks::{Mark, MarkIndex};
pub use query::{Query, QueryResult, ZoneMatches};
pub use statistics::{Entry, InstanceEntry, ScopeEntry, SortMode, StatisticsTable};
pub use store::EventStore;
pub use time_ranges::{TimeRange, TimeRangeIndex};
pub use zone::Zone;
