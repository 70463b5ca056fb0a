use tracing::debug;

use crate::ancillary::{dispatch, AncillaryIndex};
use crate::error::StoreError;
use crate::event_type::EventTypeTable;
use crate::frames::FrameIndex;
use crate::marks::MarkIndex;
use crate::store::EventStore;
use crate::time_ranges::TimeRangeIndex;

/// A logical event stream (typically a thread or isolate): one event store
/// plus the ancillary indexes derived from it.
pub struct Zone {
    name: String,
    zone_type: String,
    location: String,
    store: EventStore,
    frames: FrameIndex,
    marks: MarkIndex,
    time_ranges: TimeRangeIndex,
    extra: Vec<Option<Box<dyn AncillaryIndex>>>,
    invalid: bool,
    revision: u64,
}

impl Zone {
    pub(crate) fn new(
        name: impl Into<String>,
        zone_type: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Zone {
            name: name.into(),
            zone_type: zone_type.into(),
            location: location.into(),
            store: EventStore::new(),
            frames: FrameIndex::new(),
            marks: MarkIndex::new(),
            time_ranges: TimeRangeIndex::new(),
            extra: Vec::new(),
            invalid: false,
            revision: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn zone_type(&self) -> &str {
        &self.zone_type
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut EventStore {
        &mut self.store
    }

    pub fn frame_list(&self) -> &FrameIndex {
        &self.frames
    }

    pub fn mark_list(&self) -> &MarkIndex {
        &self.marks
    }

    pub fn time_range_list(&self) -> &TimeRangeIndex {
        &self.time_ranges
    }

    /// Rebuilds counted since zone creation; bumped once per successful
    /// rebuild, observable alongside invalidation events.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True once an allocation failure has made further ingestion into this
    /// zone impossible. Committed data stays readable.
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub(crate) fn mark_invalid(&mut self) {
        self.invalid = true;
    }

    /// Finalizes the store, then drives every ancillary index through the
    /// subscription protocol.
    pub(crate) fn rebuild(&mut self, types: &mut EventTypeTable) -> Result<(), StoreError> {
        self.store.rebuild(types)?;
        {
            let Zone {
                store,
                frames,
                marks,
                time_ranges,
                extra,
                ..
            } = self;
            let mut indexes: Vec<&mut dyn AncillaryIndex> = vec![
                frames as &mut dyn AncillaryIndex,
                marks as &mut dyn AncillaryIndex,
                time_ranges as &mut dyn AncillaryIndex,
            ];
            for slot in extra.iter_mut().flatten() {
                indexes.push(slot.as_mut());
            }
            dispatch(store, types, &mut indexes);
        }
        self.revision += 1;
        debug!(
            zone = %self.name,
            events = self.store.len(),
            revision = self.revision,
            "zone rebuilt"
        );
        Ok(())
    }

    /// Registers an extension index. Against a store that already holds
    /// committed events, the new index is rebuilt immediately through the
    /// same dispatch path. Returns a token for unregistration.
    pub(crate) fn register_ancillary(
        &mut self,
        index: Box<dyn AncillaryIndex>,
        types: &EventTypeTable,
    ) -> usize {
        let token = self.extra.len();
        self.extra.push(Some(index));
        if !self.store.is_empty() {
            if let Some(slot) = self.extra[token].as_mut() {
                dispatch(&self.store, types, &mut [slot.as_mut()]);
            }
        }
        token
    }

    pub(crate) fn unregister_ancillary(&mut self, token: usize) -> Option<Box<dyn AncillaryIndex>> {
        self.extra.get_mut(token)?.take()
    }
}
