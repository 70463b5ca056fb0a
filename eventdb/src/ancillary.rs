use std::collections::HashMap;

use crate::event_type::{EventType, EventTypeTable};
use crate::iterator::EventIterator;
use crate::store::EventStore;

/// A derived list rebuilt from the main event store after every ingestion
/// batch (frames, marks, time ranges).
///
/// The driver calls `begin_rebuild` once to collect subscriptions, then
/// `handle_event` once per matching event in post-sort order, then
/// `end_rebuild`. The position of a type in the returned subscription vector
/// is the `type_index` handed back on each delivery. The cursor is shared and
/// freshly positioned by the driver before every delivery; the `&` receiver
/// keeps implementations from advancing it.
pub trait AncillaryIndex {
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<EventType>>;
    fn handle_event(&mut self, type_index: usize, event_type: &EventType, it: &EventIterator<'_>);
    fn end_rebuild(&mut self);
}

/// Drives one full rebuild pass over `store` for the given indexes. Also
/// used for the single-index rebuild after a late registration.
pub(crate) fn dispatch(
    store: &EventStore,
    types: &EventTypeTable,
    indexes: &mut [&mut dyn AncillaryIndex],
) {
    let subscriptions: Vec<Vec<Option<EventType>>> = indexes
        .iter_mut()
        .map(|index| index.begin_rebuild(types))
        .collect();

    let mut routes: HashMap<u32, Vec<(usize, usize)>> = HashMap::new();
    for (index_no, subscribed) in subscriptions.iter().enumerate() {
        for (type_index, ty) in subscribed.iter().enumerate() {
            if let Some(ty) = ty {
                routes.entry(ty.id()).or_default().push((index_no, type_index));
            }
        }
    }

    if !routes.is_empty() && !store.is_empty() {
        let mut it = store.begin(types);
        for id in 0..store.len() as u32 {
            it.seek(id);
            let Some(targets) = routes.get(&it.type_id()) else {
                continue;
            };
            for &(index_no, type_index) in targets {
                if let Some(ty) = &subscriptions[index_no][type_index] {
                    it.seek(id);
                    indexes[index_no].handle_event(type_index, ty, &it);
                }
            }
        }
    }

    for index in indexes.iter_mut() {
        index.end_rebuild();
    }
}
