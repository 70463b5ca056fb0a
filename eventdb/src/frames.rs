use std::collections::HashMap;

use tracing::debug;

use crate::ancillary::AncillaryIndex;
use crate::arguments::ArgValue;
use crate::event_type::{well_known, EventType, EventTypeTable};
use crate::iterator::EventIterator;
use crate::store::ms_to_us;

/// One rendered frame, reconstructed from a frameStart/frameEnd pair keyed by
/// frame number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    number: u32,
    start_time_us: u32,
    end_time_us: u32,
}

impl Frame {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn start_time_ms(&self) -> f64 {
        self.start_time_us as f64 / 1000.0
    }

    pub fn end_time_ms(&self) -> f64 {
        self.end_time_us as f64 / 1000.0
    }

    pub fn duration_ms(&self) -> f64 {
        (self.end_time_us - self.start_time_us) as f64 / 1000.0
    }
}

#[derive(Default)]
struct PendingFrame {
    start_time_us: Option<u32>,
    end_time_us: Option<u32>,
}

const TYPE_FRAME_START: usize = 0;
const TYPE_FRAME_END: usize = 1;

/// Frame list: subscribes to `wtf.timing#frameStart` / `frameEnd`, keyed by
/// the `number` argument. Frames missing either endpoint are discarded when
/// the rebuild ends.
#[derive(Default)]
pub struct FrameIndex {
    pending: HashMap<u32, PendingFrame>,
    frames: Vec<Frame>,
}

impl FrameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn frame(&self, number: u32) -> Option<&Frame> {
        self.frames.iter().find(|frame| frame.number == number)
    }

    /// The frame whose [start, end] interval contains `time_ms`, if any.
    pub fn frame_at_time(&self, time_ms: f64) -> Option<&Frame> {
        let time_us = ms_to_us(time_ms);
        let slot = self
            .frames
            .partition_point(|frame| frame.start_time_us <= time_us);
        let frame = self.frames[..slot].last()?;
        (frame.end_time_us >= time_us).then_some(frame)
    }

    /// Frames intersecting [start_ms, end_ms], in start order.
    pub fn frames_in_range(&self, start_ms: f64, end_ms: f64) -> impl Iterator<Item = &Frame> {
        let start_us = ms_to_us(start_ms);
        let end_us = ms_to_us(end_ms);
        self.frames
            .iter()
            .filter(move |frame| frame.end_time_us >= start_us && frame.start_time_us <= end_us)
    }
}

impl AncillaryIndex for FrameIndex {
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<EventType>> {
        self.pending.clear();
        self.frames.clear();
        vec![
            types.by_name(well_known::FRAME_START).cloned(),
            types.by_name(well_known::FRAME_END).cloned(),
        ]
    }

    fn handle_event(&mut self, type_index: usize, _event_type: &EventType, it: &EventIterator<'_>) {
        let Some(number) = it.argument("number").and_then(ArgValue::as_int) else {
            debug!(id = it.id(), "frame event without a number argument, ignored");
            return;
        };
        let pending = self.pending.entry(number as u32).or_default();
        match type_index {
            TYPE_FRAME_START => pending.start_time_us = Some(it.time_us()),
            TYPE_FRAME_END => pending.end_time_us = Some(it.time_us()),
            _ => {}
        }
    }

    fn end_rebuild(&mut self) {
        let mut frames: Vec<Frame> = self
            .pending
            .drain()
            .filter_map(|(number, pending)| match pending {
                PendingFrame {
                    start_time_us: Some(start_time_us),
                    end_time_us: Some(end_time_us),
                } => Some(Frame {
                    number,
                    start_time_us,
                    end_time_us,
                }),
                _ => {
                    debug!(number, "discarding frame missing start or end");
                    None
                }
            })
            .collect();
        frames.sort_by_key(|frame| frame.start_time_us);
        self.frames = frames;
        debug!(frames = self.frames.len(), "frame index rebuilt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ancillary::dispatch;
    use crate::arguments::ArgumentData;
    use crate::store::EventStore;
    use rstest::{fixture, rstest};

    fn frame_event(
        store: &mut EventStore,
        types: &EventTypeTable,
        name: &str,
        number: i64,
        time_us: u32,
    ) {
        let type_id = types.by_name(name).unwrap().id();
        let args = ArgumentData::new().with("number", ArgValue::Int(number));
        store.insert(type_id, time_us, Some(args)).unwrap();
    }

    struct Fixture {
        types: EventTypeTable,
        store: EventStore,
    }

    #[fixture]
    fn two_frames() -> Fixture {
        let mut types = EventTypeTable::new();
        let mut store = EventStore::new();
        frame_event(&mut store, &types, well_known::FRAME_START, 1, 1000);
        frame_event(&mut store, &types, well_known::FRAME_END, 1, 17000);
        frame_event(&mut store, &types, well_known::FRAME_START, 2, 17000);
        store.rebuild(&mut types).unwrap();
        Fixture { types, store }
    }

    #[rstest]
    fn discards_frames_missing_an_endpoint(two_frames: Fixture) {
        let mut index = FrameIndex::new();
        dispatch(&two_frames.store, &two_frames.types, &mut [&mut index]);

        assert_eq!(index.count(), 1);
        let frame = index.frame(1).expect("frame 1 missing");
        assert_eq!(frame.start_time_ms(), 1.0);
        assert_eq!(frame.end_time_ms(), 17.0);
        assert_eq!(frame.duration_ms(), 16.0);
        assert!(index.frame(2).is_none());
    }

    #[rstest]
    fn frame_at_time_covers_the_interval(two_frames: Fixture) {
        let mut index = FrameIndex::new();
        dispatch(&two_frames.store, &two_frames.types, &mut [&mut index]);

        assert_eq!(index.frame_at_time(10.0).map(Frame::number), Some(1));
        assert_eq!(index.frame_at_time(1.0).map(Frame::number), Some(1));
        assert!(index.frame_at_time(0.5).is_none());
        assert!(index.frame_at_time(30.0).is_none());
    }

    #[test]
    fn frames_in_range_filters_by_overlap() {
        let mut types = EventTypeTable::new();
        let mut store = EventStore::new();
        for number in 0..4i64 {
            let start = number as u32 * 16000;
            frame_event(&mut store, &types, well_known::FRAME_START, number, start);
            frame_event(&mut store, &types, well_known::FRAME_END, number, start + 16000);
        }
        store.rebuild(&mut types).unwrap();
        let mut index = FrameIndex::new();
        dispatch(&store, &types, &mut [&mut index]);

        let numbers: Vec<u32> = index
            .frames_in_range(20.0, 40.0)
            .map(Frame::number)
            .collect();
        assert_eq!(numbers, [1, 2]);
    }
}
