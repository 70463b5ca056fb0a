use std::collections::HashMap;

use tracing::debug;

use crate::ancillary::AncillaryIndex;
use crate::arguments::ArgValue;
use crate::event_type::{well_known, EventType, EventTypeTable};
use crate::iterator::EventIterator;
use crate::store::ms_to_us;

/// A named span delimited by timeRange begin/end events sharing an id.
/// Overlapping ranges are stacked into display levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    id: i64,
    name: String,
    start_time_us: u32,
    end_time_us: u32,
    level: u32,
}

impl TimeRange {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
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

    /// Display lane: 0 for the first range at a time, incrementing for each
    /// concurrent overlap.
    pub fn level(&self) -> u32 {
        self.level
    }
}

#[derive(Default)]
struct PendingRange {
    name: Option<String>,
    start_time_us: Option<u32>,
    end_time_us: Option<u32>,
}

const TYPE_RANGE_BEGIN: usize = 0;
const TYPE_RANGE_END: usize = 1;

/// Time-range list: subscribes to `wtf.trace#timeRange#begin` / `end`, keyed
/// by the `id` argument. Unbalanced ranges are discarded when the rebuild
/// ends.
#[derive(Default)]
pub struct TimeRangeIndex {
    pending: HashMap<i64, PendingRange>,
    ranges: Vec<TimeRange>,
    max_level: u32,
}

impl TimeRangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeRange> {
        self.ranges.iter()
    }

    /// Highest display level in use, for sizing render lanes.
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Ranges intersecting [start_ms, end_ms], in start order.
    pub fn ranges_in_range(&self, start_ms: f64, end_ms: f64) -> impl Iterator<Item = &TimeRange> {
        let start_us = ms_to_us(start_ms);
        let end_us = ms_to_us(end_ms);
        self.ranges
            .iter()
            .filter(move |range| range.end_time_us >= start_us && range.start_time_us <= end_us)
    }
}

impl AncillaryIndex for TimeRangeIndex {
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<EventType>> {
        self.pending.clear();
        self.ranges.clear();
        self.max_level = 0;
        vec![
            types.by_name(well_known::TIME_RANGE_BEGIN).cloned(),
            types.by_name(well_known::TIME_RANGE_END).cloned(),
        ]
    }

    fn handle_event(&mut self, type_index: usize, _event_type: &EventType, it: &EventIterator<'_>) {
        let Some(id) = it.argument("id").and_then(ArgValue::as_int) else {
            debug!(id = it.id(), "time range event without an id argument, ignored");
            return;
        };
        let pending = self.pending.entry(id).or_default();
        match type_index {
            TYPE_RANGE_BEGIN => {
                pending.start_time_us = Some(it.time_us());
                pending.name = it
                    .argument("name")
                    .and_then(ArgValue::as_str)
                    .map(str::to_owned);
            }
            TYPE_RANGE_END => pending.end_time_us = Some(it.time_us()),
            _ => {}
        }
    }

    fn end_rebuild(&mut self) {
        let mut ranges: Vec<TimeRange> = self
            .pending
            .drain()
            .filter_map(|(id, pending)| match pending {
                PendingRange {
                    name,
                    start_time_us: Some(start_time_us),
                    end_time_us: Some(end_time_us),
                } if end_time_us >= start_time_us => Some(TimeRange {
                    id,
                    name: name.unwrap_or_default(),
                    start_time_us,
                    end_time_us,
                    level: 0,
                }),
                _ => {
                    debug!(range = id, "discarding unbalanced time range");
                    None
                }
            })
            .collect();
        ranges.sort_by_key(|range| (range.start_time_us, range.id));

        // Greedy lane assignment: each range takes the lowest lane that has
        // drained before it starts.
        let mut lane_ends: Vec<u32> = Vec::new();
        for range in &mut ranges {
            let lane = lane_ends
                .iter()
                .position(|&end| end < range.start_time_us)
                .unwrap_or(lane_ends.len());
            if lane == lane_ends.len() {
                lane_ends.push(range.end_time_us);
            } else {
                lane_ends[lane] = range.end_time_us;
            }
            range.level = lane as u32;
        }
        self.max_level = lane_ends.len().saturating_sub(1) as u32;
        self.ranges = ranges;
        debug!(ranges = self.ranges.len(), "time range index rebuilt");
    }
}
