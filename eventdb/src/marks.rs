use tracing::debug;

use crate::ancillary::AncillaryIndex;
use crate::arguments::ArgValue;
use crate::event_type::{well_known, EventType, EventTypeTable};
use crate::iterator::EventIterator;
use crate::store::ms_to_us;

/// A named navigation mark. Each mark extends until the next mark begins;
/// the last mark of a recording is open-ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    name: String,
    time_us: u32,
    end_time_us: Option<u32>,
}

impl Mark {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_ms(&self) -> f64 {
        self.time_us as f64 / 1000.0
    }

    pub fn end_time_ms(&self) -> Option<f64> {
        self.end_time_us.map(|end| end as f64 / 1000.0)
    }
}

/// Mark list: subscribes to `wtf.trace#mark` and chains each mark's end to
/// the following mark's start.
#[derive(Default)]
pub struct MarkIndex {
    marks: Vec<Mark>,
}

impl MarkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mark> {
        self.marks.iter()
    }

    /// The mark covering `time_ms`: the latest mark at or before it.
    pub fn mark_at_time(&self, time_ms: f64) -> Option<&Mark> {
        let time_us = ms_to_us(time_ms);
        let slot = self.marks.partition_point(|mark| mark.time_us <= time_us);
        self.marks[..slot].last()
    }
}

impl AncillaryIndex for MarkIndex {
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<EventType>> {
        self.marks.clear();
        vec![types.by_name(well_known::TRACE_MARK).cloned()]
    }

    fn handle_event(&mut self, _type_index: usize, _event_type: &EventType, it: &EventIterator<'_>) {
        let name = it
            .argument("name")
            .and_then(ArgValue::as_str)
            .unwrap_or_default()
            .to_owned();
        let time_us = it.time_us();
        if let Some(previous) = self.marks.last_mut() {
            previous.end_time_us = Some(time_us);
        }
        self.marks.push(Mark {
            name,
            time_us,
            end_time_us: None,
        });
    }

    fn end_rebuild(&mut self) {
        debug!(marks = self.marks.len(), "mark index rebuilt");
    }
}
