use tracing::debug;

use crate::arguments::{ArgumentData, ArgumentTable};
use crate::error::StoreError;
use crate::event_type::{flags, well_known, EventClass, EventTypeDescriptor, EventTypeTable};
use crate::iterator::EventIterator;

/// Number of u32 cells per packed event record.
pub const RECORD_CELLS: usize = 12;

/// Minimum record capacity allocated on first growth.
pub const MIN_CAPACITY: usize = 1024;

/// PARENT sentinel for root records. NEXT_SIBLING uses 0 as its end-of-chain
/// sentinel instead: record 0 is always a root and can never be a sibling.
pub const NO_PARENT: u32 = u32::MAX;

/// Cell offsets within a packed record.
pub(crate) mod cell {
    pub const ID: usize = 0;
    pub const TYPE: usize = 1;
    pub const PARENT: usize = 2;
    pub const DEPTH: usize = 3;
    pub const TIME: usize = 4;
    pub const NEXT_SIBLING: usize = 5;
    pub const ARGUMENTS: usize = 6;
    pub const VALUE: usize = 7;
    pub const TAG: usize = 8;
    pub const END_TIME: usize = 9;
    pub const SYSTEM_TIME: usize = 10;
    pub const CHILD_TIME: usize = 11;
}

pub(crate) fn ms_to_us(time_ms: f64) -> u32 {
    if time_ms <= 0.0 {
        0
    } else {
        (time_ms * 1000.0) as u32
    }
}

/// Packed column buffer of fixed-width event records for one zone.
///
/// Records are appended unsorted by [`insert`](EventStore::insert) and
/// finalized by [`rebuild`](EventStore::rebuild), which sorts by
/// (time, insertion order), renumbers ids, and reconstructs scope nesting.
/// Iterators borrow the store, so any call that mutates it (another insert,
/// a rebuild) first requires dropping them.
#[derive(Debug)]
pub struct EventStore {
    data: Vec<u32>,
    count: usize,
    committed: usize,
    committed_args: usize,
    arguments: ArgumentTable,
    first_time_us: u32,
    last_time_us: u32,
    max_depth: u32,
}

struct OpenScope {
    index: usize,
    flags: u32,
    child_time: u32,
    system_time: u32,
}

impl EventStore {
    pub fn new() -> Self {
        EventStore {
            data: Vec::new(),
            count: 0,
            committed: 0,
            committed_args: 0,
            arguments: ArgumentTable::new(),
            first_time_us: 0,
            last_time_us: 0,
            max_depth: 0,
        }
    }

    /// Number of records visible to readers. Records inserted since the last
    /// successful rebuild are not counted; they surface at the next commit.
    pub fn len(&self) -> usize {
        self.committed
    }

    pub fn is_empty(&self) -> bool {
        self.committed == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len() / RECORD_CELLS
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn first_time_ms(&self) -> f64 {
        self.first_time_us as f64 / 1000.0
    }

    pub fn last_time_ms(&self) -> f64 {
        self.last_time_us as f64 / 1000.0
    }

    /// Records inserted since the last successful rebuild.
    pub fn uncommitted(&self) -> usize {
        self.count - self.committed
    }

    pub(crate) fn cell(&self, index: usize, offset: usize) -> u32 {
        if index >= self.count {
            return 0;
        }
        self.data[index * RECORD_CELLS + offset]
    }

    fn set_cell(&mut self, index: usize, offset: usize, value: u32) {
        self.data[index * RECORD_CELLS + offset] = value;
    }

    pub fn arguments(&self, id: u32) -> Option<&ArgumentData> {
        self.arguments.get(id)
    }

    /// Writes the application-defined tag cell of a record. Out-of-range ids
    /// are ignored.
    pub fn set_tag(&mut self, id: u32, tag: u32) {
        if (id as usize) < self.count {
            self.set_cell(id as usize, cell::TAG, tag);
        }
    }

    /// Writes the application-opaque value cell of a record.
    pub fn set_value(&mut self, id: u32, value: u32) {
        if (id as usize) < self.count {
            self.set_cell(id as usize, cell::VALUE, value);
        }
    }

    fn ensure_capacity(&mut self, records: usize) -> Result<(), StoreError> {
        let capacity = self.capacity();
        if records <= capacity {
            return Ok(());
        }
        let mut grown = if capacity == 0 { MIN_CAPACITY } else { capacity * 2 };
        while grown < records {
            grown *= 2;
        }
        let additional = grown * RECORD_CELLS - self.data.len();
        self.data.try_reserve_exact(additional)?;
        self.data.resize(grown * RECORD_CELLS, 0);
        Ok(())
    }

    /// Appends an unsorted record. No ordering or nesting guarantees hold
    /// until the next [`rebuild`](EventStore::rebuild). Returns the record's
    /// provisional id.
    pub fn insert(
        &mut self,
        type_id: u32,
        time_us: u32,
        args: Option<ArgumentData>,
    ) -> Result<u32, StoreError> {
        self.ensure_capacity(self.count + 1)?;
        let args_id = match args {
            Some(data) => self.arguments.intern(data),
            None => 0,
        };
        let base = self.count * RECORD_CELLS;
        let record = &mut self.data[base..base + RECORD_CELLS];
        record.fill(0);
        record[cell::ID] = self.count as u32;
        record[cell::TYPE] = type_id;
        record[cell::PARENT] = NO_PARENT;
        record[cell::TIME] = time_us;
        record[cell::ARGUMENTS] = args_id;
        self.count += 1;
        Ok((self.count - 1) as u32)
    }

    /// Discards records inserted since the last successful rebuild.
    pub(crate) fn rollback(&mut self) {
        let discarded = self.count - self.committed;
        if discarded > 0 {
            self.count = self.committed;
            self.arguments.truncate(self.committed_args);
            debug!(discarded, "discarded uncommitted events");
        }
    }

    fn commit(&mut self) {
        self.committed = self.count;
        self.committed_args = self.arguments.len();
    }

    /// Finalizes all inserted records: sorts by (time, insertion order),
    /// renumbers ids to match indices, and reconstructs scope nesting and
    /// timing aggregates. Running it again over unchanged data leaves the
    /// backing buffer bit-identical.
    pub fn rebuild(&mut self, types: &mut EventTypeTable) -> Result<(), StoreError> {
        if self.count == 0 {
            self.commit();
            return Ok(());
        }
        self.resort()?;
        self.rescope(types);
        self.commit();
        debug!(
            events = self.count,
            max_depth = self.max_depth,
            "event store rebuilt"
        );
        Ok(())
    }

    /// Phase 1: permute records into (TIME, original id) order, renumber ids,
    /// refresh the cached first/last times.
    fn resort(&mut self) -> Result<(), StoreError> {
        let count = self.count;
        let mut order: Vec<u32> = Vec::new();
        order.try_reserve_exact(count)?;
        order.extend(0..count as u32);
        order.sort_by_key(|&index| {
            let index = index as usize;
            (self.cell(index, cell::TIME), self.cell(index, cell::ID))
        });

        let mut fresh: Vec<u32> = Vec::new();
        fresh.try_reserve_exact(self.data.len())?;
        fresh.resize(self.data.len(), 0);
        for (new_index, &old_index) in order.iter().enumerate() {
            let src = old_index as usize * RECORD_CELLS;
            let dst = new_index * RECORD_CELLS;
            fresh[dst..dst + RECORD_CELLS].copy_from_slice(&self.data[src..src + RECORD_CELLS]);
            fresh[dst + cell::ID] = new_index as u32;
        }
        self.data = fresh;

        self.first_time_us = self.cell(0, cell::TIME);
        let last = count - 1;
        let end_time = self.cell(last, cell::END_TIME);
        self.last_time_us = if end_time > 0 {
            end_time
        } else {
            self.cell(last, cell::TIME)
        };
        Ok(())
    }

    /// Phase 2: single forward pass with a stack of open scopes, assigning
    /// parent/depth/next-sibling and accumulating end/child/system times.
    fn rescope(&mut self, types: &mut EventTypeTable) {
        let enter_id = types.by_name(well_known::SCOPE_ENTER).map_or(0, |t| t.id());
        let leave_id = types.by_name(well_known::SCOPE_LEAVE).map_or(0, |t| t.id());
        let append_id = types
            .by_name(well_known::SCOPE_APPEND_DATA)
            .map_or(0, |t| t.id());
        let time_stamp_id = types
            .by_name(well_known::TRACE_TIME_STAMP)
            .map_or(0, |t| t.id());

        let count = self.count;
        let mut stack: Vec<OpenScope> = Vec::new();
        let mut max_depth = 0u32;

        for index in 0..count {
            let parent = stack.last().map_or(NO_PARENT, |scope| scope.index as u32);
            self.set_cell(index, cell::PARENT, parent);
            self.set_cell(index, cell::DEPTH, stack.len() as u32);
            let next = if index + 1 < count {
                (index + 1) as u32
            } else {
                0
            };
            self.set_cell(index, cell::NEXT_SIBLING, next);
            // Aggregates are recomputed from scratch every pass; a scope that
            // no longer closes must not keep values from an earlier rebuild.
            self.set_cell(index, cell::END_TIME, 0);
            self.set_cell(index, cell::SYSTEM_TIME, 0);
            self.set_cell(index, cell::CHILD_TIME, 0);

            let type_id = self.cell(index, cell::TYPE);
            if type_id == enter_id {
                // Generic enter: the real scope type is named in the "name"
                // argument and interned on demand.
                let scope_flags = match self.resolve_named_type(index, types, EventClass::Scope) {
                    Some((resolved_id, resolved_flags)) => {
                        self.set_cell(index, cell::TYPE, resolved_id);
                        resolved_flags
                    }
                    None => 0,
                };
                stack.push(OpenScope {
                    index,
                    flags: scope_flags,
                    child_time: 0,
                    system_time: 0,
                });
                max_depth = max_depth.max(stack.len() as u32);
            } else if type_id == leave_id {
                match stack.pop() {
                    Some(scope) => self.close_scope(scope, index, &mut stack),
                    None => {
                        debug!(index, "scope leave without matching enter, kept as instance");
                    }
                }
            } else if type_id == append_id {
                self.append_scope_data(index, stack.last().map(|scope| scope.index));
            } else if type_id == time_stamp_id {
                if let Some((resolved_id, _)) =
                    self.resolve_named_type(index, types, EventClass::Instance)
                {
                    self.set_cell(index, cell::TYPE, resolved_id);
                }
            } else {
                match types.by_id(type_id) {
                    Some(ty) if ty.is_scope() => {
                        let scope_flags = ty.flags();
                        stack.push(OpenScope {
                            index,
                            flags: scope_flags,
                            child_time: 0,
                            system_time: 0,
                        });
                        max_depth = max_depth.max(stack.len() as u32);
                    }
                    _ => {}
                }
            }
        }

        if !stack.is_empty() {
            debug!(open = stack.len(), "scopes left open at end of stream");
        }
        self.max_depth = max_depth;
    }

    fn close_scope(&mut self, scope: OpenScope, leave_index: usize, stack: &mut Vec<OpenScope>) {
        let time = self.cell(leave_index, cell::TIME);
        let start = self.cell(scope.index, cell::TIME);
        let duration = time.saturating_sub(start);

        self.set_cell(scope.index, cell::END_TIME, time);
        self.set_cell(scope.index, cell::SYSTEM_TIME, scope.system_time);
        self.set_cell(scope.index, cell::CHILD_TIME, scope.child_time);

        // The scope's next sibling is whatever follows its leave record; the
        // leave record itself terminates its chain.
        let leave_next = self.cell(leave_index, cell::NEXT_SIBLING);
        self.set_cell(scope.index, cell::NEXT_SIBLING, leave_next);
        self.set_cell(leave_index, cell::NEXT_SIBLING, 0);

        if let Some(top) = stack.last_mut() {
            top.child_time += duration;
            let own_system_time = if scope.flags & flags::SYSTEM_TIME != 0 {
                duration
            } else {
                0
            };
            top.system_time += scope.system_time + own_system_time;
        }
    }

    fn append_scope_data(&mut self, index: usize, open_scope: Option<usize>) {
        let Some(scope_index) = open_scope else {
            debug!(index, "appendData outside of any open scope, ignored");
            return;
        };
        let source_id = self.cell(index, cell::ARGUMENTS);
        if source_id == 0 {
            return;
        }
        let target_id = self.cell(scope_index, cell::ARGUMENTS);
        if target_id == 0 {
            // Adopt: the scope shares the appended bag by id.
            self.set_cell(scope_index, cell::ARGUMENTS, source_id);
        } else if target_id != source_id {
            if let Some(appended) = self.arguments.get(source_id).cloned() {
                if let Some(target) = self.arguments.get_mut(target_id) {
                    target.merge(&appended);
                }
            }
        }
    }

    fn resolve_named_type(
        &mut self,
        index: usize,
        types: &mut EventTypeTable,
        class: EventClass,
    ) -> Option<(u32, u32)> {
        let args_id = self.cell(index, cell::ARGUMENTS);
        let name = self.arguments.get(args_id)?.get("name")?.as_str()?.to_owned();
        let descriptor = match class {
            EventClass::Scope => EventTypeDescriptor::scope(name),
            EventClass::Instance => EventTypeDescriptor::instance(name),
        };
        let ty = types.define(descriptor);
        Some((ty.id(), ty.flags()))
    }

    /// Cursor over the full visible store.
    pub fn begin<'a>(&'a self, types: &'a EventTypeTable) -> EventIterator<'a> {
        EventIterator::over_range(self, types, 0, self.committed.saturating_sub(1))
    }

    /// Cursor over records [lo, hi], clamped to the visible range.
    pub fn begin_event_range<'a>(
        &'a self,
        types: &'a EventTypeTable,
        lo: usize,
        hi: usize,
    ) -> EventIterator<'a> {
        let last = self.committed.saturating_sub(1);
        EventIterator::over_range(self, types, lo.min(last), hi.min(last))
    }

    /// Cursor positioned at a single record, free to navigate the whole
    /// store.
    pub fn get_event<'a>(&'a self, types: &'a EventTypeTable, id: u32) -> EventIterator<'a> {
        let mut it = self.begin(types);
        it.seek(id);
        it
    }

    fn index_near_time_us(&self, time_us: u32) -> usize {
        if self.committed == 0 {
            return 0;
        }
        // Largest index whose TIME <= time_us; 0 if none.
        let mut lo = 0usize;
        let mut hi = self.committed;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.cell(mid, cell::TIME) <= time_us {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo.saturating_sub(1)
    }

    /// Index of the latest record starting at or before `time_ms`; 0 when
    /// the time precedes the whole store.
    pub fn index_of_event_near_time(&self, time_ms: f64) -> usize {
        self.index_near_time_us(ms_to_us(time_ms))
    }

    /// Walks from the near-time record up to its root scope and returns that
    /// root when it still spans `time_ms`. This lets a renderer pick up a
    /// scope that begins off-screen-left but covers the viewport.
    pub fn index_of_root_scope_including_time(&self, time_ms: f64) -> usize {
        let time_us = ms_to_us(time_ms);
        let near = self.index_near_time_us(time_us);
        if self.committed == 0 {
            return 0;
        }
        let mut index = near;
        loop {
            let parent = self.cell(index, cell::PARENT);
            if parent == NO_PARENT {
                break;
            }
            index = parent as usize;
        }
        let end_time = self.cell(index, cell::END_TIME);
        if end_time > 0 && self.cell(index, cell::TIME) <= time_us && end_time >= time_us {
            index
        } else {
            near
        }
    }

    /// Cursor over [start_ms, end_ms]. With `from_root`, the range opens at
    /// the root scope spanning `start_ms` when one exists.
    pub fn begin_time_range<'a>(
        &'a self,
        types: &'a EventTypeTable,
        start_ms: f64,
        end_ms: f64,
        from_root: bool,
    ) -> EventIterator<'a> {
        let first = if from_root {
            self.index_of_root_scope_including_time(start_ms)
        } else {
            self.index_of_event_near_time(start_ms)
        };
        let last = self.index_of_event_near_time(end_ms);
        EventIterator::over_range(self, types, first, last.max(first))
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}
