use crate::arguments::{ArgValue, ArgumentData};
use crate::event_type::{EventClass, EventType, EventTypeTable};
use crate::store::{cell, EventStore, NO_PARENT};

/// Cursor over an event store.
///
/// A cursor is two references and three indices; cloning it or deriving a
/// parent cursor allocates nothing. Query results attach an indirection
/// table, letting the same cursor walk an arbitrary ordering of record
/// indices. Times are exposed in milliseconds; cells are stored in
/// microseconds.
///
/// The cursor borrows the store, so the borrow checker retires it before any
/// `insert` or `rebuild` can move the backing buffer.
#[derive(Clone)]
pub struct EventIterator<'a> {
    store: &'a EventStore,
    types: &'a EventTypeTable,
    table: Option<&'a [u32]>,
    first: usize,
    last: usize,
    pos: usize,
}

impl<'a> EventIterator<'a> {
    pub(crate) fn over_range(
        store: &'a EventStore,
        types: &'a EventTypeTable,
        first: usize,
        last: usize,
    ) -> Self {
        EventIterator {
            store,
            types,
            table: None,
            first,
            last,
            pos: first,
        }
    }

    pub(crate) fn with_table(
        store: &'a EventStore,
        types: &'a EventTypeTable,
        table: &'a [u32],
    ) -> Self {
        EventIterator {
            store,
            types,
            table: Some(table),
            first: 0,
            last: table.len().saturating_sub(1),
            pos: 0,
        }
    }

    /// Record index the cursor currently addresses.
    fn index(&self) -> usize {
        match self.table {
            Some(table) => table.get(self.pos).copied().unwrap_or(0) as usize,
            None => self.pos,
        }
    }

    fn cell(&self, offset: usize) -> u32 {
        if self.done() {
            return 0;
        }
        self.store.cell(self.index(), offset)
    }

    pub fn done(&self) -> bool {
        if self.pos > self.last {
            return true;
        }
        match self.table {
            Some(table) => table.is_empty(),
            None => self.store.is_empty(),
        }
    }

    pub fn next(&mut self) {
        if self.pos <= self.last {
            self.pos += 1;
        }
    }

    /// Moves the cursor to the record with the given id. On a table-backed
    /// cursor this searches the table; an id not in the table parks the
    /// cursor at the end.
    pub fn seek(&mut self, id: u32) {
        match self.table {
            None => self.pos = id as usize,
            Some(table) => match table.iter().position(|&index| index == id) {
                Some(pos) => self.pos = pos,
                None => self.pos = self.last + 1,
            },
        }
    }

    /// Advances to the next record whose END_TIME cell is non-zero.
    pub fn next_scope(&mut self) {
        loop {
            self.next();
            if self.done() || self.cell(cell::END_TIME) != 0 {
                break;
            }
        }
    }

    /// Advances to the next record whose END_TIME cell is zero.
    pub fn next_instance(&mut self) {
        loop {
            self.next();
            if self.done() || self.cell(cell::END_TIME) == 0 {
                break;
            }
        }
    }

    /// Follows the sibling chain; returns false at the end of the chain.
    pub fn next_sibling(&mut self) -> bool {
        let sibling = self.cell(cell::NEXT_SIBLING);
        if sibling == 0 {
            return false;
        }
        self.seek(sibling);
        true
    }

    /// Moves the cursor to the enclosing scope; returns false at a root.
    /// Table-backed cursors cannot retarget outside their table and report
    /// false instead.
    pub fn move_to_parent(&mut self) -> bool {
        if self.done() {
            return false;
        }
        let parent = self.cell(cell::PARENT);
        if parent == NO_PARENT || self.table.is_some() {
            return false;
        }
        self.pos = parent as usize;
        true
    }

    /// A cursor positioned at the enclosing scope, free to roam the whole
    /// store. Cursors are cheap; no caching is needed.
    pub fn parent(&self) -> Option<EventIterator<'a>> {
        let parent = self.cell(cell::PARENT);
        if parent == NO_PARENT || self.done() {
            return None;
        }
        let mut it = EventIterator::over_range(
            self.store,
            self.types,
            0,
            self.store.len().saturating_sub(1),
        );
        it.seek(parent);
        Some(it)
    }

    pub fn id(&self) -> u32 {
        self.cell(cell::ID)
    }

    pub fn type_id(&self) -> u32 {
        self.cell(cell::TYPE)
    }

    pub fn event_type(&self) -> Option<&'a EventType> {
        self.types.by_id(self.type_id())
    }

    pub fn type_flags(&self) -> u32 {
        self.event_type().map_or(0, EventType::flags)
    }

    pub fn name(&self) -> &'a str {
        self.event_type().map_or("", EventType::name)
    }

    pub fn is_scope(&self) -> bool {
        self.event_type()
            .is_some_and(|ty| ty.class() == EventClass::Scope)
    }

    pub fn is_instance(&self) -> bool {
        !self.is_scope()
    }

    pub fn depth(&self) -> u32 {
        self.cell(cell::DEPTH)
    }

    pub fn time_ms(&self) -> f64 {
        self.cell(cell::TIME) as f64 / 1000.0
    }

    pub fn end_time_ms(&self) -> f64 {
        self.cell(cell::END_TIME) as f64 / 1000.0
    }

    pub(crate) fn time_us(&self) -> u32 {
        self.cell(cell::TIME)
    }

    pub(crate) fn total_duration_us(&self) -> u32 {
        self.cell(cell::END_TIME).saturating_sub(self.cell(cell::TIME))
    }

    pub(crate) fn system_time_us(&self) -> u32 {
        self.cell(cell::SYSTEM_TIME)
    }

    /// END_TIME − TIME; zero for instance events and unfinished scopes.
    pub fn total_duration_ms(&self) -> f64 {
        self.total_duration_us() as f64 / 1000.0
    }

    /// Total duration minus time attributed to tracing overhead.
    pub fn user_duration_ms(&self) -> f64 {
        (self.total_duration_us().saturating_sub(self.cell(cell::SYSTEM_TIME))) as f64 / 1000.0
    }

    /// Total duration minus time spent in direct children.
    pub fn own_duration_ms(&self) -> f64 {
        (self.total_duration_us().saturating_sub(self.cell(cell::CHILD_TIME))) as f64 / 1000.0
    }

    /// Read-only borrow of the interned argument bag; callers needing a
    /// snapshot must clone, since appendScopeData may have shared it across
    /// records.
    pub fn arguments(&self) -> Option<&'a ArgumentData> {
        self.store.arguments(self.cell(cell::ARGUMENTS))
    }

    pub fn argument(&self, key: &str) -> Option<&'a ArgValue> {
        self.arguments()?.get(key)
    }

    pub fn value(&self) -> u32 {
        self.cell(cell::VALUE)
    }

    /// The application-defined tag cell. Writing goes through
    /// [`EventStore::set_tag`], keeping mutation on the single-writer path.
    pub fn tag(&self) -> u32 {
        self.cell(cell::TAG)
    }
}
