use std::collections::HashMap;

use tracing::debug;

use crate::database::Database;
use crate::event_type::flags;
use crate::query::Query;

/// Number of 1-ms latency buckets per scope entry; longer durations collapse
/// into the last bucket.
pub const BUCKET_COUNT: usize = 1000;

/// Orderings accepted by [`StatisticsTable::for_each`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Descending by occurrence count.
    Count,
    /// Scope entries first, descending by total time; instance entries after,
    /// descending by count.
    TotalTime,
    /// Scope entries first, descending by mean time; instance entries after,
    /// descending by count.
    MeanTime,
}

/// Aggregate for one scope-class event type.
pub struct ScopeEntry {
    name: String,
    type_flags: u32,
    count: u64,
    total_time_us: u64,
    user_time_us: u64,
    buckets: Box<[u32; BUCKET_COUNT]>,
}

impl ScopeEntry {
    fn new(name: String, type_flags: u32) -> Self {
        ScopeEntry {
            name,
            type_flags,
            count: 0,
            total_time_us: 0,
            user_time_us: 0,
            buckets: Box::new([0; BUCKET_COUNT]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total_time_ms(&self) -> f64 {
        self.total_time_us as f64 / 1000.0
    }

    pub fn user_time_ms(&self) -> f64 {
        self.user_time_us as f64 / 1000.0
    }

    /// Mean latency: total time for SYSTEM_TIME-flagged types (their whole
    /// duration is overhead), user time otherwise.
    pub fn mean_time_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let numerator = if self.type_flags & flags::SYSTEM_TIME != 0 {
            self.total_time_us
        } else {
            self.user_time_us
        };
        numerator as f64 / 1000.0 / self.count as f64
    }

    /// 1-ms latency histogram over user durations.
    pub fn buckets(&self) -> &[u32; BUCKET_COUNT] {
        &self.buckets
    }
}

/// Aggregate for one instance-class event type.
pub struct InstanceEntry {
    name: String,
    count: u64,
}

impl InstanceEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

pub enum Entry {
    Scope(ScopeEntry),
    Instance(InstanceEntry),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Scope(entry) => entry.name(),
            Entry::Instance(entry) => entry.name(),
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            Entry::Scope(entry) => entry.count(),
            Entry::Instance(entry) => entry.count(),
        }
    }

    pub fn is_scope(&self) -> bool {
        matches!(self, Entry::Scope(_))
    }

    fn total_time_us(&self) -> u64 {
        match self {
            Entry::Scope(entry) => entry.total_time_us,
            Entry::Instance(_) => 0,
        }
    }

    fn mean_time_ms(&self) -> f64 {
        match self {
            Entry::Scope(entry) => entry.mean_time_ms(),
            Entry::Instance(_) => 0.0,
        }
    }
}

/// Per-event-type counters and latency distributions over a time window,
/// computed under an optional filter. Rebuilt on demand from the database;
/// sorting is lazy and cached until the mode changes or the table is rebuilt.
#[derive(Default)]
pub struct StatisticsTable {
    entries: Vec<Entry>,
    order: Vec<usize>,
    sorted_by: Option<SortMode>,
    start_ms: f64,
    end_ms: f64,
}

impl StatisticsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.name() == name)
    }

    /// Events per second of an entry over the last rebuilt window.
    pub fn frequency(&self, entry: &Entry) -> f64 {
        let window_s = (self.end_ms - self.start_ms) / 1000.0;
        if window_s <= 0.0 {
            return 0.0;
        }
        entry.count() as f64 / window_s
    }

    /// Recomputes all aggregates over [start_ms, end_ms]. Events whose type
    /// carries INTERNAL or BUILTIN flags are skipped, as are events rejected
    /// by `filter`.
    pub fn rebuild(&mut self, db: &Database, start_ms: f64, end_ms: f64, filter: Option<&Query>) {
        let mut table: HashMap<String, usize> = HashMap::new();
        self.entries.clear();
        self.order.clear();
        self.sorted_by = None;
        self.start_ms = start_ms;
        self.end_ms = end_ms;

        for zone in db.zones() {
            let store = zone.store();
            if store.is_empty() {
                continue;
            }
            let mut it = store.begin_time_range(db.event_types(), start_ms, end_ms, false);
            while !it.done() {
                let Some(ty) = it.event_type() else {
                    it.next();
                    continue;
                };
                if ty.has_flag(flags::INTERNAL) || ty.has_flag(flags::BUILTIN) {
                    it.next();
                    continue;
                }
                if let Some(filter) = filter {
                    if !filter.matches(ty.name()) {
                        it.next();
                        continue;
                    }
                }

                let slot = *table.entry(ty.name().to_owned()).or_insert_with(|| {
                    let slot = self.entries.len();
                    self.entries.push(if ty.is_scope() {
                        Entry::Scope(ScopeEntry::new(ty.name().to_owned(), ty.flags()))
                    } else {
                        Entry::Instance(InstanceEntry {
                            name: ty.name().to_owned(),
                            count: 0,
                        })
                    });
                    slot
                });
                match &mut self.entries[slot] {
                    Entry::Scope(entry) => {
                        let total_us = it.total_duration_us();
                        let user_us = total_us.saturating_sub(it.system_time_us());
                        entry.count += 1;
                        entry.total_time_us += total_us as u64;
                        entry.user_time_us += user_us as u64;
                        let bucket =
                            (((user_us as u64) + 500) / 1000).min(BUCKET_COUNT as u64 - 1);
                        entry.buckets[bucket as usize] += 1;
                    }
                    Entry::Instance(entry) => {
                        entry.count += 1;
                    }
                }
                it.next();
            }
        }
        debug!(entries = self.entries.len(), "statistics rebuilt");
    }

    fn ensure_sorted(&mut self, mode: SortMode) {
        if self.sorted_by == Some(mode) {
            return;
        }
        if self.order.len() != self.entries.len() {
            self.order = (0..self.entries.len()).collect();
        }
        let entries = &self.entries;
        match mode {
            SortMode::Count => {
                self.order
                    .sort_by(|&a, &b| entries[b].count().cmp(&entries[a].count()));
            }
            SortMode::TotalTime => {
                self.order.sort_by(|&a, &b| {
                    let (a, b) = (&entries[a], &entries[b]);
                    b.is_scope()
                        .cmp(&a.is_scope())
                        .then_with(|| {
                            if a.is_scope() {
                                b.total_time_us().cmp(&a.total_time_us())
                            } else {
                                b.count().cmp(&a.count())
                            }
                        })
                });
            }
            SortMode::MeanTime => {
                self.order.sort_by(|&a, &b| {
                    let (a, b) = (&entries[a], &entries[b]);
                    b.is_scope()
                        .cmp(&a.is_scope())
                        .then_with(|| {
                            if a.is_scope() {
                                b.mean_time_ms().total_cmp(&a.mean_time_ms())
                            } else {
                                b.count().cmp(&a.count())
                            }
                        })
                });
            }
        }
        self.sorted_by = Some(mode);
    }

    /// Visits every entry in the given order, re-sorting lazily when the
    /// mode changed since the last call.
    pub fn for_each(&mut self, mode: SortMode, mut callback: impl FnMut(&Entry)) {
        self.ensure_sorted(mode);
        for &slot in &self.order {
            callback(&self.entries[slot]);
        }
    }
}
