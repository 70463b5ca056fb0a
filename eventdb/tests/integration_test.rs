use eventdb::{
    flags, well_known, AncillaryIndex, ArgValue, ArgumentData, Database, Entry, EventIterator,
    EventType, EventTypeDescriptor, EventTypeTable, JsonDataSource, SortMode, StatisticsTable,
    ZoneId,
};
use rstest::{fixture, rstest};
use std::cell::Cell;
use std::rc::Rc;

fn named(name: &str) -> ArgumentData {
    ArgumentData::new().with("name", ArgValue::String(name.to_string()))
}

fn type_id(db: &Database, name: &str) -> u32 {
    db.event_types().by_name(name).unwrap().id()
}

struct Db {
    db: Database,
    zone: ZoneId,
}

impl Db {
    fn new() -> Self {
        let mut db = Database::new();
        let zone = db.create_zone("main", "script", "test://trace");
        Db { db, zone }
    }

    fn ingest(&mut self, events: &[(&str, u32, Option<ArgumentData>)]) {
        self.db.begin_insert_batch().unwrap();
        for (name, time_us, args) in events {
            let id = type_id(&self.db, name);
            self.db
                .add_event(self.zone, id, *time_us, args.clone())
                .unwrap();
        }
        self.db.commit_insert_batch().unwrap();
    }

    fn events(&self) -> Vec<(u32, String, f64, f64, u32)> {
        let store = self.db.zone(self.zone).unwrap().store();
        let mut it = store.begin(self.db.event_types());
        let mut rows = Vec::new();
        while !it.done() {
            rows.push((
                it.id(),
                it.name().to_string(),
                it.time_ms(),
                it.end_time_ms(),
                it.depth(),
            ));
            it.next();
        }
        rows
    }
}

// S1: enter a @ 0, enter b @ 100, leave @ 400, leave @ 500.
#[fixture]
fn nested() -> Db {
    let mut db = Db::new();
    db.ingest(&[
        (well_known::SCOPE_ENTER, 0, Some(named("a"))),
        (well_known::SCOPE_ENTER, 100, Some(named("b"))),
        (well_known::SCOPE_LEAVE, 400, None),
        (well_known::SCOPE_LEAVE, 500, None),
    ]);
    db
}

#[rstest]
fn nested_scope_timing(nested: Db) {
    let store = nested.db.zone(nested.zone).unwrap().store();
    let types = nested.db.event_types();

    let a = store.get_event(types, 0);
    assert_eq!(a.name(), "a");
    assert_eq!(a.time_ms(), 0.0);
    assert_eq!(a.end_time_ms(), 0.5);
    assert_eq!(a.depth(), 0);
    assert!(a.parent().is_none());
    assert_eq!(a.total_duration_ms(), 0.5);
    // child time 300us: own = total - child.
    assert_eq!(a.own_duration_ms(), 0.2);
    // no system time anywhere.
    assert_eq!(a.user_duration_ms(), 0.5);

    let b = store.get_event(types, 1);
    assert_eq!(b.name(), "b");
    assert_eq!(b.time_ms(), 0.1);
    assert_eq!(b.end_time_ms(), 0.4);
    assert_eq!(b.depth(), 1);
    assert_eq!(b.parent().map(|p| p.id()), Some(0));
}

// S2: the same events inserted in reverse arrive at the identical layout.
#[rstest]
fn out_of_order_insertion_is_normalized(nested: Db) {
    let mut shuffled = Db::new();
    shuffled.ingest(&[
        (well_known::SCOPE_LEAVE, 500, None),
        (well_known::SCOPE_LEAVE, 400, None),
        (well_known::SCOPE_ENTER, 100, Some(named("b"))),
        (well_known::SCOPE_ENTER, 0, Some(named("a"))),
    ]);
    assert_eq!(nested.events(), shuffled.events());
}

// Records are sorted by time and renumbered so ids equal indices.
#[rstest]
fn ids_equal_indices_after_rebuild(nested: Db) {
    for (position, row) in nested.events().iter().enumerate() {
        assert_eq!(row.0 as usize, position);
    }
}

// S3: a scope type flagged SYSTEM_TIME charges its duration to ancestors.
#[test]
fn system_time_attribution() {
    let mut db = Db::new();
    db.db.define_type(
        EventTypeDescriptor::scope("gc").with_flags(flags::SYSTEM_TIME),
    );
    db.ingest(&[
        (well_known::SCOPE_ENTER, 0, Some(named("a"))),
        (well_known::SCOPE_ENTER, 100, Some(named("gc"))),
        (well_known::SCOPE_LEAVE, 300, None),
        (well_known::SCOPE_LEAVE, 1000, None),
    ]);

    let store = db.db.zone(db.zone).unwrap().store();
    let a = store.get_event(db.db.event_types(), 0);
    assert_eq!(a.total_duration_ms(), 1.0);
    // 200us of gc subtracted from user time.
    assert_eq!(a.user_duration_ms(), 0.8);
    assert_eq!(
        a.total_duration_ms(),
        a.user_duration_ms() + 0.2,
    );
}

// Following NEXT_SIBLING from the first child enumerates direct children in
// time order and terminates.
#[test]
fn sibling_chain_enumerates_direct_children() {
    let mut db = Db::new();
    db.ingest(&[
        (well_known::SCOPE_ENTER, 0, Some(named("root"))),
        (well_known::SCOPE_ENTER, 100, Some(named("one"))),
        (well_known::SCOPE_LEAVE, 200, None),
        (well_known::SCOPE_ENTER, 300, Some(named("two"))),
        (well_known::SCOPE_ENTER, 350, Some(named("grandchild"))),
        (well_known::SCOPE_LEAVE, 380, None),
        (well_known::SCOPE_LEAVE, 400, None),
        (well_known::SCOPE_ENTER, 500, Some(named("three"))),
        (well_known::SCOPE_LEAVE, 600, None),
        (well_known::SCOPE_LEAVE, 700, None),
    ]);

    let store = db.db.zone(db.zone).unwrap().store();
    let mut it = store.get_event(db.db.event_types(), 1);
    let mut names = vec![it.name().to_string()];
    let mut depths = vec![it.depth()];
    while it.next_sibling() {
        names.push(it.name().to_string());
        depths.push(it.depth());
    }
    // The chain walks every direct-child record of root in time order: the
    // three child scopes plus root's own closing leave record, then stops.
    assert_eq!(names, ["one", "two", "three", "wtf.scope#leave"]);
    assert!(depths.iter().all(|&depth| depth == 1));
}

// S4: frame 2 never ends, so the rebuild discards it.
#[test]
fn frame_index_discards_incomplete_frames() {
    let mut db = Db::new();
    let number = |n: i64| Some(ArgumentData::new().with("number", ArgValue::Int(n)));
    db.ingest(&[
        (well_known::FRAME_START, 1000, number(1)),
        (well_known::FRAME_END, 17000, number(1)),
        (well_known::FRAME_START, 17000, number(2)),
    ]);

    let frames = db.db.zone(db.zone).unwrap().frame_list();
    assert_eq!(frames.count(), 1);
    let frame = frames.frame_at_time(10.0).expect("frame 1 should span 10ms");
    assert_eq!(frame.number(), 1);
    assert!(frames.frame(2).is_none());
}

// S5: user durations 0.4ms, 5.7ms, 999.9ms land in buckets 0, 6, 999.
#[test]
fn statistics_histogram() {
    let mut db = Db::new();
    db.ingest(&[
        (well_known::SCOPE_ENTER, 0, Some(named("x"))),
        (well_known::SCOPE_LEAVE, 400, None),
        (well_known::SCOPE_ENTER, 10_000, Some(named("x"))),
        (well_known::SCOPE_LEAVE, 15_700, None),
        (well_known::SCOPE_ENTER, 1_000_000, Some(named("x"))),
        (well_known::SCOPE_LEAVE, 1_999_900, None),
    ]);

    let mut table = StatisticsTable::new();
    table.rebuild(&db.db, 0.0, 10_000.0, None);
    let Some(Entry::Scope(entry)) = table.entry("x") else {
        panic!("scope entry missing");
    };
    assert_eq!(entry.count(), 3);
    assert_eq!(entry.buckets()[0], 1);
    assert_eq!(entry.buckets()[6], 1);
    assert_eq!(entry.buckets()[999], 1);
    assert_eq!(entry.total_time_ms(), (400.0 + 5700.0 + 999_900.0) / 1000.0);
    let bucket_sum: u64 = entry.buckets().iter().map(|&b| b as u64).sum();
    assert_eq!(bucket_sum, entry.count());
}

// S6: regex, substring, and path queries over {foo, foobar, bar}.
#[fixture]
fn query_db() -> Db {
    let mut db = Db::new();
    for name in ["foo", "foobar", "bar", "ns/foo", "app/ns/foo"] {
        db.db.define_type(EventTypeDescriptor::instance(name));
    }
    db.ingest(&[
        ("foo", 100, None),
        ("foobar", 200, None),
        ("bar", 300, None),
        ("ns/foo", 400, None),
        ("app/ns/foo", 500, None),
    ]);
    db
}

fn match_names(db: &Db, expression: &str) -> Vec<String> {
    let result = db.db.query(expression).expect("query failed");
    let Some(mut it) = result.iter_zone(&db.db, db.zone) else {
        return Vec::new();
    };
    let mut names = Vec::new();
    while !it.done() {
        names.push(it.name().to_string());
        it.next();
    }
    names
}

#[rstest]
fn regex_and_substring_queries_agree(query_db: Db) {
    assert_eq!(match_names(&query_db, "/foo/"), ["foo", "foobar", "ns/foo", "app/ns/foo"]);
    assert_eq!(
        match_names(&query_db, "foo"),
        match_names(&query_db, "/foo/")
    );
}

#[rstest]
fn path_queries_select_trailing_components(query_db: Db) {
    assert_eq!(match_names(&query_db, "ns/foo"), ["ns/foo", "app/ns/foo"]);
}

#[rstest]
fn query_results_carry_display_and_elapsed(query_db: Db) {
    let result = query_db.db.query("/foo/").expect("query failed");
    assert_eq!(result.expression(), "regex:foo");
    assert_eq!(result.total_matches(), 4);

    let mut csv = Vec::new();
    result.dump_csv(&query_db.db, &mut csv).expect("dump failed");
    let text = String::from_utf8(csv).expect("csv is not utf-8");
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("zone,time_ms,type_name,duration_ms,arguments"));
    assert_eq!(lines.next(), Some("main,0.1,foo,0,"));
}

// A second batch into the same zone re-sorts with the first.
#[test]
fn later_batches_merge_into_the_sorted_stream() {
    let mut db = Db::new();
    db.ingest(&[
        (well_known::SCOPE_ENTER, 1000, Some(named("second"))),
        (well_known::SCOPE_LEAVE, 2000, None),
    ]);
    db.ingest(&[
        (well_known::SCOPE_ENTER, 0, Some(named("first"))),
        (well_known::SCOPE_LEAVE, 500, None),
    ]);

    let names: Vec<String> = db.events().into_iter().map(|row| row.1).collect();
    assert_eq!(
        names,
        ["first", "wtf.scope#leave", "second", "wtf.scope#leave"]
    );
}

struct CountingIndex {
    subscribed: &'static str,
    seen: Rc<Cell<usize>>,
    rebuilds: Rc<Cell<usize>>,
}

impl AncillaryIndex for CountingIndex {
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<EventType>> {
        self.seen.set(0);
        vec![types.by_name(self.subscribed).cloned()]
    }

    fn handle_event(&mut self, _type_index: usize, _event_type: &EventType, _it: &EventIterator<'_>) {
        self.seen.set(self.seen.get() + 1);
    }

    fn end_rebuild(&mut self) {
        self.rebuilds.set(self.rebuilds.get() + 1);
    }
}

// Registering against a store with committed events rebuilds immediately;
// after unregistration later batches no longer reach the index.
#[test]
fn late_ancillary_registration_rebuilds_once() {
    let mut db = Db::new();
    db.ingest(&[
        (well_known::TRACE_MARK, 100, Some(named("m1"))),
        (well_known::TRACE_MARK, 200, Some(named("m2"))),
    ]);

    let seen = Rc::new(Cell::new(0));
    let rebuilds = Rc::new(Cell::new(0));
    let index = Box::new(CountingIndex {
        subscribed: well_known::TRACE_MARK,
        seen: seen.clone(),
        rebuilds: rebuilds.clone(),
    });
    let token = db.db.register_ancillary(db.zone, index).unwrap();
    assert_eq!(rebuilds.get(), 1);
    assert_eq!(seen.get(), 2);

    db.ingest(&[(well_known::TRACE_MARK, 300, Some(named("m3")))]);
    assert_eq!(rebuilds.get(), 2);
    assert_eq!(seen.get(), 3);

    db.db
        .unregister_ancillary(db.zone, token)
        .unwrap()
        .expect("index was registered");
    db.ingest(&[(well_known::TRACE_MARK, 400, Some(named("m4")))]);
    assert_eq!(rebuilds.get(), 2);
}

#[test]
fn json_source_round_trips_into_queries() {
    let text = r#"{
        "contextInfo": "test",
        "events": [
            {"event": "wtf.scope#enter", "time": 0, "args": {"name": "frame"}},
            {"event": "wtf.trace#timeStamp", "time": 5000, "args": {"name": "painted"}},
            {"event": "wtf.scope#leave", "time": 16000}
        ]
    }"#;
    let mut db = Database::new();
    let zone = db.create_zone("main", "script", "test://");
    JsonDataSource::from_slice(text.as_bytes())
        .expect("parse failed")
        .load_into(&mut db, zone)
        .expect("load failed");

    let result = db.query("painted").expect("query failed");
    assert_eq!(result.total_matches(), 1);
    let mut it = result.iter_zone(&db, zone).expect("zone has matches");
    assert_eq!(it.time_ms(), 5.0);
    assert!(it.is_instance());
    it.next();
    assert!(it.done());
}

#[test]
fn statistics_sorting_through_database() {
    let mut db = Db::new();
    db.ingest(&[
        (well_known::SCOPE_ENTER, 0, Some(named("big"))),
        (well_known::SCOPE_LEAVE, 50_000, None),
        (well_known::SCOPE_ENTER, 60_000, Some(named("small"))),
        (well_known::SCOPE_LEAVE, 61_000, None),
        (well_known::SCOPE_ENTER, 70_000, Some(named("small"))),
        (well_known::SCOPE_LEAVE, 71_000, None),
    ]);

    let mut table = StatisticsTable::new();
    table.rebuild(&db.db, 0.0, 1000.0, None);

    let mut by_count = Vec::new();
    table.for_each(SortMode::Count, |entry| by_count.push(entry.name().to_owned()));
    assert_eq!(by_count, ["small", "big"]);

    let mut by_total = Vec::new();
    table.for_each(SortMode::TotalTime, |entry| by_total.push(entry.name().to_owned()));
    assert_eq!(by_total, ["big", "small"]);
}
