use std::collections::HashMap;

/// Bit flags carried by an event type.
pub mod flags {
    /// Tracing bookkeeping; hidden from user-facing views and statistics.
    pub const INTERNAL: u32 = 1 << 0;
    /// Defined by the framework itself rather than the traced application.
    pub const BUILTIN: u32 = 1 << 1;
    /// Expected to fire at very high rates.
    pub const HIGH_FREQUENCY: u32 = 1 << 2;
    /// Time spent inside scopes of this type counts as tracing overhead and
    /// is subtracted from user time.
    pub const SYSTEM_TIME: u32 = 1 << 3;
}

/// Names of the event types interned at table construction.
pub mod well_known {
    pub const SCOPE_ENTER: &str = "wtf.scope#enter";
    pub const SCOPE_LEAVE: &str = "wtf.scope#leave";
    pub const SCOPE_APPEND_DATA: &str = "wtf.scope#appendData";
    pub const TRACE_TIME_STAMP: &str = "wtf.trace#timeStamp";
    pub const TRACE_MARK: &str = "wtf.trace#mark";
    pub const TIME_RANGE_BEGIN: &str = "wtf.trace#timeRange#begin";
    pub const TIME_RANGE_END: &str = "wtf.trace#timeRange#end";
    pub const FRAME_START: &str = "wtf.timing#frameStart";
    pub const FRAME_END: &str = "wtf.timing#frameEnd";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// A paired enter/leave interval that nests other events.
    Scope,
    /// A point-in-time event with no duration.
    Instance,
}

/// Value kinds an event argument may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Int,
    Double,
    String,
    Bytes,
    List,
    Map,
    Any,
}

/// One named slot in an event type's argument signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
}

/// An interned event type definition. Immutable once defined; lives as long
/// as the database.
#[derive(Debug, Clone, PartialEq)]
pub struct EventType {
    id: u32,
    name: String,
    class: EventClass,
    flags: u32,
    signature: Vec<ArgSpec>,
}

impl EventType {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> EventClass {
        self.class
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn signature(&self) -> &[ArgSpec] {
        &self.signature
    }

    pub fn is_scope(&self) -> bool {
        self.class == EventClass::Scope
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// Definition handed to [`EventTypeTable::define`]. The id is assigned by the
/// table.
#[derive(Debug, Clone)]
pub struct EventTypeDescriptor {
    pub name: String,
    pub class: EventClass,
    pub flags: u32,
    pub signature: Vec<ArgSpec>,
}

impl EventTypeDescriptor {
    pub fn scope(name: impl Into<String>) -> Self {
        EventTypeDescriptor {
            name: name.into(),
            class: EventClass::Scope,
            flags: 0,
            signature: Vec::new(),
        }
    }

    pub fn instance(name: impl Into<String>) -> Self {
        EventTypeDescriptor {
            name: name.into(),
            class: EventClass::Instance,
            flags: 0,
            signature: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, kind: ArgKind) -> Self {
        self.signature.push(ArgSpec {
            name: name.into(),
            kind,
        });
        self
    }
}

/// Interns event type definitions and assigns stable numeric ids, starting at
/// 1 (0 is the reserved sentinel). A name collision returns the existing
/// entry unchanged.
#[derive(Debug)]
pub struct EventTypeTable {
    entries: Vec<EventType>,
    by_name: HashMap<String, u32>,
}

impl EventTypeTable {
    pub fn new() -> Self {
        let mut table = EventTypeTable {
            entries: Vec::new(),
            by_name: HashMap::new(),
        };
        table.define_well_known();
        table
    }

    fn define_well_known(&mut self) {
        use well_known::*;
        let control = flags::BUILTIN | flags::INTERNAL;
        self.define(
            EventTypeDescriptor::scope(SCOPE_ENTER)
                .with_flags(flags::BUILTIN)
                .with_arg("name", ArgKind::String),
        );
        self.define(EventTypeDescriptor::instance(SCOPE_LEAVE).with_flags(control));
        self.define(EventTypeDescriptor::instance(SCOPE_APPEND_DATA).with_flags(control));
        self.define(
            EventTypeDescriptor::instance(TRACE_TIME_STAMP)
                .with_flags(flags::BUILTIN)
                .with_arg("name", ArgKind::String),
        );
        self.define(
            EventTypeDescriptor::instance(TRACE_MARK)
                .with_flags(flags::BUILTIN)
                .with_arg("name", ArgKind::String),
        );
        self.define(
            EventTypeDescriptor::instance(TIME_RANGE_BEGIN)
                .with_flags(flags::BUILTIN)
                .with_arg("id", ArgKind::Int)
                .with_arg("name", ArgKind::String),
        );
        self.define(
            EventTypeDescriptor::instance(TIME_RANGE_END)
                .with_flags(flags::BUILTIN)
                .with_arg("id", ArgKind::Int),
        );
        self.define(
            EventTypeDescriptor::instance(FRAME_START)
                .with_flags(flags::BUILTIN)
                .with_arg("number", ArgKind::Int),
        );
        self.define(
            EventTypeDescriptor::instance(FRAME_END)
                .with_flags(flags::BUILTIN)
                .with_arg("number", ArgKind::Int),
        );
    }

    /// Interns a definition by name. Defining an already-known name returns
    /// the existing entry unchanged, even when the descriptor diverges.
    pub fn define(&mut self, descriptor: EventTypeDescriptor) -> &EventType {
        if let Some(&id) = self.by_name.get(&descriptor.name) {
            return &self.entries[(id - 1) as usize];
        }
        let id = self.entries.len() as u32 + 1;
        self.by_name.insert(descriptor.name.clone(), id);
        self.entries.push(EventType {
            id,
            name: descriptor.name,
            class: descriptor.class,
            flags: descriptor.flags,
            signature: descriptor.signature,
        });
        &self.entries[(id - 1) as usize]
    }

    pub fn by_id(&self, id: u32) -> Option<&EventType> {
        if id == 0 {
            return None;
        }
        self.entries.get((id - 1) as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<&EventType> {
        self.by_name.get(name).and_then(|&id| self.by_id(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventType> {
        self.entries.iter()
    }
}

impl Default for EventTypeTable {
    fn default() -> Self {
        Self::new()
    }
}
