use serde_json::Value;

/// A typed value attached to an event under a name.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<ArgValue>),
    Map(Vec<(String, ArgValue)>),
}

impl ArgValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(value) => Some(*value),
            ArgValue::Double(value) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            ArgValue::Double(value) => Some(*value),
            ArgValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ArgValue::Bool(value) => Value::Bool(*value),
            ArgValue::Int(value) => Value::from(*value),
            ArgValue::Double(value) => Value::from(*value),
            ArgValue::String(value) => Value::String(value.clone()),
            ArgValue::Bytes(bytes) => {
                Value::Array(bytes.iter().map(|&b| Value::from(b)).collect())
            }
            ArgValue::List(items) => Value::Array(items.iter().map(ArgValue::to_json).collect()),
            ArgValue::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (name, value) in entries {
                    map.insert(name.clone(), value.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

impl From<&Value> for ArgValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ArgValue::String(String::new()),
            Value::Bool(b) => ArgValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ArgValue::Int(i),
                None => ArgValue::Double(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => ArgValue::String(s.clone()),
            Value::Array(items) => ArgValue::List(items.iter().map(ArgValue::from).collect()),
            Value::Object(map) => ArgValue::Map(
                map.iter()
                    .map(|(name, value)| (name.clone(), ArgValue::from(value)))
                    .collect(),
            ),
        }
    }
}

/// An ordered bag of named typed values attached to an event. Interned in a
/// per-store table and addressed by a non-zero id; id 0 means "no arguments".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArgumentData {
    entries: Vec<(String, ArgValue)>,
}

impl ArgumentData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds argument data from a JSON object. Non-object values yield no
    /// data.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(ArgumentData {
                entries: map
                    .iter()
                    .map(|(name, value)| (name.clone(), ArgValue::from(value)))
                    .collect(),
            }),
            _ => None,
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.set(name, value);
        self
    }

    /// Overwrites an existing name in place, or appends a new one.
    pub fn set(&mut self, name: impl Into<String>, value: ArgValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Merges `other` into `self`: fields from `other` overwrite identical
    /// names, insertion order is preserved, new names append.
    pub fn merge(&mut self, other: &ArgumentData) {
        for (name, value) in &other.entries {
            self.set(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.entries {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }
}

/// Per-store intern table for argument data. Ids start at 1; 0 is reserved
/// for "no arguments".
#[derive(Debug, Default)]
pub struct ArgumentTable {
    entries: Vec<ArgumentData>,
}

impl ArgumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, data: ArgumentData) -> u32 {
        self.entries.push(data);
        self.entries.len() as u32
    }

    pub fn get(&self, id: u32) -> Option<&ArgumentData> {
        if id == 0 {
            return None;
        }
        self.entries.get((id - 1) as usize)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut ArgumentData> {
        if id == 0 {
            return None;
        }
        self.entries.get_mut((id - 1) as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }
}
