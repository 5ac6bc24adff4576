//! The datamodel value tree.\
//! A recursive key/value mapping from string keys to scalar, list or nested
//! mapping values, plus the location-path machinery used by `<assign>`.

use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Name of the system variable holding the current event.
pub const EVENT_VARIABLE_NAME: &str = "_event";

/// Name of field "name" of system variable "_event".
pub const EVENT_VARIABLE_FIELD_NAME: &str = "name";

/// Name of field "data" of system variable "_event".
pub const EVENT_VARIABLE_FIELD_DATA: &str = "data";

/// A datamodel value.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Array(Vec<Data>),
    Map(HashMap<String, Data>),
}

impl Data {
    /// Effective boolean value, following the ECMAScript ToBoolean rules the
    /// W3C recommendation refers to for conditional expressions.
    #[allow(clippy::eq_op)] // NaN test, "is_nan" not used to mirror integer case
    pub fn is_truthy(&self) -> bool {
        match self {
            Data::Null => false,
            Data::Boolean(b) => *b,
            Data::Integer(v) => *v != 0,
            Data::Double(v) => !(*v != *v || v.abs() == 0f64),
            Data::String(s) => !s.is_empty(),
            Data::Array(_) => true,
            Data::Map(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Data::Integer(v) => Some(*v as f64),
            Data::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts a parsed JSON value. Used for `<content>` and `<data>`
    /// element bodies that hold JSON literals.
    pub fn from_json(value: &serde_json::Value) -> Data {
        match value {
            serde_json::Value::Null => Data::Null,
            serde_json::Value::Bool(b) => Data::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Data::Integer(i)
                } else {
                    Data::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Data::String(s.clone()),
            serde_json::Value::Array(a) => Data::Array(a.iter().map(Data::from_json).collect()),
            serde_json::Value::Object(o) => {
                let mut m = HashMap::with_capacity(o.len());
                for (k, v) in o {
                    m.insert(k.clone(), Data::from_json(v));
                }
                Data::Map(m)
            }
        }
    }

    /// Parses an element body: JSON if it is valid JSON, the trimmed text
    /// otherwise.
    pub fn from_body(body: &str) -> Data {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Data::Null;
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(v) => Data::from_json(&v),
            Err(_) => Data::String(trimmed.to_string()),
        }
    }
}

impl Display for Data {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Data::Null => f.write_str("null"),
            Data::Boolean(b) => write!(f, "{}", b),
            Data::Integer(v) => write!(f, "{}", v),
            Data::Double(v) => write!(f, "{}", v),
            Data::String(s) => f.write_str(s),
            Data::Array(a) => {
                f.write_str("[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
            Data::Map(m) => {
                let mut keys: Vec<&String> = m.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", k, m.get(*k).unwrap())?;
                }
                f.write_str("}")
            }
        }
    }
}

/// One segment of a resolved location path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(k),
            PathSegment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// The root mapping of a state chart's datamodel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataStore {
    pub values: HashMap<String, Data>,
}

impl DataStore {
    pub fn new() -> DataStore {
        DataStore {
            values: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Data> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, data: Data) {
        self.values.insert(key.to_string(), data);
    }

    pub fn remove(&mut self, key: &str) -> Option<Data> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Reads the value at a resolved path. Missing keys yield `None`.
    pub fn get_path(&self, path: &[PathSegment]) -> Option<&Data> {
        let mut segments = path.iter();
        let first = match segments.next() {
            Some(PathSegment::Key(k)) => self.values.get(k.as_str())?,
            _ => return None,
        };
        let mut current = first;
        for seg in segments {
            current = match (seg, current) {
                (PathSegment::Key(k), Data::Map(m)) => m.get(k.as_str())?,
                (PathSegment::Index(i), Data::Array(a)) => a.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Writes the value at a resolved path, creating intermediate mappings as
    /// needed. Fails if the path traverses an existing non-container value or
    /// leaves a gap in an array.
    pub fn set_path(&mut self, path: &[PathSegment], value: Data) -> Result<(), String> {
        let mut segments = path.iter();
        let root_key = match segments.next() {
            Some(PathSegment::Key(k)) => k.clone(),
            Some(PathSegment::Index(_)) => {
                return Err("location must start with a variable name".to_string())
            }
            None => return Err("empty location".to_string()),
        };
        let rest: Vec<&PathSegment> = segments.collect();
        if rest.is_empty() {
            self.values.insert(root_key, value);
            return Ok(());
        }
        let slot = self
            .values
            .entry(root_key.clone())
            .or_insert_with(|| Data::Map(HashMap::new()));
        set_path_in(slot, &rest, value, &root_key)
    }
}

fn set_path_in(
    current: &mut Data,
    rest: &[&PathSegment],
    value: Data,
    at: &str,
) -> Result<(), String> {
    let seg = rest[0];
    let is_last = rest.len() == 1;
    match (seg, current) {
        (PathSegment::Key(k), Data::Map(m)) => {
            if is_last {
                m.insert(k.clone(), value);
                Ok(())
            } else {
                let slot = m.entry(k.clone()).or_insert_with(|| Data::Map(HashMap::new()));
                set_path_in(slot, &rest[1..], value, k)
            }
        }
        (PathSegment::Index(i), Data::Array(a)) => {
            if *i > a.len() {
                return Err(format!("index {} out of bounds in '{}'", i, at));
            }
            if *i == a.len() {
                a.push(Data::Null);
            }
            if is_last {
                a[*i] = value;
                Ok(())
            } else {
                set_path_in(&mut a[*i], &rest[1..], value, at)
            }
        }
        (PathSegment::Index(_), Data::Map(_)) => {
            Err(format!("'{}' is a mapping, cannot index numerically", at))
        }
        (_, _) => Err(format!("'{}' is not a container", at)),
    }
}
