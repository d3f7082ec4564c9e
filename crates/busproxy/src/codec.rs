//! # Tagged Value Codec
//!
//! Remote results and signal payloads arrive as JSON text. JSON cannot say
//! everything the bus can (a double that happens to be integral, a struct as
//! opposed to an array), so such values travel as tagged objects:
//!
//! ```text
//! {"$kind": "double", "value": 3.0}
//! {"$kind": "struct", "value": [1, "two"]}
//! ```
//!
//! A [`HookTable`] maps each kind to a decode function. The table is closed
//! over plain functions and can be extended with [`HookTable::register`];
//! nothing in the text is ever executed.
//!
//! ## Invariants
//!
//! - Objects carrying a `$kind` key are always dispatched through the table;
//!   an unknown kind is an error, never a plain dictionary.
//! - Nesting deeper than [`MAX_DEPTH`] is rejected.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;

use serde_json::Map;
use serde_json::Number;
use serde_json::Value as Json;

/// Key naming the kind of a tagged object.
pub const KIND_KEY: &str = "$kind";
/// Key holding the payload of a tagged object.
pub const VALUE_KEY: &str = "value";
/// Deepest nesting accepted when decoding.
pub const MAX_DEPTH: usize = 64;

pub const KIND_DOUBLE: &str = "double";
pub const KIND_STRUCT: &str = "struct";
pub const KIND_ARRAY: &str = "array";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The text is not valid JSON.
    #[error("malformed text: {0}")]
    Syntax(String),
    /// A result or payload must be a positional array.
    #[error("expected a top-level array, found {0}")]
    NotAnArray(&'static str),
    /// A tagged object named a kind missing from the hook table.
    #[error("unknown value kind '{0}'")]
    UnknownKind(String),
    /// A hook rejected its payload.
    #[error("malformed '{kind}' payload: {details}")]
    Payload { kind: String, details: String },
    #[error("number {0} cannot be represented")]
    Number(String),
    #[error("nesting exceeds {MAX_DEPTH} levels")]
    RecursionLimitExceeded,
}

pub type Result<T> = std::result::Result<T, Error>;

/// A value crossing the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<Value>),
    /// A positional tuple, kept distinct from [`Value::Array`].
    Struct(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
            Value::Dict(_) => "dict",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Elements of an array or a struct.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Struct(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_json(self))
    }
}

/// Decodes the payload of one tagged kind. `depth` is the payload's depth.
pub type Hook = fn(&HookTable, Json, usize) -> Result<Value>;

/// Registry of decode functions for tagged kinds.
#[derive(Clone)]
pub struct HookTable {
    hooks: HashMap<String, Hook>,
}

impl Default for HookTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.hooks.keys().collect();
        kinds.sort();
        f.debug_struct("HookTable").field("kinds", &kinds).finish()
    }
}

impl HookTable {
    /// A table with the built-in `double`, `struct` and `array` kinds.
    pub fn new() -> Self {
        let mut table = Self::empty();
        table.register(KIND_DOUBLE, decode_double);
        table.register(KIND_STRUCT, decode_struct);
        table.register(KIND_ARRAY, decode_array);
        table
    }

    pub fn empty() -> Self {
        Self { hooks: HashMap::new() }
    }

    /// Adds or replaces the hook for `kind`, returning the previous one.
    pub fn register(&mut self, kind: impl Into<String>, hook: Hook) -> Option<Hook> {
        self.hooks.insert(kind.into(), hook)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.hooks.contains_key(kind)
    }

    /// Parses `text` and expands it into its positional values.
    pub fn expand(&self, text: &str) -> Result<Vec<Value>> {
        let json: Json = serde_json::from_str(text).map_err(|e| Error::Syntax(e.to_string()))?;
        match self.decode(json, 0)? {
            Value::Array(items) => Ok(items),
            other => Err(Error::NotAnArray(other.kind_name())),
        }
    }

    /// Decodes one JSON value found at `depth`.
    pub fn decode(&self, json: Json, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(b)),
            Json::Number(n) => decode_number(&n),
            Json::String(s) => Ok(Value::Str(s)),
            Json::Array(items) => Ok(Value::Array(self.decode_all(items, depth)?)),
            Json::Object(map) => self.decode_object(map, depth),
        }
    }

    /// Decodes the children of a container found at `depth`.
    pub fn decode_all(&self, items: Vec<Json>, depth: usize) -> Result<Vec<Value>> {
        items.into_iter().map(|item| self.decode(item, depth + 1)).collect()
    }

    fn decode_object(&self, mut map: Map<String, Json>, depth: usize) -> Result<Value> {
        if let Some(kind) = map.get(KIND_KEY) {
            let kind = kind.as_str().ok_or_else(|| Error::Payload {
                kind: KIND_KEY.to_string(),
                details: "kind must be a string".into(),
            })?;
            let hook = self
                .hooks
                .get(kind)
                .copied()
                .ok_or_else(|| Error::UnknownKind(kind.to_string()))?;
            let payload = map.remove(VALUE_KEY).unwrap_or(Json::Null);
            return hook(self, payload, depth + 1);
        }

        let mut dict = BTreeMap::new();
        for (key, item) in map {
            dict.insert(key, self.decode(item, depth + 1)?);
        }
        Ok(Value::Dict(dict))
    }
}

fn decode_number(n: &Number) -> Result<Value> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Int(i));
    }
    n.as_f64().map(Value::Double).ok_or_else(|| Error::Number(n.to_string()))
}

fn payload_error(kind: &str, details: impl Into<String>) -> Error {
    Error::Payload {
        kind: kind.to_string(),
        details: details.into(),
    }
}

fn decode_double(_table: &HookTable, payload: Json, _depth: usize) -> Result<Value> {
    match payload {
        Json::Number(n) => n
            .as_f64()
            .map(Value::Double)
            .ok_or_else(|| Error::Number(n.to_string())),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(Value::Double(f64::NAN)),
            "Infinity" => Ok(Value::Double(f64::INFINITY)),
            "-Infinity" => Ok(Value::Double(f64::NEG_INFINITY)),
            _ => Err(payload_error(KIND_DOUBLE, format!("'{}' is not a number", s))),
        },
        _ => Err(payload_error(KIND_DOUBLE, "expected a number")),
    }
}

fn decode_struct(table: &HookTable, payload: Json, depth: usize) -> Result<Value> {
    match payload {
        Json::Array(items) => Ok(Value::Struct(table.decode_all(items, depth)?)),
        _ => Err(payload_error(KIND_STRUCT, "expected an array of fields")),
    }
}

fn decode_array(table: &HookTable, payload: Json, depth: usize) -> Result<Value> {
    match payload {
        Json::Array(items) => Ok(Value::Array(table.decode_all(items, depth)?)),
        _ => Err(payload_error(KIND_ARRAY, "expected an array")),
    }
}

fn tagged(kind: &str, payload: Json) -> Json {
    let mut map = Map::new();
    map.insert(KIND_KEY.to_string(), Json::String(kind.to_string()));
    map.insert(VALUE_KEY.to_string(), payload);
    Json::Object(map)
}

/// Converts a value to its wire JSON.
///
/// Doubles and structs are always tagged so they survive the round trip.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Double(d) => {
            let payload = if d.is_finite() {
                Json::from(*d)
            } else if d.is_nan() {
                Json::String("NaN".into())
            } else if d.is_sign_positive() {
                Json::String("Infinity".into())
            } else {
                Json::String("-Infinity".into())
            };
            tagged(KIND_DOUBLE, payload)
        }
        Value::Str(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Struct(items) => tagged(KIND_STRUCT, Json::Array(items.iter().map(to_json).collect())),
        Value::Dict(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()),
    }
}

/// The text carried by a bare-string reply.
///
/// Replies such as a version or a topic may arrive raw or as a JSON string;
/// a JSON string is unquoted, anything else is trimmed.
pub fn reply_text(reply: String) -> String {
    match serde_json::from_str::<String>(&reply) {
        Ok(text) => text,
        Err(_) => reply.trim().to_string(),
    }
}

/// Encodes a positional argument list as compact text.
pub fn encode_args(args: &[Value]) -> String {
    Json::Array(args.iter().map(to_json).collect()).to_string()
}
