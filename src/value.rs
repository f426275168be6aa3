//! The closed dynamically-typed value model the codec serializes.

use std::fmt;

/// A dynamically-typed message value.
///
/// This is the complete set of shapes that can cross a channel. Custom
/// application types are lowered before they reach the codec: a class
/// becomes a [`Value::Struct`] (ordered field values), an enum becomes a
/// [`Value::Enum`] carrying its ordinal.
///
/// Absence is always the explicit [`Value::Null`] variant, never a sentinel
/// of another type, so an unset field and a zero-valued field stay distinct.
///
/// A `Value` exclusively owns its children; every tree is finite and acyclic
/// by construction.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(ValueMap),
    Enum(i32),
    Struct(Vec<Value>),
}

/// Error returned when a `Value` is read as the wrong variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatch {
    pub expected: &'static str,
    pub actual: &'static str,
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, got {}", self.expected, self.actual)
    }
}

impl std::error::Error for TypeMismatch {}

impl Value {
    /// Name of this value's variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Enum(_) => "enum",
            Value::Struct(_) => "struct",
        }
    }

    fn mismatch(&self, expected: &'static str) -> TypeMismatch {
        TypeMismatch { expected, actual: self.type_name() }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Result<bool, TypeMismatch> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_i64(&self) -> Result<i64, TypeMismatch> {
        match self {
            Value::Int64(i) => Ok(*i),
            other => Err(other.mismatch("int64")),
        }
    }

    pub fn as_f64(&self) -> Result<f64, TypeMismatch> {
        match self {
            Value::Float64(d) => Ok(*d),
            other => Err(other.mismatch("float64")),
        }
    }

    pub fn as_str(&self) -> Result<&str, TypeMismatch> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], TypeMismatch> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(other.mismatch("bytes")),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], TypeMismatch> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_map(&self) -> Result<&ValueMap, TypeMismatch> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(other.mismatch("map")),
        }
    }

    pub fn as_enum_ordinal(&self) -> Result<i32, TypeMismatch> {
        match self {
            Value::Enum(ordinal) => Ok(*ordinal),
            other => Err(other.mismatch("enum")),
        }
    }

    pub fn as_struct_fields(&self) -> Result<&[Value], TypeMismatch> {
        match self {
            Value::Struct(fields) => Ok(fields),
            other => Err(other.mismatch("struct")),
        }
    }
}

// Structural, deep equality. Float64 compares by bit pattern so the codec
// round-trip law `decode(encode(v)) == v` also holds for NaN payloads.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Float64(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// An insertion-ordered map of `Value` keys to `Value` values.
///
/// Keys are compared by deep value equality. Insertion order is preserved
/// for encoding but is irrelevant to equality: two maps holding the same
/// entries in different orders compare equal.
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
}

impl ValueMap {
    pub fn new() -> Self {
        ValueMap { entries: Vec::new() }
    }

    /// Inserts an entry, replacing the value of an equal existing key.
    pub fn insert(&mut self, key: Value, value: Value) {
        for (existing, slot) in &mut self.entries {
            if *existing == key {
                *slot = value;
                return;
            }
        }
        self.entries.push((key, value));
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl From<Vec<(Value, Value)>> for ValueMap {
    fn from(pairs: Vec<(Value, Value)>) -> Self {
        let mut map = ValueMap::new();
        for (k, v) in pairs {
            map.insert(k, v);
        }
        map
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Eq for ValueMap {}
