//! Reactive Objects
//!
//! A [`ReactiveObject`] is a keyed container of dynamic [`Value`]s. Every
//! `get` tracks `(object, key)` and every `set` triggers it, so an effect
//! depends on exactly the keys it read.
//!
//! Objects are compared by identity. A value may hold another object, which
//! is how nested state is built; nested objects are never wrapped
//! implicitly. Arrays are not supported: per-index tracking is out of scope.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};

use super::runtime::{Runtime, RuntimeInner};
use super::store::Key;
use super::subscriber::ObjectId;

/// A value stored in a [`ReactiveObject`] slot.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Object(ReactiveObject),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// JSON form of a primitive; `None` for objects.
    ///
    /// Non-finite floats have no JSON form and map to `null`.
    fn primitive_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as Json;
        match self {
            Value::Null => Some(Json::Null),
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::Int(i) => Some(Json::from(*i)),
            Value::Float(f) => Some(
                serde_json::Number::from_f64(*f)
                    .map(Json::Number)
                    .unwrap_or(Json::Null),
            ),
            Value::Str(s) => Some(Json::String(s.to_string())),
            Value::Object(_) => None,
        }
    }
}

/// Primitives compare by value, objects by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<ReactiveObject> for Value {
    fn from(object: ReactiveObject) -> Self {
        Value::Object(object)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

struct ObjectInner {
    id: ObjectId,
    fields: RwLock<IndexMap<Key, Value>>,
    runtime: Weak<RuntimeInner>,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister_object(self.id);
        }
    }
}

/// An identity-bearing keyed container observed by a runtime.
///
/// Cloning produces another handle to the same object.
#[derive(Clone)]
pub struct ReactiveObject {
    inner: Arc<ObjectInner>,
}

impl ReactiveObject {
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Check whether two handles refer to the same object.
    pub fn ptr_eq(&self, other: &ReactiveObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read a slot, tracking it for the running computation.
    ///
    /// Missing keys read as [`Value::Null`] and are still tracked, so a
    /// later `set` of that key re-runs the reader.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id, &key);
        }
        self.get_untracked(key)
    }

    /// Read a slot without tracking it.
    pub fn get_untracked(&self, key: impl Into<Key>) -> Value {
        self.inner
            .fields
            .read()
            .get(&key.into())
            .cloned()
            .unwrap_or_default()
    }

    /// Write a slot, then notify its subscribers.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let key = key.into();
        let previous = self.inner.fields.write().insert(key.clone(), value.into());
        // A replaced nested object may be the last handle; drop it unlocked.
        drop(previous);

        match self.inner.runtime.upgrade() {
            Some(runtime) => runtime.trigger(self.inner.id, &key),
            None => tracing::warn!(object = %self.inner.id, key = %key, "object written after its runtime was dropped"),
        }
    }

    /// Read (tracked) and write back a slot, like `obj.key = f(obj.key)`.
    pub fn update(&self, key: impl Into<Key>, f: impl FnOnce(&Value) -> Value) {
        let key = key.into();
        let current = self.get(key.clone());
        self.set(key, f(&current));
    }

    /// Keys currently present, in insertion order. Not tracked.
    pub fn keys(&self) -> Vec<Key> {
        self.inner.fields.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.read().is_empty()
    }

    /// Build an object graph from a JSON object.
    ///
    /// Nested JSON objects become nested reactive objects. Arrays are
    /// rejected.
    pub fn from_json(runtime: &Runtime, json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => {
                let object = runtime.object();
                {
                    let mut fields = object.inner.fields.write();
                    for (key, value) in map {
                        fields.insert(Key::from(key.as_str()), value_from_json(runtime, value)?);
                    }
                }
                Ok(object)
            }
            _ => Err(Error::UnsupportedJson("root must be an object")),
        }
    }

    /// Deep snapshot of every reachable key, tracking each read.
    ///
    /// Objects already visited on the way (shared or cyclic references) are
    /// cut off as `null`.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        traverse(self, &mut seen)
    }
}

fn value_from_json(runtime: &Runtime, json: &serde_json::Value) -> Result<Value> {
    use serde_json::Value as Json;
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(_) => return Err(Error::UnsupportedJson("arrays are not supported")),
        Json::Object(_) => Value::Object(ReactiveObject::from_json(runtime, json)?),
    })
}

fn traverse(object: &ReactiveObject, seen: &mut HashSet<ObjectId>) -> serde_json::Value {
    if !seen.insert(object.id()) {
        return serde_json::Value::Null;
    }
    let mut map = serde_json::Map::new();
    for key in object.keys() {
        let value = object.get(key.clone());
        let json = match &value {
            Value::Object(nested) => traverse(nested, seen),
            primitive => primitive.primitive_json().unwrap_or_default(),
        };
        map.insert(key.to_string(), json);
    }
    serde_json::Value::Object(map)
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Nested objects print by id only; the graph may be cyclic.
        let keys = self.keys();
        f.debug_struct("ReactiveObject")
            .field("id", &self.inner.id)
            .field("keys", &keys)
            .finish()
    }
}

impl Runtime {
    /// Create an empty object observed by this runtime.
    pub fn object(&self) -> ReactiveObject {
        ReactiveObject {
            inner: Arc::new(ObjectInner {
                id: ObjectId::new(),
                fields: RwLock::new(IndexMap::new()),
                runtime: Arc::downgrade(&self.inner),
            }),
        }
    }

    /// Create an object with initial fields. Does not trigger.
    pub fn object_from<I, K, V>(&self, fields: I) -> ReactiveObject
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Value>,
    {
        let object = self.object();
        object
            .inner
            .fields
            .write()
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        object
    }
}
