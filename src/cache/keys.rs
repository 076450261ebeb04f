//! Cache key derivation.
//!
//! Application-supplied key and version data are turned into canonical
//! strings, then hashed into the literal store key / ETag value.
//!
//! Mapping entries keep the order the caller built them in. Nothing here
//! sorts; two maps with the same entries in a different order produce
//! different keys.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, Utc};
use md5::{Digest, Md5};

use crate::http::Request;

/// Namespace prefixed to every hashed key.
pub const DEFAULT_NAMESPACE: &str = "cacheable";

/// Structured key or version data.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Symbol(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    List(Vec<KeyValue>),
    /// Ordered entries; keys are usually `Symbol` or `Str`.
    Map(Vec<(KeyValue, KeyValue)>),
}

impl KeyValue {
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    /// Builds a map from `(name, value)` pairs, using symbol keys.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<KeyValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Self::Symbol(k.into()), v.into()))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn entry(&self, name: &str) -> Option<&KeyValue> {
        let Self::Map(entries) = self else {
            return None;
        };
        entries
            .iter()
            .find(|(k, _)| matches!(k, Self::Symbol(s) | Self::Str(s) if s == name))
            .map(|(_, v)| v)
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for KeyValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for KeyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for KeyValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for KeyValue {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

impl From<u32> for KeyValue {
    fn from(n: u32) -> Self {
        Self::Int(n.into())
    }
}

impl From<f64> for KeyValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<DateTime<Utc>> for KeyValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<NaiveDate> for KeyValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl<T: Into<KeyValue>> From<Vec<T>> for KeyValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Canonical string for a key value.
///
/// A map with a `key` entry is the structured form
/// `[schema_version:]key[:version]`; every other shape falls back to a
/// literal or structural rendering.
pub fn canonicalize(value: &KeyValue) -> String {
    match value {
        KeyValue::Map(_) => match value.entry("key") {
            Some(key) => {
                let mut out = key_part(key);
                if let Some(schema) = value.entry("schema_version").filter(|v| !v.is_null()) {
                    out = format!("{}:{out}", plain(schema));
                }
                if let Some(version) = value.entry("version").filter(|v| !v.is_null()) {
                    out.push(':');
                    out.push_str(&key_part(version));
                }
                out
            }
            None => inspect(value),
        },
        KeyValue::List(_) => inspect(value),
        KeyValue::Timestamp(t) => t.timestamp().to_string(),
        KeyValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        KeyValue::Bool(_) | KeyValue::Int(_) | KeyValue::Str(_) | KeyValue::Symbol(_) => {
            inspect(value)
        }
        KeyValue::Null | KeyValue::Float(_) => format!("{:?}", plain(value)),
    }
}

/// `namespace:md5hex(source)`.
pub fn hash_key(namespace: &str, source: &str) -> String {
    format!("{namespace}:{}", hex::encode(Md5::digest(source.as_bytes())))
}

/// [`hash_key`] under [`DEFAULT_NAMESPACE`].
pub fn hash(source: &str) -> String {
    hash_key(DEFAULT_NAMESPACE, source)
}

// Values of a map joined with ",", nested lists flattened; anything else in
// its plain string form.
fn key_part(value: &KeyValue) -> String {
    match value {
        KeyValue::Map(entries) => {
            let mut parts = Vec::with_capacity(entries.len());
            for (_, v) in entries {
                push_joined(v, &mut parts);
            }
            parts.join(",")
        }
        other => plain(other),
    }
}

fn push_joined(value: &KeyValue, parts: &mut Vec<String>) {
    match value {
        KeyValue::List(items) => items.iter().for_each(|item| push_joined(item, parts)),
        other => parts.push(plain(other)),
    }
}

fn plain(value: &KeyValue) -> String {
    match value {
        KeyValue::Null => String::new(),
        KeyValue::Str(s) | KeyValue::Symbol(s) => s.clone(),
        KeyValue::Bool(b) => b.to_string(),
        KeyValue::Int(n) => n.to_string(),
        // Debug keeps the fractional part: 1.0 stays "1.0".
        KeyValue::Float(n) => format!("{n:?}"),
        KeyValue::Timestamp(t) => t.to_string(),
        KeyValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        KeyValue::List(_) | KeyValue::Map(_) => inspect(value),
    }
}

/// Structural rendering, e.g. `{:foo => "bar", :ids => [1, 2]}`.
fn inspect(value: &KeyValue) -> String {
    let mut out = String::new();
    write_inspect(value, &mut out);
    out
}

fn write_inspect(value: &KeyValue, out: &mut String) {
    match value {
        KeyValue::Null => out.push_str("null"),
        KeyValue::Str(s) => {
            let _ = write!(out, "{s:?}");
        }
        KeyValue::Symbol(s) => {
            out.push(':');
            out.push_str(s);
        }
        KeyValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_inspect(item, out);
            }
            out.push(']');
        }
        KeyValue::Map(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_inspect(k, out);
                out.push_str(" => ");
                write_inspect(v, out);
            }
            out.push('}');
        }
        other => out.push_str(&plain(other)),
    }
}

/// Caller-supplied identity of a cacheable response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheIdentity {
    key: KeyValue,
    version: KeyValue,
    schema_version: Option<u32>,
}

/// The strings derived from a [`CacheIdentity`] for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    /// Canonical key + version string, kept for logging.
    pub entity_tag_source: String,
    /// Versioned key: the ETag value.
    pub entity_tag: String,
    /// Unversioned key: the store slot.
    pub cache_key: String,
}

impl CacheIdentity {
    pub fn new(key: impl Into<KeyValue>, version: impl Into<KeyValue>) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
            schema_version: None,
        }
    }

    /// Default identity for a request: path and query string as the key,
    /// empty version data.
    pub fn for_request(request: &Request) -> Self {
        Self::new(
            KeyValue::map([
                ("path", request.path()),
                ("query", request.query_string().unwrap_or("")),
            ]),
            KeyValue::Map(Vec::new()),
        )
    }

    /// Pins the key schema version, overriding the configured default.
    #[must_use]
    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn key(&self) -> &KeyValue {
        &self.key
    }

    pub fn version(&self) -> &KeyValue {
        &self.version
    }

    /// Canonical string covering key, version and schema version.
    pub fn entity_tag_source(&self, default_schema_version: u32) -> String {
        canonicalize(&KeyValue::map([
            ("key", self.key.clone()),
            ("version", self.version.clone()),
            ("schema_version", self.schema(default_schema_version)),
        ]))
    }

    /// Canonical string covering key and schema version only.
    pub fn cache_key_source(&self, default_schema_version: u32) -> String {
        canonicalize(&KeyValue::map([
            ("key", self.key.clone()),
            ("schema_version", self.schema(default_schema_version)),
        ]))
    }

    /// Computes both hashes under `namespace`.
    pub fn derive(&self, namespace: &str, default_schema_version: u32) -> DerivedKeys {
        let entity_tag_source = self.entity_tag_source(default_schema_version);
        let entity_tag = hash_key(namespace, &entity_tag_source);
        let cache_key = hash_key(namespace, &self.cache_key_source(default_schema_version));
        DerivedKeys {
            entity_tag_source,
            entity_tag,
            cache_key,
        }
    }

    fn schema(&self, default: u32) -> KeyValue {
        KeyValue::from(self.schema_version.unwrap_or(default))
    }
}
