//! Typed attribute maps
//!
//! Capabilities and service registrations both carry a map of typed
//! attributes that filters are evaluated against.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::version::Version;

/// Attribute key that is normalised to a [`Version`] when given as a string
pub const VERSION_ATTRIBUTE: &str = "version";

/// Attribute key naming a capability; part of its [`super::CapabilityType`]
pub const NAME_ATTRIBUTE: &str = "name";

/// A single typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    List(Vec<AttributeValue>),
    Version(Version),
}

impl AttributeValue {
    /// String content, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is a long value
    pub fn as_long(&self) -> Option<i64> {
        match self {
            AttributeValue::Long(n) => Some(*n),
            _ => None,
        }
    }

    /// Version content, if this is a version value
    pub fn as_version(&self) -> Option<&Version> {
        match self {
            AttributeValue::Version(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Long(n) => write!(f, "{}", n),
            AttributeValue::Double(d) => write!(f, "{}", d),
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Version(v) => write!(f, "{}", v),
            AttributeValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Long(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Long(i64::from(value))
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        AttributeValue::Long(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<Version> for AttributeValue {
    fn from(value: Version) -> Self {
        AttributeValue::Version(value)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(values: Vec<T>) -> Self {
        AttributeValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Ordered attribute map
///
/// Keys are kept sorted so iteration (and therefore serialization) is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, AttributeValue>")]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    /// Create an empty attribute map
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert an attribute, normalising a string `version` to a [`Version`]
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = normalize(&key, value.into());
        self.0.insert(key, value);
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Remove an attribute
    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.0.remove(key)
    }

    /// Look up an attribute; falls back to a case-insensitive key match
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    /// String attribute, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttributeValue::as_str)
    }

    /// Whether the exact key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn normalize(key: &str, value: AttributeValue) -> AttributeValue {
    if key != VERSION_ATTRIBUTE {
        return value;
    }
    match value {
        AttributeValue::String(ref s) => match Version::parse(s) {
            Ok(version) => AttributeValue::Version(version),
            Err(_) => value,
        },
        other => other,
    }
}

impl From<BTreeMap<String, AttributeValue>> for Attributes {
    fn from(map: BTreeMap<String, AttributeValue>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = Attributes::new();
        for (key, value) in iter {
            attributes.insert(key, value);
        }
        attributes
    }
}
