//! Request filters: an ordered mapping from dimension name to one value or a
//! list of values.
//!
//! Insertion order is significant. It drives split priority in
//! [`crate::split`] and the token order of artifact names in
//! [`crate::naming`], so the type keeps its entries in a `Vec` and the serde
//! impls below read and write them in document order.

use std::collections::HashSet;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::CdsError;

/// Extension used when a filter carries no `format` entry.
pub const DEFAULT_FORMAT: &str = "grib";

/// Dimensions that describe geometry rather than an enumerable axis.
pub const EXCLUDED_KEYS: &[&str] = &["area", "grid"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Scalar(String),
    Sequence(Vec<String>),
}

impl ValueSpec {
    pub fn scalar(value: impl Into<String>) -> Self {
        ValueSpec::Scalar(value.into())
    }

    pub fn sequence<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueSpec::Sequence(values.into_iter().map(Into::into).collect())
    }

    /// Number of values; a scalar counts as one.
    pub fn len(&self) -> usize {
        match self {
            ValueSpec::Scalar(_) => 1,
            ValueSpec::Sequence(values) => values.len(),
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, ValueSpec::Sequence(_))
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            ValueSpec::Scalar(value) => Some(value),
            ValueSpec::Sequence(_) => None,
        }
    }

    /// First value that appears more than once.
    pub fn repeated(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.values().into_iter().find(|value| !seen.insert(*value))
    }

    /// All values in order, a scalar being a one-element list.
    pub fn values(&self) -> Vec<&str> {
        match self {
            ValueSpec::Scalar(value) => vec![value.as_str()],
            ValueSpec::Sequence(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawScalar> for String {
    fn from(value: RawScalar) -> Self {
        match value {
            RawScalar::Text(text) => text,
            RawScalar::Number(number) => number.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    One(RawScalar),
    Many(Vec<RawScalar>),
}

impl<'de> Deserialize<'de> for ValueSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawValue::deserialize(deserializer)? {
            RawValue::One(value) => ValueSpec::Scalar(value.into()),
            RawValue::Many(values) => {
                ValueSpec::Sequence(values.into_iter().map(Into::into).collect())
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    entries: Vec<(String, ValueSpec)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a filter, rejecting duplicate keys, empty value lists and
    /// repeated values within a list.
    pub fn from_entries<I, K>(entries: I) -> Result<Self, CdsError>
    where
        I: IntoIterator<Item = (K, ValueSpec)>,
        K: Into<String>,
    {
        let mut filter = Self::new();
        for (key, value) in entries {
            let key = key.into();
            if filter.contains_key(&key) {
                return Err(CdsError::InvalidFilter(format!("duplicate key {key}")));
            }
            if value.len() == 0 {
                return Err(CdsError::InvalidFilter(format!("empty value list for {key}")));
            }
            if let Some(value) = value.repeated() {
                return Err(CdsError::InvalidFilter(format!(
                    "value {value} listed twice for {key}"
                )));
            }
            filter.entries.push((key, value));
        }
        Ok(filter)
    }

    pub fn get(&self, key: &str) -> Option<&ValueSpec> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueSpec)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the filter with `key` set to `value`. An existing key keeps its
    /// position; a new key is appended.
    pub fn with_value(mut self, key: impl Into<String>, value: ValueSpec) -> Self {
        let key = key.into();
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    /// Overlays every entry of `other` onto this filter.
    pub fn merged(self, other: &Filter) -> Self {
        other
            .iter()
            .fold(self, |acc, (key, value)| acc.with_value(key, value.clone()))
    }

    pub fn format(&self) -> &str {
        match self.get("format") {
            Some(ValueSpec::Scalar(format)) => format,
            Some(ValueSpec::Sequence(formats)) => formats
                .first()
                .map(String::as_str)
                .unwrap_or(DEFAULT_FORMAT),
            None => DEFAULT_FORMAT,
        }
    }

    /// Product of the value counts of `keys`. Every key must be present.
    pub fn cartesian_size<S: AsRef<str>>(&self, keys: &[S]) -> Result<u64, CdsError> {
        keys.iter().try_fold(1u64, |size, key| {
            let key = key.as_ref();
            let value = self
                .get(key)
                .ok_or_else(|| CdsError::InvalidDimension(key.to_string()))?;
            Ok(size.saturating_mul(value.len() as u64))
        })
    }

    /// List-valued keys not in `excluded`, in insertion order.
    pub fn splittable_keys(&self, excluded: &[&str]) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(key, value)| value.is_sequence() && !excluded.contains(&key.as_str()))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl Serialize for Filter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct FilterVisitor;

impl<'de> Visitor<'de> for FilterVisitor {
    type Value = Filter;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of dimension names to a value or a list of values")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = Vec::new();
        while let Some((key, value)) = access.next_entry::<String, ValueSpec>()? {
            entries.push((key, value));
        }
        Filter::from_entries(entries).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(FilterVisitor)
    }
}
