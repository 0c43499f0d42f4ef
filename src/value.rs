// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The tag identifying the shape of a metric's values.
///
/// Persisted in the catalog as the tag's string form (see [`fmt::Display`]
/// and [`FromStr`] below), so the set of built-in tags is a compatibility
/// surface: renaming one breaks every catalog already on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Integer,
    Double,
    Boolean,
    String,
    Bytes,
    Date,
    Enumeration,
    ServerStatus,
    SemanticVersion,
    /// An embedder-defined value type, named by the embedder.
    Custom(String),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Integer => write!(f, "integer"),
            ValueType::Double => write!(f, "double"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::String => write!(f, "string"),
            ValueType::Bytes => write!(f, "bytes"),
            ValueType::Date => write!(f, "date"),
            ValueType::Enumeration => write!(f, "enumeration"),
            ValueType::ServerStatus => write!(f, "server-status"),
            ValueType::SemanticVersion => write!(f, "semantic-version"),
            ValueType::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("unrecognized value type tag: {0:?}")]
pub struct ParseValueTypeError(String);

impl FromStr for ValueType {
    type Err = ParseValueTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "integer" => ValueType::Integer,
            "double" => ValueType::Double,
            "boolean" => ValueType::Boolean,
            "string" => ValueType::String,
            "bytes" => ValueType::Bytes,
            "date" => ValueType::Date,
            "enumeration" => ValueType::Enumeration,
            "server-status" => ValueType::ServerStatus,
            "semantic-version" => ValueType::SemanticVersion,
            other => match other.strip_prefix("custom:") {
                Some(name) => ValueType::Custom(name.to_string()),
                None => return Err(ParseValueTypeError(other.to_string())),
            },
        })
    }
}

impl Serialize for ValueType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A monitoring-style coarse health reading, suitable for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerStatus {
    Ok,
    Degraded,
    Unavailable,
}

/// A `major.minor.patch[-pre]` version, stored and compared structurally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid semantic version string: {0:?}")]
pub struct ParseSemanticVersionError(String);

impl FromStr for SemanticVersion {
    type Err = ParseSemanticVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (s, None),
        };
        let mut parts = core.split('.');
        let (Some(major), Some(minor), Some(patch), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseSemanticVersionError(s.to_string()));
        };
        let parse = |s: &str| s.parse::<u64>().map_err(|_| ParseSemanticVersionError(s.to_string()));
        Ok(SemanticVersion {
            major: parse(major)?,
            minor: parse(minor)?,
            patch: parse(patch)?,
            pre,
        })
    }
}

/// A single value, erased to the tagged union the
/// [`crate::storage::Storage`] facade stores and forwards to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Boolean(bool),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Enumeration(String),
    ServerStatus(ServerStatus),
    SemanticVersion(SemanticVersion),
    /// An embedder-defined value, carried as opaque bytes the configured
    /// codec never interprets beyond passing them through unchanged.
    Custom(String, Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::Double(_) => ValueType::Double,
            Value::Boolean(_) => ValueType::Boolean,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Date(_) => ValueType::Date,
            Value::Enumeration(_) => ValueType::Enumeration,
            Value::ServerStatus(_) => ValueType::ServerStatus,
            Value::SemanticVersion(_) => ValueType::SemanticVersion,
            Value::Custom(name, _) => ValueType::Custom(name.clone()),
        }
    }
}

/// A Rust type that can round-trip through the value-erased [`Value`]
/// union, the conversion boundary a [`crate::handle::MetricHandle`] sits on.
pub trait MetricValue: Clone + PartialEq + Send + Sync + 'static {
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

/// A [`MetricValue`] whose [`ValueType`] tag is known without an instance,
/// letting [`crate::storage::Storage::get_or_create`] register it generically.
///
/// [`CustomValue`] deliberately does not implement this: its tag carries a
/// name chosen at the call site, so it registers through
/// `Storage::get_or_create_custom` instead.
pub trait TypedMetricValue: MetricValue {
    fn value_type() -> ValueType;
}

macro_rules! typed_metric_value {
    ($ty:ty, $value_type:expr, $variant:ident) => {
        impl MetricValue for $ty {
            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl TypedMetricValue for $ty {
            fn value_type() -> ValueType {
                $value_type
            }
        }
    };
}

typed_metric_value!(i64, ValueType::Integer, Integer);
typed_metric_value!(f64, ValueType::Double, Double);
typed_metric_value!(bool, ValueType::Boolean, Boolean);
typed_metric_value!(String, ValueType::String, String);
typed_metric_value!(Vec<u8>, ValueType::Bytes, Bytes);
typed_metric_value!(NaiveDate, ValueType::Date, Date);
typed_metric_value!(ServerStatus, ValueType::ServerStatus, ServerStatus);
typed_metric_value!(SemanticVersion, ValueType::SemanticVersion, SemanticVersion);

/// A named enumeration member, stored as [`ValueType::Enumeration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration(pub String);

impl MetricValue for Enumeration {
    fn into_value(self) -> Value {
        Value::Enumeration(self.0)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Enumeration(s) => Some(Enumeration(s)),
            _ => None,
        }
    }
}

impl TypedMetricValue for Enumeration {
    fn value_type() -> ValueType {
        ValueType::Enumeration
    }
}

/// An embedder-defined value, identified by a name chosen when the metric
/// is first registered via `Storage::get_or_create_custom`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomValue {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl MetricValue for CustomValue {
    fn into_value(self) -> Value {
        Value::Custom(self.name, self.bytes)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Custom(name, bytes) => Some(CustomValue { name, bytes }),
            _ => None,
        }
    }
}
