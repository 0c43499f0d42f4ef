// SPDX-License-Identifier: Apache-2.0
use std::str::FromStr;

use thiserror::Error;

use crate::value::{SemanticVersion, Value, ValueType};

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Everything a [`Codec`] can fail with, independent of any particular metric.
///
/// Callers (the catalog, the storage facade) attach the metric id when
/// surfacing this as an [`crate::error::Error::EncodeFailure`] or
/// [`crate::error::Error::DecodeFailure`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("string value was not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid semantic version: {0}")]
    SemanticVersion(#[from] crate::value::ParseSemanticVersionError),
}

/// Converts [`Value`]s to and from the bytes a segment records and the
/// standalone last-value file hold.
///
/// Implementations must be deterministic: encoding the same [`Value`] twice
/// must produce identical bytes, since the storage facade's dedup check
/// compares encoded bytes rather than `Value`s directly.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, value: &Value) -> CodecResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8], value_type: &ValueType) -> CodecResult<Value>;
}

/// The default [`Codec`]: raw UTF-8 bytes for strings, compact JSON for
/// everything else (including opaque passthrough for bytes and custom
/// values).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> CodecResult<Vec<u8>> {
        Ok(match value {
            Value::String(s) => s.as_bytes().to_vec(),
            Value::Bytes(b) => b.clone(),
            Value::Custom(_, b) => b.clone(),
            Value::Integer(v) => serde_json::to_vec(v)?,
            Value::Double(v) => serde_json::to_vec(v)?,
            Value::Boolean(v) => serde_json::to_vec(v)?,
            Value::Date(v) => serde_json::to_vec(v)?,
            Value::Enumeration(v) => serde_json::to_vec(v)?,
            Value::ServerStatus(v) => serde_json::to_vec(v)?,
            Value::SemanticVersion(v) => serde_json::to_vec(&v.to_string())?,
        })
    }

    fn decode(&self, bytes: &[u8], value_type: &ValueType) -> CodecResult<Value> {
        Ok(match value_type {
            ValueType::String => Value::String(String::from_utf8(bytes.to_vec())?),
            ValueType::Bytes => Value::Bytes(bytes.to_vec()),
            ValueType::Custom(name) => Value::Custom(name.clone(), bytes.to_vec()),
            ValueType::Integer => Value::Integer(serde_json::from_slice(bytes)?),
            ValueType::Double => Value::Double(serde_json::from_slice(bytes)?),
            ValueType::Boolean => Value::Boolean(serde_json::from_slice(bytes)?),
            ValueType::Date => Value::Date(serde_json::from_slice(bytes)?),
            ValueType::Enumeration => Value::Enumeration(serde_json::from_slice(bytes)?),
            ValueType::ServerStatus => Value::ServerStatus(serde_json::from_slice(bytes)?),
            ValueType::SemanticVersion => {
                let raw: String = serde_json::from_slice(bytes)?;
                Value::SemanticVersion(SemanticVersion::from_str(&raw)?)
            }
        })
    }
}
