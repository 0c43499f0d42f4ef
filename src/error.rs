// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use thiserror::Error;

use crate::id::MetricId;
use crate::value::ValueType;

pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error with no structure of its own, used where a lower layer
/// (framing, last-value parsing) needs to hand up a reason string as a
/// proper `std::error::Error` source.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Msg(pub String);

impl From<String> for Msg {
    fn from(s: String) -> Self {
        Msg(s)
    }
}

/// Everything that can go wrong talking to a [`crate::storage::Storage`].
#[derive(Debug, Error)]
pub enum Error {
    /// The operation named a metric with no catalog entry.
    #[error("unknown metric: {0}")]
    UnknownMetric(MetricId),

    /// A value or handle disagreed with the metric's registered value type.
    #[error("metric {id} is registered as {registered}, not {requested}")]
    TypeMismatch {
        id: MetricId,
        registered: ValueType,
        requested: ValueType,
    },

    /// The configured codec rejected a value on encode.
    #[error("failed to encode value for metric {id}: {source}")]
    EncodeFailure {
        id: MetricId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The configured codec rejected stored bytes on decode.
    #[error("failed to decode value for metric {id}: {source}")]
    DecodeFailure {
        id: MetricId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A segment file held a frame that could not possibly be valid.
    #[error("corrupted log for metric {id} at {path}: {reason}")]
    LogCorrupted {
        id: MetricId,
        path: PathBuf,
        reason: String,
    },

    /// Failed to create or open a file or directory.
    #[error("failed to open {path}: {source}")]
    OpenFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write to a file.
    #[error("failed to write {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to delete a file or directory.
    #[error("failed to delete {path}: {source}")]
    DeleteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file the engine expected to find mid-operation was missing.
    #[error("expected file is missing: {path}")]
    MissingFile { path: PathBuf },
}
