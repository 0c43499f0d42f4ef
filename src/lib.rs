// SPDX-License-Identifier: Apache-2.0
//! Embeddable, process-local time-series metric storage persisted to local
//! disk.
//!
//! A [`Storage`] coordinates a catalog of registered metrics, one
//! append-only segment log per metric, and a last-value cache. Typed
//! [`MetricHandle`]s are the everyday API: register one with
//! [`Storage::get_or_create`], then `update`/`history`/`delete_history` it.
pub mod catalog;
pub mod codec;
pub mod error;
pub mod handle;
pub mod id;
pub mod segment;
pub mod storage;
pub mod value;
pub mod writer;

pub use catalog::MetricInfo;
pub use codec::{Codec, CodecError, JsonCodec};
pub use error::{Error, Result};
pub use handle::MetricHandle;
pub use id::{MetricId, MetricIdHash};
pub use storage::{Storage, StorageConfig, Timestamped};
pub use value::{
    CustomValue, Enumeration, MetricValue, SemanticVersion, ServerStatus, TypedMetricValue, Value,
    ValueType,
};
