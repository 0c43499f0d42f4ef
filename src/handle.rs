// SPDX-License-Identifier: Apache-2.0
//! The typed, per-metric handle applications hold on to: a thin,
//! cheaply-cloneable wrapper around a [`Storage`] and a [`MetricId`] that
//! converts between an embedder's Rust type and the facade's value-erased
//! [`Value`].
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::catalog::MetricInfo;
use crate::codec::{Codec, JsonCodec};
use crate::error::{Error, Result};
use crate::id::MetricId;
use crate::storage::{Storage, Timestamped};
use crate::value::{MetricValue, Value};

/// A typed handle bound to one metric.
///
/// No handle owns the [`Storage`] it points at; cloning a handle clones the
/// underlying `Arc`, so every clone reads and writes the same underlying
/// metric.
pub struct MetricHandle<V, C: Codec = JsonCodec> {
    storage: Arc<Storage<C>>,
    info: MetricInfo,
    _marker: PhantomData<V>,
}

impl<V, C: Codec> Clone for MetricHandle<V, C> {
    fn clone(&self) -> Self {
        Self { storage: Arc::clone(&self.storage), info: self.info.clone(), _marker: PhantomData }
    }
}

fn now_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

impl<V: MetricValue, C: Codec> MetricHandle<V, C> {
    pub(crate) fn new(storage: Arc<Storage<C>>, info: MetricInfo) -> Self {
        Self { storage, info, _marker: PhantomData }
    }

    pub fn id(&self) -> &MetricId {
        &self.info.id
    }

    pub fn info(&self) -> &MetricInfo {
        &self.info
    }

    /// Records `value` at `timestamp` (seconds since the Unix epoch).
    /// Returns `false` if the sample was deduped against the current value.
    pub fn update(&self, value: V, timestamp: f64) -> Result<bool> {
        let sample = Timestamped::new(timestamp, value.into_value());
        self.storage.store_value(&self.info.id, sample)
    }

    /// Like [`MetricHandle::update`], stamped with the current time.
    pub fn update_now(&self, value: V) -> Result<bool> {
        self.update(value, now_seconds())
    }

    /// Applies a batch of samples, sorted and deduped by the facade so only
    /// genuinely new values are persisted.
    pub fn update_many(&self, samples: impl IntoIterator<Item = Timestamped<V>>) -> Result<()> {
        let samples = samples.into_iter().map(|s| Timestamped::new(s.timestamp, s.value.into_value())).collect();
        self.storage.store_many_value(&self.info.id, samples)
    }

    pub fn current_value(&self) -> Result<Option<Timestamped<V>>> {
        match self.storage.current_value(&self.info.id)? {
            None => Ok(None),
            Some(sample) => Self::decode_sample(&self.info.id, sample).map(Some),
        }
    }

    /// Records in `[min(from, to), max(from, to)]`, ascending if
    /// `from <= to`, descending otherwise, capped at `limit` if given.
    pub fn history(&self, from: f64, to: f64, limit: Option<usize>) -> Result<Vec<Timestamped<V>>> {
        self.storage
            .history_value(&self.info.id, from, to, limit)?
            .into_iter()
            .map(|sample| Self::decode_sample(&self.info.id, sample))
            .collect()
    }

    /// Total number of recorded samples for this metric.
    pub fn count(&self) -> Result<u64> {
        self.storage.count(&self.info.id)
    }

    /// Deletes every recorded sample with `timestamp < before`.
    pub fn delete_history(&self, before: f64) -> Result<()> {
        self.storage.delete_history(&self.info.id, before)
    }

    /// Registers `listener` to run, synchronously and on the calling
    /// thread, whenever this metric's value changes. The listener must not
    /// call back into the same [`Storage`], which would deadlock.
    pub fn on_change(&self, listener: impl Fn(Timestamped<V>) + Send + Sync + 'static) {
        self.storage.on_change(&self.info.id, move |_id, sample| {
            if let Ok(typed) = Self::decode_sample(_id, sample.clone()) {
                listener(typed);
            }
        });
    }

    /// Registers `listener` to run whenever history older than some cutoff
    /// is deleted for this metric; `listener` receives that cutoff.
    pub fn on_delete(&self, listener: impl Fn(f64) + Send + Sync + 'static) {
        self.storage.on_delete(&self.info.id, move |_id, before| listener(before));
    }

    fn decode_sample(id: &MetricId, sample: Timestamped<Value>) -> Result<Timestamped<V>> {
        let value = V::from_value(sample.value).ok_or_else(|| {
            Error::DecodeFailure {
                id: id.clone(),
                source: Box::new(crate::error::Msg(
                    "stored value did not match this handle's expected type".to_string(),
                )),
            }
        })?;
        Ok(Timestamped::new(sample.timestamp, value))
    }
}
