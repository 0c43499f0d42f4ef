// SPDX-License-Identifier: Apache-2.0
//! The storage facade: the single entry point coordinating the catalog,
//! per-metric segment writers, a last-value cache, and change/delete
//! listeners behind one mutex.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::{Catalog, MetricInfo};
use crate::codec::{Codec, JsonCodec};
use crate::error::{Error, Result};
use crate::handle::MetricHandle;
use crate::id::MetricId;
use crate::value::{CustomValue, TypedMetricValue, Value, ValueType};
use crate::writer::{RawSample, SegmentWriter};

/// The default target size, in bytes, a segment grows to before rollover.
pub const DEFAULT_SEGMENT_SIZE: u64 = 10_000_000;

/// A value paired with the instant (seconds since the Unix epoch) it was
/// observed at.
#[derive(Debug, Clone)]
pub struct Timestamped<V> {
    pub timestamp: f64,
    pub value: V,
}

impl<V> Timestamped<V> {
    pub fn new(timestamp: f64, value: V) -> Self {
        Self { timestamp, value }
    }
}

impl<V: PartialEq> PartialEq for Timestamped<V> {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.value == other.value
    }
}

/// Construction-time configuration for a [`Storage`] instance.
///
/// There is deliberately no env-var or config-file loading here: composing
/// `StorageConfig` from whatever configuration surface the embedding
/// application already uses is the embedder's job.
pub struct StorageConfig<C: Codec = JsonCodec> {
    pub root_dir: PathBuf,
    pub segment_size: u64,
    pub codec: C,
}

impl StorageConfig<JsonCodec> {
    /// A config rooted at `root_dir`, with the default segment size and the
    /// built-in JSON codec.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self { root_dir: root_dir.into(), segment_size: DEFAULT_SEGMENT_SIZE, codec: JsonCodec }
    }
}

impl<C: Codec> StorageConfig<C> {
    pub fn with_segment_size(mut self, segment_size: u64) -> Self {
        self.segment_size = segment_size;
        self
    }

    pub fn with_codec<C2: Codec>(self, codec: C2) -> StorageConfig<C2> {
        StorageConfig { root_dir: self.root_dir, segment_size: self.segment_size, codec }
    }
}

type ChangeListener = Box<dyn Fn(&MetricId, &Timestamped<Value>) + Send + Sync>;
type DeleteListener = Box<dyn Fn(&MetricId, f64) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    per_metric_change: HashMap<MetricId, Vec<ChangeListener>>,
    per_metric_delete: HashMap<MetricId, Vec<DeleteListener>>,
    global_change: Vec<ChangeListener>,
    global_delete: Vec<DeleteListener>,
}

struct StorageState {
    catalog: Catalog,
    writers: HashMap<MetricId, SegmentWriter>,
    cache: HashMap<MetricId, Timestamped<Value>>,
    listeners: Listeners,
}

/// Coordinates the catalog, per-metric segment writers, last-value cache,
/// and listener fan-out for an embedded metrics store rooted at one
/// directory.
///
/// All mutating operations take one mutex guarding catalog, writers, cache,
/// and listeners together, so from a caller's perspective each call behaves
/// as if dispatched to a single logical actor.
pub struct Storage<C: Codec = JsonCodec> {
    segment_size: u64,
    codec: C,
    state: Mutex<StorageState>,
}

impl<C: Codec> Storage<C> {
    /// Opens (creating if necessary) a storage instance rooted at
    /// `config.root_dir`, loading its catalog from `metrics.json`.
    pub fn open(config: StorageConfig<C>) -> Result<Arc<Self>> {
        let catalog = Catalog::open(&config.root_dir)?;
        Ok(Arc::new(Self {
            segment_size: config.segment_size,
            codec: config.codec,
            state: Mutex::new(StorageState {
                catalog,
                writers: HashMap::new(),
                cache: HashMap::new(),
                listeners: Listeners::default(),
            }),
        }))
    }

    /// Every metric currently registered, sorted by `(group, id)`.
    pub fn list(&self) -> Vec<MetricInfo> {
        self.state.lock().catalog.list()
    }

    pub fn info(&self, id: &MetricId) -> Option<MetricInfo> {
        self.state.lock().catalog.get(id)
    }

    /// Registers `id` if new (failing on value-type mismatch if not), and
    /// returns a typed handle bound to it.
    pub fn get_or_create<V: TypedMetricValue>(
        self: &Arc<Self>,
        id: MetricId,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<MetricHandle<V, C>> {
        let info = {
            let mut state = self.state.lock();
            state.catalog.get_or_create(&id, V::value_type(), name, description)?
        };
        Ok(MetricHandle::new(Arc::clone(self), info))
    }

    /// Like [`Storage::get_or_create`], for an embedder-defined
    /// [`CustomValue`] whose `ValueType::Custom` tag is named here rather
    /// than known statically.
    pub fn get_or_create_custom(
        self: &Arc<Self>,
        id: MetricId,
        custom_name: impl Into<String>,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<MetricHandle<CustomValue, C>> {
        let value_type = ValueType::Custom(custom_name.into());
        let info = {
            let mut state = self.state.lock();
            state.catalog.get_or_create(&id, value_type, name, description)?
        };
        Ok(MetricHandle::new(Arc::clone(self), info))
    }

    fn writer_mut<'a>(
        writers: &'a mut HashMap<MetricId, SegmentWriter>,
        catalog: &Catalog,
        id: &MetricId,
        segment_size: u64,
    ) -> &'a mut SegmentWriter {
        writers
            .entry(id.clone())
            .or_insert_with(|| SegmentWriter::new(id.clone(), catalog.metric_dir(id), segment_size))
    }

    /// The cached current value, loading it from the writer's last-value
    /// file (or segment scan) on first access for this metric.
    fn load_cached(
        codec: &C,
        cache: &mut HashMap<MetricId, Timestamped<Value>>,
        writers: &mut HashMap<MetricId, SegmentWriter>,
        catalog: &Catalog,
        id: &MetricId,
        info: &MetricInfo,
        segment_size: u64,
    ) -> Result<Option<Timestamped<Value>>> {
        if let Some(cached) = cache.get(id) {
            return Ok(Some(cached.clone()));
        }
        let writer = Self::writer_mut(writers, catalog, id, segment_size);
        match writer.last_value()? {
            None => Ok(None),
            Some(raw) => {
                let value = codec
                    .decode(&raw.value_bytes, &info.value_type)
                    .map_err(|source| Error::DecodeFailure { id: id.clone(), source: Box::new(source) })?;
                let decoded = Timestamped::new(raw.timestamp, value);
                cache.insert(id.clone(), decoded.clone());
                Ok(Some(decoded))
            }
        }
    }

    fn notify_change(listeners: &Listeners, id: &MetricId, sample: &Timestamped<Value>) {
        if let Some(list) = listeners.per_metric_change.get(id) {
            for f in list {
                f(id, sample);
            }
        }
        for f in &listeners.global_change {
            f(id, sample);
        }
    }

    fn notify_delete(listeners: &Listeners, id: &MetricId, before: f64) {
        if let Some(list) = listeners.per_metric_delete.get(id) {
            for f in list {
                f(id, before);
            }
        }
        for f in &listeners.global_delete {
            f(id, before);
        }
    }

    /// Appends `sample` if it both differs (bytewise, once encoded) from
    /// the current value and carries a strictly later timestamp. Returns
    /// whether it was persisted.
    pub fn store_value(&self, id: &MetricId, sample: Timestamped<Value>) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let info = state.catalog.get(id).ok_or_else(|| Error::UnknownMetric(id.clone()))?;
        let incoming_type = sample.value.value_type();
        if incoming_type != info.value_type {
            return Err(Error::TypeMismatch {
                id: id.clone(),
                registered: info.value_type.clone(),
                requested: incoming_type,
            });
        }

        let encoded = self
            .codec
            .encode(&sample.value)
            .map_err(|source| Error::EncodeFailure { id: id.clone(), source: Box::new(source) })?;

        let current = Self::load_cached(
            &self.codec,
            &mut state.cache,
            &mut state.writers,
            &state.catalog,
            id,
            &info,
            self.segment_size,
        )?;

        if let Some(current) = &current {
            let current_encoded = self
                .codec
                .encode(&current.value)
                .map_err(|source| Error::EncodeFailure { id: id.clone(), source: Box::new(source) })?;
            if current_encoded == encoded || sample.timestamp <= current.timestamp {
                return Ok(false);
            }
        }

        let writer = Self::writer_mut(&mut state.writers, &state.catalog, id, self.segment_size);
        writer.append(sample.timestamp, &encoded)?;

        let persisted = Timestamped::new(sample.timestamp, sample.value);
        state.cache.insert(id.clone(), persisted.clone());
        Self::notify_change(&state.listeners, id, &persisted);
        Ok(true)
    }

    /// Applies a batch, sorted by timestamp, deduping each candidate
    /// against the current value as it goes so only genuinely new samples
    /// are written. Fires at most one change notification, for the last
    /// sample actually persisted.
    pub fn store_many_value(&self, id: &MetricId, mut samples: Vec<Timestamped<Value>>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        samples.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal));

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let info = state.catalog.get(id).ok_or_else(|| Error::UnknownMetric(id.clone()))?;

        let mut current = Self::load_cached(
            &self.codec,
            &mut state.cache,
            &mut state.writers,
            &state.catalog,
            id,
            &info,
            self.segment_size,
        )?;
        let mut current_encoded = match &current {
            Some(c) => Some(
                self.codec
                    .encode(&c.value)
                    .map_err(|source| Error::EncodeFailure { id: id.clone(), source: Box::new(source) })?,
            ),
            None => None,
        };

        let mut to_write = Vec::new();
        for sample in samples {
            let incoming_type = sample.value.value_type();
            if incoming_type != info.value_type {
                return Err(Error::TypeMismatch {
                    id: id.clone(),
                    registered: info.value_type.clone(),
                    requested: incoming_type,
                });
            }
            let encoded = self
                .codec
                .encode(&sample.value)
                .map_err(|source| Error::EncodeFailure { id: id.clone(), source: Box::new(source) })?;

            let duplicate = match (&current, &current_encoded) {
                (Some(c), Some(enc)) => *enc == encoded || sample.timestamp <= c.timestamp,
                _ => false,
            };
            if duplicate {
                continue;
            }

            to_write.push(RawSample { timestamp: sample.timestamp, value_bytes: encoded.clone() });
            current = Some(sample);
            current_encoded = Some(encoded);
        }

        if to_write.is_empty() {
            return Ok(());
        }

        let writer = Self::writer_mut(&mut state.writers, &state.catalog, id, self.segment_size);
        writer.write_many(&to_write)?;

        let last = current.expect("to_write non-empty implies current was set above");
        state.cache.insert(id.clone(), last.clone());
        Self::notify_change(&state.listeners, id, &last);
        Ok(())
    }

    pub fn current_value(&self, id: &MetricId) -> Result<Option<Timestamped<Value>>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let info = state.catalog.get(id).ok_or_else(|| Error::UnknownMetric(id.clone()))?;
        Self::load_cached(&self.codec, &mut state.cache, &mut state.writers, &state.catalog, id, &info, self.segment_size)
    }

    pub fn history_value(
        &self,
        id: &MetricId,
        from: f64,
        to: f64,
        limit: Option<usize>,
    ) -> Result<Vec<Timestamped<Value>>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let info = state.catalog.get(id).ok_or_else(|| Error::UnknownMetric(id.clone()))?;
        let writer = Self::writer_mut(&mut state.writers, &state.catalog, id, self.segment_size);
        let raws = writer.history(from, to, limit)?;
        raws.into_iter()
            .map(|raw| {
                let value = self
                    .codec
                    .decode(&raw.value_bytes, &info.value_type)
                    .map_err(|source| Error::DecodeFailure { id: id.clone(), source: Box::new(source) })?;
                Ok(Timestamped::new(raw.timestamp, value))
            })
            .collect()
    }

    pub fn count(&self, id: &MetricId) -> Result<u64> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.catalog.get(id).is_none() {
            return Err(Error::UnknownMetric(id.clone()));
        }
        let writer = Self::writer_mut(&mut state.writers, &state.catalog, id, self.segment_size);
        writer.count()
    }

    /// Deletes every record for `id` older than `before`, invalidating the
    /// cache so the next read re-derives it from disk.
    pub fn delete_history(&self, id: &MetricId, before: f64) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.catalog.get(id).is_none() {
            return Err(Error::UnknownMetric(id.clone()));
        }
        let writer = Self::writer_mut(&mut state.writers, &state.catalog, id, self.segment_size);
        writer.delete_history(before)?;
        state.cache.remove(id);
        Self::notify_delete(&state.listeners, id, before);
        Ok(())
    }

    /// Removes `id` entirely: its catalog entry, every segment, its
    /// last-value file, and any registered listeners.
    pub fn delete(&self, id: &MetricId) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.writers.remove(id);
        state.catalog.delete(id)?;
        state.cache.remove(id);
        state.listeners.per_metric_change.remove(id);
        state.listeners.per_metric_delete.remove(id);
        Ok(())
    }

    pub fn on_change(&self, id: &MetricId, listener: impl Fn(&MetricId, &Timestamped<Value>) + Send + Sync + 'static) {
        self.state.lock().listeners.per_metric_change.entry(id.clone()).or_default().push(Box::new(listener));
    }

    pub fn on_delete(&self, id: &MetricId, listener: impl Fn(&MetricId, f64) + Send + Sync + 'static) {
        self.state.lock().listeners.per_metric_delete.entry(id.clone()).or_default().push(Box::new(listener));
    }

    pub fn on_any_change(&self, listener: impl Fn(&MetricId, &Timestamped<Value>) + Send + Sync + 'static) {
        self.state.lock().listeners.global_change.push(Box::new(listener));
    }

    pub fn on_any_delete(&self, listener: impl Fn(&MetricId, f64) + Send + Sync + 'static) {
        self.state.lock().listeners.global_delete.push(Box::new(listener));
    }
}
