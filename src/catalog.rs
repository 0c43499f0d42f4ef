// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::MetricId;
use crate::value::ValueType;

const CATALOG_FILE_NAME: &str = "metrics.json";

/// Everything the catalog remembers about a registered metric.
#[derive(Debug, Clone)]
pub struct MetricInfo {
    pub id: MetricId,
    pub value_type: ValueType,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// The catalog's on-disk shape for one metric: `id` nests `{ group, id }`
/// rather than flattening it, per §6's documented `metrics.json` format.
#[derive(Serialize, Deserialize)]
struct CatalogEntry {
    id: MetricId,
    #[serde(rename = "valueType")]
    value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    description: Option<String>,
}

impl From<&MetricInfo> for CatalogEntry {
    fn from(info: &MetricInfo) -> Self {
        CatalogEntry {
            id: info.id.clone(),
            value_type: info.value_type.clone(),
            name: info.name.clone(),
            description: info.description.clone(),
        }
    }
}

impl From<CatalogEntry> for MetricInfo {
    fn from(entry: CatalogEntry) -> Self {
        MetricInfo {
            id: entry.id,
            value_type: entry.value_type,
            name: entry.name,
            description: entry.description,
        }
    }
}

/// The registry of every metric known to a [`crate::storage::Storage`]
/// instance, persisted as `metrics.json` at the storage root and rewritten
/// atomically on every mutation.
pub struct Catalog {
    root_dir: PathBuf,
    entries: HashMap<MetricId, MetricInfo>,
}

impl Catalog {
    /// Loads `metrics.json` from `root_dir`, creating the directory (but not
    /// the file, which is written lazily on first mutation) if absent.
    pub fn open(root_dir: &Path) -> Result<Self> {
        fs::create_dir_all(root_dir)
            .map_err(|source| Error::OpenFailure { path: root_dir.to_path_buf(), source })?;

        let path = root_dir.join(CATALOG_FILE_NAME);
        let entries = if path.exists() {
            let data = fs::read(&path)
                .map_err(|source| Error::OpenFailure { path: path.clone(), source })?;
            let raw: Vec<CatalogEntry> = serde_json::from_slice(&data).map_err(|source| {
                Error::LogCorrupted {
                    id: MetricId::new("", ""),
                    path: path.clone(),
                    reason: format!("catalog is not valid json: {source}"),
                }
            })?;
            raw.into_iter()
                .map(MetricInfo::from)
                .map(|info| (info.id.clone(), info))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self { root_dir: root_dir.to_path_buf(), entries })
    }

    /// The directory a metric's segments, last-value file, and (eventually)
    /// any embedder-side artifacts live under.
    pub fn metric_dir(&self, id: &MetricId) -> PathBuf {
        self.root_dir.join(&id.group).join(&id.id)
    }

    /// All registered metrics, sorted by `(group, id)`.
    pub fn list(&self) -> Vec<MetricInfo> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub fn get(&self, id: &MetricId) -> Option<MetricInfo> {
        self.entries.get(id).cloned()
    }

    /// Registers `id` with `value_type` if it is new, or validates the
    /// existing registration and refreshes `name`/`description` if given.
    ///
    /// Fails with [`Error::TypeMismatch`] if `id` is already registered
    /// under a different value type.
    pub fn get_or_create(
        &mut self,
        id: &MetricId,
        value_type: ValueType,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<MetricInfo> {
        if let Some(existing) = self.entries.get(id) {
            if existing.value_type != value_type {
                return Err(Error::TypeMismatch {
                    id: id.clone(),
                    registered: existing.value_type.clone(),
                    requested: value_type,
                });
            }

            let mut updated = existing.clone();
            let mut changed = false;
            if let Some(n) = name {
                if existing.name.as_ref() != Some(&n) {
                    updated.name = Some(n);
                    changed = true;
                }
            }
            if let Some(d) = description {
                if existing.description.as_ref() != Some(&d) {
                    updated.description = Some(d);
                    changed = true;
                }
            }
            if changed {
                self.entries.insert(id.clone(), updated.clone());
                if let Err(err) = self.persist() {
                    self.entries.insert(id.clone(), existing.clone());
                    return Err(err);
                }
            }
            return Ok(updated);
        }

        let dir = self.metric_dir(id);
        fs::create_dir_all(&dir).map_err(|source| Error::OpenFailure { path: dir.clone(), source })?;

        let info = MetricInfo { id: id.clone(), value_type, name, description };
        self.entries.insert(id.clone(), info.clone());
        if let Err(err) = self.persist() {
            self.entries.remove(id);
            return Err(err);
        }
        log::debug!("catalog: registered metric {id}");
        Ok(info)
    }

    /// Removes `id`'s catalog entry and its on-disk directory.
    pub fn delete(&mut self, id: &MetricId) -> Result<()> {
        let removed = self.entries.remove(id).ok_or_else(|| Error::UnknownMetric(id.clone()))?;
        if let Err(err) = self.persist() {
            self.entries.insert(id.clone(), removed);
            return Err(err);
        }

        let dir = self.metric_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .map_err(|source| Error::DeleteFailure { path: dir.clone(), source })?;
        }
        log::debug!("catalog: deleted metric {id}");
        Ok(())
    }

    /// Rewrites `metrics.json` atomically via a temp file and rename, with
    /// keys sorted so the file stays a clean, reviewable diff across writes.
    fn persist(&self) -> Result<()> {
        let path = self.root_dir.join(CATALOG_FILE_NAME);
        let mut entries: Vec<CatalogEntry> = self.entries.values().map(CatalogEntry::from).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));

        // Round-trip through `serde_json::Value` so object keys come out
        // sorted: its default `Map` is a `BTreeMap` without the
        // `preserve_order` feature, which this crate does not enable.
        let as_value = serde_json::to_value(&entries).map_err(|source| {
            Error::WriteFailure { path: path.clone(), source: std::io::Error::new(std::io::ErrorKind::Other, source) }
        })?;
        let json = serde_json::to_vec_pretty(&as_value).map_err(|source| {
            Error::WriteFailure { path: path.clone(), source: std::io::Error::new(std::io::ErrorKind::Other, source) }
        })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &json)
            .map_err(|source| Error::WriteFailure { path: tmp_path.clone(), source })?;
        fs::rename(&tmp_path, &path)
            .map_err(|source| Error::WriteFailure { path: path.clone(), source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> MetricId {
        MetricId::new("system", "cpu-load")
    }

    #[test]
    fn get_or_create_registers_a_new_metric() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        let info = catalog
            .get_or_create(&id(), ValueType::Double, Some("CPU load".to_string()), None)
            .unwrap();
        assert_eq!(info.value_type, ValueType::Double);
        assert!(catalog.metric_dir(&id()).exists());
        assert!(dir.path().join("metrics.json").exists());
    }

    #[test]
    fn get_or_create_rejects_type_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        catalog.get_or_create(&id(), ValueType::Double, None, None).unwrap();
        let err = catalog.get_or_create(&id(), ValueType::Integer, None, None);
        assert!(matches!(err, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn catalog_reopens_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut catalog = Catalog::open(dir.path()).unwrap();
            catalog.get_or_create(&id(), ValueType::Double, None, None).unwrap();
        }
        let reopened = Catalog::open(dir.path()).unwrap();
        assert_eq!(reopened.list().len(), 1);
        assert_eq!(reopened.get(&id()).unwrap().value_type, ValueType::Double);
    }

    #[test]
    fn delete_removes_entry_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        catalog.get_or_create(&id(), ValueType::Double, None, None).unwrap();
        let metric_dir = catalog.metric_dir(&id());
        catalog.delete(&id()).unwrap();
        assert!(catalog.get(&id()).is_none());
        assert!(!metric_dir.exists());
    }

    #[test]
    fn delete_unknown_metric_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        assert!(matches!(catalog.delete(&id()), Err(Error::UnknownMetric(_))));
    }

    #[test]
    fn metrics_json_nests_the_id_per_the_documented_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        catalog.get_or_create(&id(), ValueType::Double, None, None).unwrap();

        let raw = fs::read_to_string(dir.path().join("metrics.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &parsed[0];
        assert_eq!(entry["id"]["group"], "system");
        assert_eq!(entry["id"]["id"], "cpu-load");
        assert_eq!(entry["valueType"], "double");
        assert!(entry.get("group").is_none(), "group must not be a top-level key");
    }
}
