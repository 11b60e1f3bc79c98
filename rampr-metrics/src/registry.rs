use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricStorage, MetricUnit};
use crate::snapshot::{RegistrySnapshot, SeriesSnapshot};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: Arc<str>,
    name_id: KeyId,
    kind: MetricKind,
    unit: MetricUnit,
}

/// Concurrent store of named metrics, each split into series by tag set.
///
/// Writers hold a [`MetricHandle`] per series and update it with atomics (or
/// a short histogram lock); the registry itself is only touched when a new
/// series is created or a snapshot is taken.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, DashMap<TagSet, MetricStorage>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, or returns the existing id when it was already
    /// registered with the same kind and unit.
    pub fn register(&self, name: &str, kind: MetricKind, unit: MetricUnit) -> Result<MetricId> {
        let name_id = self.interner.get_or_intern(name);

        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs.iter().enumerate().find(|(_, d)| d.name_id == name_id) {
            if def.kind != kind {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    existing: def.kind,
                    requested: kind,
                });
            }
            if def.unit != unit {
                return Err(Error::UnitMismatch {
                    name: name.to_string(),
                    existing: def.unit,
                    requested: unit,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: Arc::from(name),
            name_id,
            kind,
            unit,
        });
        self.storage.insert(id, DashMap::new());
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<MetricId> {
        let name_id = self.interner.get(name)?;
        self.defs
            .read()
            .iter()
            .position(|d| d.name_id == name_id)
            .map(|idx| MetricId(idx as u32))
    }

    pub fn kind(&self, metric: MetricId) -> Option<MetricKind> {
        self.defs.read().get(metric.0 as usize).map(|d| d.kind)
    }

    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.get_or_intern(key)
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        let mut resolved: Vec<(KeyId, KeyId)> = tags
            .iter()
            .map(|(k, v)| (self.resolve_key(k), self.resolve_key(v)))
            .collect();
        resolved.sort_unstable();
        resolved.dedup_by_key(|(k, _)| *k);
        TagSet::from_sorted_iter(resolved)
    }

    /// Returns the writer for `(metric, tags)`, creating the series on first use.
    pub fn get_handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let series_map = self.storage.get(&metric)?;

        if let Some(storage) = series_map.get(&tags) {
            return Some(storage.handle());
        }

        let kind = self.kind(metric)?;
        let handle = series_map
            .entry(tags)
            .or_insert_with(|| MetricStorage::new(kind))
            .handle();
        Some(handle)
    }

    /// Copies every series into an immutable snapshot. Each series is read
    /// independently, so concurrent writers are never blocked for longer
    /// than one histogram clone.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let defs = self.defs.read();
        let mut series = Vec::new();

        for entry in self.storage.iter() {
            let Some(def) = defs.get(entry.key().0 as usize) else {
                continue;
            };

            for s in entry.value().iter() {
                let tags = s
                    .key()
                    .iter()
                    .map(|(k, v)| (self.resolve_string(k), self.resolve_string(v)))
                    .collect();

                series.push(SeriesSnapshot::capture(
                    def.name.clone(),
                    def.kind,
                    def.unit,
                    tags,
                    s.value(),
                ));
            }
        }

        RegistrySnapshot::new(series)
    }

    fn resolve_string(&self, id: KeyId) -> String {
        self.interner
            .resolve(id)
            .map(|s| s.to_string())
            .unwrap_or_default()
    }
}
