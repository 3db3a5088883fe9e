// ── Thing Description store ──
//
// Concurrent index of every known TD, keyed by Thing id. Fed by directory
// loads and by live `td` messages; mutations bump a `watch` version so
// callers can react without polling.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hubsync_api::ThingDescription;
use tokio::sync::watch;

/// In-memory index of Thing Descriptions.
///
/// Exactly one TD per id. Entries are immutable `Arc` snapshots; an update
/// builds a merged copy and swaps it in, so readers never observe a
/// half-applied merge.
pub struct ThingStore {
    by_id: DashMap<String, Arc<ThingDescription>>,
    version: watch::Sender<u64>,
}

impl Default for ThingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThingStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            by_id: DashMap::new(),
            version,
        }
    }

    /// Insert a TD, or shallow-merge it onto the existing one with the
    /// same id. Affordance names are normalized afterwards either way.
    ///
    /// Returns the stored result.
    pub fn update(&self, td: ThingDescription) -> Arc<ThingDescription> {
        let stored = match self.by_id.entry(td.id.clone()) {
            Entry::Occupied(mut existing) => {
                let mut merged = ThingDescription::clone(existing.get());
                merged.extend(td);
                merged.normalize_names();
                let merged = Arc::new(merged);
                existing.insert(Arc::clone(&merged));
                merged
            }
            Entry::Vacant(slot) => {
                let mut td = td;
                td.normalize_names();
                let td = Arc::new(td);
                slot.insert(Arc::clone(&td));
                td
            }
        };
        self.bump_version();
        stored
    }

    pub fn get(&self, id: &str) -> Option<Arc<ThingDescription>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Snapshot of every stored TD, in no particular order.
    pub fn all(&self) -> Vec<Arc<ThingDescription>> {
        self.by_id.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Sorted list of stored ids.
    pub fn all_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_id.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Version counter, bumped on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
