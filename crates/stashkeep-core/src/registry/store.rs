//! In-memory registry of labeled containers with debounced persistence.
//!
//! The store is the only mutator of container records. Every query and
//! mutation runs synchronously under a short lock, so it is atomic with
//! respect to other tasks; persistence happens afterwards on a timer.

use super::atomic::{quarantine, read_json};
use super::flush::{DebouncedWriter, PersistStats};
use super::types::{
    normalize_label, ContainerRecord, Coord, RecordDraft, RecordSelector, RootRegistry,
    WorldKey, WorldRecords,
};
use crate::config::{RegistryConfig, StoreOptions};
use crate::{Result, StashError};
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Persistent, per-world collection of container records.
pub struct RegistryStore {
    state: Arc<RwLock<RootRegistry>>,
    writer: DebouncedWriter,
    loaded: OnceLock<()>,
}

impl RegistryStore {
    pub fn new(options: StoreOptions) -> Self {
        let state = Arc::new(RwLock::new(RootRegistry::default()));
        let writer = DebouncedWriter::new(options.path, Arc::clone(&state), options.debounce);
        Self {
            state,
            writer,
            loaded: OnceLock::new(),
        }
    }

    /// Store backed by `path` with the default debounce window.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::new(StoreOptions::new(path.as_ref()))
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Read access, loading from disk first if needed.
    fn read(&self) -> RwLockReadGuard<'_, RootRegistry> {
        self.ensure_loaded();
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write access, loading from disk first if needed. Mutating an unloaded
    /// store would otherwise persist an empty document over the file.
    fn write(&self) -> RwLockWriteGuard<'_, RootRegistry> {
        self.ensure_loaded();
        self.write_unloaded()
    }

    fn write_unloaded(&self) -> RwLockWriteGuard<'_, RootRegistry> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_loaded(&self) {
        self.loaded.get_or_init(|| self.load_from_disk());
    }

    // ========================================
    // Persistence
    // ========================================

    /// Load the registry from disk once per store.
    ///
    /// A missing file is initialised empty and written. An unreadable file is
    /// preserved next to the original and the store starts empty. Never fails.
    /// Queries and mutations load on first use too, so calling this is only
    /// needed to control when the file is read.
    pub async fn load(&self) {
        self.ensure_loaded();
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    fn load_from_disk(&self) {
        let path = self.path().to_path_buf();
        match read_json::<RootRegistry>(&path) {
            Ok(Some(mut registry)) => {
                if registry.version > RegistryConfig::SCHEMA_VERSION {
                    warn!(
                        "Registry {} has schema version {} (newer than {}); unknown fields are dropped on save",
                        path.display(),
                        registry.version,
                        RegistryConfig::SCHEMA_VERSION
                    );
                }
                registry.version = RegistryConfig::SCHEMA_VERSION;
                let count: usize = registry.worlds.values().map(|w| w.records.len()).sum();
                *self.write_unloaded() = registry;
                info!("Loaded {} container records from {}", count, path.display());
            }
            Ok(None) => {
                info!("No registry at {}, creating an empty one", path.display());
                if let Err(e) = self.writer.flush() {
                    warn!("Failed to initialise registry {}: {}", path.display(), e);
                }
            }
            Err(e) => {
                warn!("Failed to load registry {}: {}; starting empty", path.display(), e);
                if let Some(copy) = quarantine(&path) {
                    warn!("Preserved unreadable registry as {}", copy.display());
                }
            }
        }
    }

    /// Request a debounced write of the current state.
    pub fn save(&self) {
        self.ensure_loaded();
        self.writer.schedule();
    }

    /// Cancel the pending write, if any, and write now.
    ///
    /// Intended for controlled shutdown; the error is returned so the caller
    /// can report it.
    pub fn flush(&self) -> Result<()> {
        self.ensure_loaded();
        self.writer.flush()
    }

    pub fn persist_stats(&self) -> PersistStats {
        self.writer.stats()
    }

    /// A copy of the whole document.
    pub fn snapshot(&self) -> RootRegistry {
        self.read().clone()
    }

    // ========================================
    // Mutation
    // ========================================

    /// Create or merge a record.
    ///
    /// An existing record is found by case-insensitive label first, then by
    /// primary coordinate (destroyed and forbidden records included). A match
    /// takes every mutable field from `draft` and is revived; otherwise a new
    /// record is appended. Other live records occupying any of the new
    /// positions are marked destroyed. Returns the resulting record.
    pub fn upsert(&self, world: &WorldKey, draft: RecordDraft) -> Result<ContainerRecord> {
        self.upsert_retiring(world, draft).map(|(record, _)| record)
    }

    /// [`upsert`](Self::upsert), also returning the records it retired
    /// because they occupied one of the new positions.
    pub fn upsert_retiring(
        &self,
        world: &WorldKey,
        draft: RecordDraft,
    ) -> Result<(ContainerRecord, Vec<ContainerRecord>)> {
        let draft = validate_draft(draft)?;
        let normalized = normalize_label(&draft.label);
        let mut positions = draft.positions.clone();
        positions.sort();
        let primary = positions[0];
        let now = Utc::now();

        let outcome = {
            let mut state = self.write();
            let records = &mut state.worlds.entry(world.clone()).or_default().records;

            let existing = records
                .iter()
                .position(|r| r.label_matches(&normalized))
                .or_else(|| records.iter().position(|r| r.primary == primary));

            let index = match existing {
                Some(index) => {
                    let record = &mut records[index];
                    record.label = draft.label;
                    record.notes = draft.notes;
                    record.hidden = draft.hidden;
                    record.forbidden = draft.forbidden;
                    record.kind = draft.kind;
                    record.positions = positions.clone();
                    record.primary = primary;
                    record.dimension = draft.dimension;
                    record.updated_at = now;
                    record.destroyed = false;
                    debug!("Merged container record '{}' ({})", record.label, record.id);
                    index
                }
                None => {
                    let record = ContainerRecord {
                        id: uuid::Uuid::new_v4().to_string(),
                        label: draft.label,
                        notes: draft.notes,
                        hidden: draft.hidden,
                        forbidden: draft.forbidden,
                        kind: draft.kind,
                        positions: positions.clone(),
                        primary,
                        world_key: world.clone(),
                        dimension: draft.dimension,
                        created_at: now,
                        updated_at: now,
                        destroyed: false,
                    };
                    debug!("Created container record '{}' ({})", record.label, record.id);
                    records.push(record);
                    records.len() - 1
                }
            };

            let label = records[index].label.clone();
            let mut retired = Vec::new();
            for (i, other) in records.iter_mut().enumerate() {
                if i != index
                    && !other.destroyed
                    && other.positions.iter().any(|p| positions.contains(p))
                {
                    other.destroyed = true;
                    other.updated_at = now;
                    info!(
                        "Retired container record '{}': its position is now labeled '{}'",
                        other.label, label
                    );
                    retired.push(other.clone());
                }
            }

            (records[index].clone(), retired)
        };

        self.save();
        Ok(outcome)
    }

    /// Hard delete a record. Returns the removed record.
    pub fn remove(&self, world: &WorldKey, selector: &RecordSelector) -> Option<ContainerRecord> {
        let removed = {
            let mut state = self.write();
            let records = &mut state.worlds.get_mut(world)?.records;
            let index = select(records, selector)?;
            records.remove(index)
        };
        info!("Removed container record '{}' ({})", removed.label, removed.id);
        self.save();
        Some(removed)
    }

    /// Soft delete a record. Returns the updated record.
    pub fn mark_destroyed(
        &self,
        world: &WorldKey,
        selector: &RecordSelector,
    ) -> Option<ContainerRecord> {
        let record = {
            let mut state = self.write();
            let records = &mut state.worlds.get_mut(world)?.records;
            let index = select(records, selector)?;
            retire(&mut records[index])
        };
        self.save();
        Some(record)
    }

    /// Soft delete the live record occupying `coord`.
    pub fn mark_destroyed_at(&self, world: &WorldKey, coord: Coord) -> Option<ContainerRecord> {
        let record = {
            let mut state = self.write();
            let records = &mut state.worlds.get_mut(world)?.records;
            let record = records
                .iter_mut()
                .find(|r| !r.destroyed && r.occupies(coord))?;
            retire(record)
        };
        self.save();
        Some(record)
    }

    /// Hard delete every destroyed record in `world`. Returns how many went.
    pub fn purge_destroyed(&self, world: &WorldKey) -> usize {
        let purged = {
            let mut state = self.write();
            let Some(WorldRecords { records }) = state.worlds.get_mut(world) else {
                return 0;
            };
            let before = records.len();
            records.retain(|r| !r.destroyed);
            before - records.len()
        };
        if purged > 0 {
            info!("Purged {} destroyed container records in {}", purged, world);
            self.save();
        }
        purged
    }

    // ========================================
    // Queries
    // ========================================

    /// Record with this id, destroyed ones included.
    pub fn get_by_id(&self, world: &WorldKey, id: &str) -> Option<ContainerRecord> {
        self.find(world, |r| r.id == id)
    }

    /// Live record with this label (case-insensitive, trimmed).
    ///
    /// Destroyed and forbidden records are never returned.
    pub fn get_by_label(&self, world: &WorldKey, label: &str) -> Option<ContainerRecord> {
        let normalized = normalize_label(label);
        self.find(world, |r| r.is_live() && r.label_matches(&normalized))
    }

    /// Like [`get_by_label`](Self::get_by_label) but forbidden records are
    /// returned too, so policy checks can see them.
    pub fn find_label_any(&self, world: &WorldKey, label: &str) -> Option<ContainerRecord> {
        let normalized = normalize_label(label);
        self.find(world, |r| !r.destroyed && r.label_matches(&normalized))
    }

    /// Non-destroyed record with `coord` among its positions, forbidden included.
    pub fn get_by_position(&self, world: &WorldKey, coord: Coord) -> Option<ContainerRecord> {
        self.find(world, |r| !r.destroyed && r.occupies(coord))
    }

    /// Listable records: never destroyed or forbidden, hidden only on request.
    pub fn list(&self, world: &WorldKey, include_hidden: bool) -> Vec<ContainerRecord> {
        self.filter(world, |r| r.is_live() && (include_hidden || !r.hidden))
    }

    /// Every non-destroyed record, forbidden and hidden included.
    pub fn existing(&self, world: &WorldKey) -> Vec<ContainerRecord> {
        self.filter(world, |r| !r.destroyed)
    }

    /// World keys present in the registry with their record counts.
    pub fn worlds(&self) -> Vec<(WorldKey, usize)> {
        self.read()
            .worlds
            .iter()
            .map(|(key, world)| (key.clone(), world.records.len()))
            .collect()
    }

    fn find(
        &self,
        world: &WorldKey,
        predicate: impl Fn(&ContainerRecord) -> bool,
    ) -> Option<ContainerRecord> {
        self.read()
            .worlds
            .get(world)?
            .records
            .iter()
            .find(|r| predicate(r))
            .cloned()
    }

    fn filter(
        &self,
        world: &WorldKey,
        predicate: impl Fn(&ContainerRecord) -> bool,
    ) -> Vec<ContainerRecord> {
        self.read()
            .worlds
            .get(world)
            .map(|w| w.records.iter().filter(|r| predicate(r)).cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for RegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryStore")
            .field("path", &self.path())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn validate_draft(mut draft: RecordDraft) -> Result<RecordDraft> {
    draft.label = draft.label.trim().to_string();
    if draft.label.is_empty() {
        return Err(StashError::validation("label", "label must not be empty"));
    }

    draft.notes = draft
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    if !draft.kind.accepts_positions(draft.positions.len()) {
        return Err(StashError::validation(
            "positions",
            format!(
                "a {} container cannot span {} position(s)",
                draft.kind,
                draft.positions.len()
            ),
        ));
    }

    if let [a, b] = draft.positions[..] {
        if a.manhattan(b) != 1 || a.y != b.y {
            return Err(StashError::validation(
                "positions",
                format!("composite halves {} and {} are not side by side", a, b),
            ));
        }
    }

    Ok(draft)
}

/// Index of the record a selector names. Label selection prefers live records.
fn select(records: &[ContainerRecord], selector: &RecordSelector) -> Option<usize> {
    match selector {
        RecordSelector::Id(id) => records.iter().position(|r| &r.id == id),
        RecordSelector::Label(label) => {
            let normalized = normalize_label(label);
            records
                .iter()
                .position(|r| !r.destroyed && r.label_matches(&normalized))
                .or_else(|| records.iter().position(|r| r.label_matches(&normalized)))
        }
    }
}

fn retire(record: &mut ContainerRecord) -> ContainerRecord {
    if !record.destroyed {
        record.destroyed = true;
        record.updated_at = Utc::now();
        info!("Marked container record '{}' destroyed", record.label);
    }
    record.clone()
}
