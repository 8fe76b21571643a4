//! Container access coordination.
//!
//! One access runs through
//! `Resolving → PolicyCheck → (Denied | Queued) → Open → InUse → Closing → Released`.
//! Resolution and policy failures return before the container lock is
//! requested. Once a window open has been attempted, closing runs on every
//! exit path, including errors and timeouts inside the caller's operation.

use crate::cancel::CancellationToken;
use crate::classifier::{self, Bounds, Classification};
use crate::config::{CoordinatorOptions, LockScope};
use crate::lock::KeyedMutex;
use crate::registry::{
    ContainerKind, ContainerRecord, Coord, RecordDraft, RecordSelector, RegistryStore, WorldKey,
};
use crate::window::{ContainerWindow, Region, TransferDirection, TransferOutcome};
use crate::world::WorldHandle;
use crate::{Result, StashError};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a caller names a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRef {
    Label(String),
    Position(Coord),
}

impl From<Coord> for ContainerRef {
    fn from(position: Coord) -> Self {
        ContainerRef::Position(position)
    }
}

impl From<&str> for ContainerRef {
    fn from(label: &str) -> Self {
        ContainerRef::Label(label.to_string())
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerRef::Label(label) => write!(f, "'{}'", label),
            ContainerRef::Position(position) => write!(f, "{}", position),
        }
    }
}

/// A reference resolved to world geometry, with its record if registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContainer {
    pub primary: Coord,
    pub positions: Vec<Coord>,
    pub kind: ContainerKind,
    pub record: Option<ContainerRecord>,
}

impl ResolvedContainer {
    pub fn label(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.label.as_str())
    }
}

/// Metadata assigned when labeling a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelRequest {
    pub label: String,
    pub notes: Option<String>,
    pub hidden: bool,
    pub forbidden: bool,
}

impl LabelRequest {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }
}

/// A container found by a volume scan.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredContainer {
    pub classification: Classification,
    pub record: Option<ContainerRecord>,
}

/// Outcome of [`AccessCoordinator::reconcile`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Records whose blocks were inspected.
    pub checked: usize,
    /// Records whose blocks could not be observed (e.g. unloaded chunks).
    pub unobserved: usize,
    /// Records marked destroyed, because no container remains or because an
    /// updated record now covers their blocks.
    pub destroyed: Vec<ContainerRecord>,
    /// Records whose kind or positions were refreshed.
    pub updated: Vec<ContainerRecord>,
}

/// Resolves container references, enforces the forbidden policy and
/// serializes container sessions.
pub struct AccessCoordinator {
    registry: Arc<RegistryStore>,
    locks: KeyedMutex,
    options: CoordinatorOptions,
}

impl AccessCoordinator {
    pub fn new(registry: Arc<RegistryStore>, options: CoordinatorOptions) -> Self {
        Self::with_locks(registry, KeyedMutex::new(), options)
    }

    /// Coordinator sharing an existing lock manager.
    pub fn with_locks(
        registry: Arc<RegistryStore>,
        locks: KeyedMutex,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            registry,
            locks,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<RegistryStore> {
        &self.registry
    }

    pub fn locks(&self) -> &KeyedMutex {
        &self.locks
    }

    /// Lock key for a resolved container.
    pub fn lock_key(&self, world: &WorldKey, container: &ResolvedContainer) -> String {
        match &self.options.lock_scope {
            LockScope::Shared(name) => name.clone(),
            LockScope::PerContainer => {
                let p = container.primary;
                format!("{}/{},{},{}", world, p.x, p.y, p.z)
            }
        }
    }

    // ========================================
    // Resolution and policy
    // ========================================

    /// Resolve a reference and check that access is allowed.
    pub async fn resolve(
        &self,
        world: &dyn WorldHandle,
        reference: &ContainerRef,
    ) -> Result<ResolvedContainer> {
        self.registry.load().await;
        let world_key = world.world_key();

        let resolved = match reference {
            ContainerRef::Label(label) => {
                let label = label.trim();
                if label.is_empty() {
                    return Err(StashError::validation("label", "label must not be empty"));
                }
                let record = self
                    .registry
                    .find_label_any(&world_key, label)
                    .ok_or_else(|| StashError::UnknownLabel {
                        label: label.to_string(),
                    })?;
                ResolvedContainer {
                    primary: record.primary,
                    positions: record.positions.clone(),
                    kind: record.kind,
                    record: Some(record),
                }
            }
            ContainerRef::Position(position) => {
                let classification = classifier::classify(world, *position)?;
                ResolvedContainer {
                    primary: classification.primary,
                    positions: classification.positions,
                    kind: classification.kind,
                    record: None,
                }
            }
        };

        self.check_policy(&world_key, reference, resolved)
    }

    /// Deny access when any member coordinate belongs to a forbidden record.
    fn check_policy(
        &self,
        world_key: &WorldKey,
        reference: &ContainerRef,
        mut resolved: ResolvedContainer,
    ) -> Result<ResolvedContainer> {
        for position in &resolved.positions {
            let Some(record) = self.registry.get_by_position(world_key, *position) else {
                continue;
            };
            if record.forbidden {
                info!("Denied access to {} ('{}' is forbidden)", reference, record.label);
                return Err(StashError::AccessDenied {
                    target: reference.to_string(),
                });
            }
            resolved.record.get_or_insert(record);
        }

        if resolved.record.as_ref().is_some_and(|r| r.forbidden) {
            return Err(StashError::AccessDenied {
                target: reference.to_string(),
            });
        }
        Ok(resolved)
    }

    // ========================================
    // Exclusive access
    // ========================================

    /// Resolve `reference`, wait for the container lock, open the container
    /// and run `operation` on the session.
    ///
    /// ```rust,ignore
    /// let moved = coordinator
    ///     .with_container(world, "Iron Stash".into(), &cancel, |session| {
    ///         Box::pin(async move { Ok(session.deposit("iron_ingot", 64).await) })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_container<T, F>(
        &self,
        world: Arc<dyn WorldHandle>,
        reference: ContainerRef,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut ContainerSession) -> BoxFuture<'s, Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let resolved = self.resolve(world.as_ref(), &reference).await?;
        let key = self.lock_key(&world.world_key(), &resolved);
        let cancel = cancel.clone();
        let timeout = self.options.access_timeout;

        debug!("Queued access to {} on lock '{}'", reference, key);
        self.locks
            .run_exclusive(&key, move || async move {
                let mut slot = SessionSlot::new(Arc::clone(&world));
                let work = open_and_use(&world, resolved, &cancel, &mut slot, operation);
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, work).await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!("Access to {} timed out after {:?}", reference, limit);
                            Err(StashError::Timeout(limit))
                        }
                    },
                    None => work.await,
                };

                slot.close().await;
                debug!("Released access to {}", reference);
                result
            })
            .await
    }

    // ========================================
    // Metadata operations
    // ========================================

    /// Label the container at `position`, creating or merging its record.
    pub async fn label_container(
        &self,
        world: &dyn WorldHandle,
        position: Coord,
        request: LabelRequest,
    ) -> Result<ContainerRecord> {
        self.registry.load().await;
        let world_key = world.world_key();
        let classification = classifier::classify(world, position)?;

        let mut draft = RecordDraft::new(request.label, classification.kind, classification.positions)
            .hidden(request.hidden)
            .forbidden(request.forbidden);
        draft.notes = request.notes;
        draft.dimension = world_key.dimension().map(str::to_string);

        let record = self.registry.upsert(&world_key, draft)?;
        info!(
            "Labeled {} container at {} as '{}'",
            record.kind, record.primary, record.label
        );
        Ok(record)
    }

    /// Containers in `bounds` with their records. Forbidden ones are left out.
    pub async fn discover(
        &self,
        world: &dyn WorldHandle,
        bounds: Bounds,
    ) -> Result<Vec<DiscoveredContainer>> {
        self.registry.load().await;
        let world_key = world.world_key();

        let mut discovered = Vec::new();
        for classification in classifier::scan(world, bounds)? {
            let records: Vec<ContainerRecord> = classification
                .positions
                .iter()
                .filter_map(|p| self.registry.get_by_position(&world_key, *p))
                .collect();
            if records.iter().any(|r| r.forbidden) {
                continue;
            }
            discovered.push(DiscoveredContainer {
                classification,
                record: records.into_iter().next(),
            });
        }
        Ok(discovered)
    }

    /// Re-check every record of the current world against the blocks it
    /// occupies.
    ///
    /// Records whose blocks are gone are marked destroyed; records whose
    /// geometry changed (a chest gained or lost its partner) are updated.
    /// When two labeled chests merge into one double chest, the first record
    /// checked keeps the pair and the other is retired. Records whose blocks
    /// cannot be observed are left alone.
    pub async fn reconcile(&self, world: &dyn WorldHandle) -> Result<ReconcileReport> {
        self.registry.load().await;
        let world_key = world.world_key();
        let mut report = ReconcileReport::default();

        for snapshot in self.registry.existing(&world_key) {
            // Earlier updates in this pass may have retired or changed it.
            let Some(record) = self
                .registry
                .get_by_id(&world_key, &snapshot.id)
                .filter(|r| !r.destroyed)
            else {
                continue;
            };
            if record
                .positions
                .iter()
                .all(|p| world.block_name(*p).is_none())
            {
                report.unobserved += 1;
                continue;
            }
            report.checked += 1;

            let current = record
                .positions
                .iter()
                .find_map(|p| classifier::classify(world, *p).ok());

            match current {
                None => {
                    if let Some(gone) = self
                        .registry
                        .mark_destroyed(&world_key, &RecordSelector::Id(record.id.clone()))
                    {
                        report.destroyed.push(gone);
                    }
                }
                Some(c) if c.kind != record.kind || c.positions != record.positions => {
                    let mut draft = RecordDraft::new(record.label.clone(), c.kind, c.positions)
                        .hidden(record.hidden)
                        .forbidden(record.forbidden);
                    draft.notes = record.notes.clone();
                    draft.dimension = record.dimension.clone();
                    let (updated, retired) = self.registry.upsert_retiring(&world_key, draft)?;
                    report.updated.push(updated);
                    report.destroyed.extend(retired);
                }
                Some(_) => {}
            }
        }

        info!(
            "Reconciled {} records in {}: {} destroyed, {} updated, {} unobserved",
            report.checked,
            world_key,
            report.destroyed.len(),
            report.updated.len(),
            report.unobserved
        );
        Ok(report)
    }
}

impl fmt::Debug for AccessCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCoordinator")
            .field("registry", &self.registry)
            .field("locks", &self.locks)
            .field("options", &self.options)
            .finish()
    }
}

/// Holds the session of one access and guarantees its window is closed.
///
/// If the access future is dropped after an open was attempted (the caller
/// gave up or timed out around `with_container`), the close is spawned on the
/// current runtime.
struct SessionSlot {
    world: Arc<dyn WorldHandle>,
    attempted: bool,
    session: Option<ContainerSession>,
}

impl SessionSlot {
    fn new(world: Arc<dyn WorldHandle>) -> Self {
        Self {
            world,
            attempted: false,
            session: None,
        }
    }

    async fn close(&mut self) {
        if std::mem::take(&mut self.attempted) {
            close_quietly(self.world.as_ref()).await;
        }
        self.session = None;
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if !self.attempted {
            return;
        }
        let world = Arc::clone(&self.world);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Access dropped while the container was open, closing in background");
                runtime.spawn(async move { close_quietly(world.as_ref()).await });
            }
            Err(_) => warn!("Access dropped outside a runtime, container left open"),
        }
    }
}

async fn open_and_use<T, F>(
    world: &Arc<dyn WorldHandle>,
    container: ResolvedContainer,
    cancel: &CancellationToken,
    slot: &mut SessionSlot,
    operation: F,
) -> Result<T>
where
    F: for<'s> FnOnce(&'s mut ContainerSession) -> BoxFuture<'s, Result<T>>,
{
    let primary = container.primary;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StashError::Cancelled),
        approached = world.approach(primary, cancel) => approached?,
    }
    cancel.check()?;

    slot.attempted = true;
    let window = world.open_container(primary).await?;
    debug!(
        "Opened {} container at {} ({} slots)",
        container.kind,
        primary,
        window.total()
    );

    let session = slot.session.insert(ContainerSession {
        world: Arc::clone(world),
        container,
        window,
    });
    operation(session).await
}

/// Best-effort close: structured close first, generic close as fallback.
/// Errors are logged and swallowed.
async fn close_quietly(world: &dyn WorldHandle) {
    let Err(e) = world.close_container().await else {
        return;
    };
    debug!("Container close failed ({}), closing window instead", e);
    if let Err(e) = world.close_window().await {
        debug!("Window close failed: {}", e);
    }
}

/// An open container, valid for the duration of one exclusive access.
pub struct ContainerSession {
    world: Arc<dyn WorldHandle>,
    container: ResolvedContainer,
    window: ContainerWindow,
}

impl ContainerSession {
    pub fn container(&self) -> &ResolvedContainer {
        &self.container
    }

    /// Last observed window contents.
    pub fn window(&self) -> &ContainerWindow {
        &self.window
    }

    /// Item totals held by the container.
    pub fn contents(&self) -> BTreeMap<String, u32> {
        self.window.summarize(Region::Container)
    }

    pub fn free_container_slots(&self) -> usize {
        self.window.free_slots(Region::Container)
    }

    /// Re-read the window from the world.
    pub async fn refresh(&mut self) -> Result<&ContainerWindow> {
        self.window = self.world.read_window().await?;
        Ok(&self.window)
    }

    /// Move up to `count` of `item` from the inventory into the container.
    pub async fn deposit(&mut self, item: &str, count: u32) -> TransferOutcome {
        self.transfer(TransferDirection::Deposit, item, count).await
    }

    /// Move up to `count` of `item` from the container into the inventory.
    pub async fn withdraw(&mut self, item: &str, count: u32) -> TransferOutcome {
        self.transfer(TransferDirection::Withdraw, item, count).await
    }

    /// Bulk move clamped to what the source holds, unit moves when the bulk
    /// move fails. The moved count is measured from the refreshed window.
    async fn transfer(
        &mut self,
        direction: TransferDirection,
        item: &str,
        requested: u32,
    ) -> TransferOutcome {
        let source = direction.source();
        let before = self.window.count_of(source, item);
        let target = requested.min(before);
        let mut claimed = 0;

        if target > 0 {
            match self.world.transfer_bulk(direction, item, target).await {
                Ok(()) => claimed = target,
                Err(e) => {
                    debug!(
                        "Bulk {} of {} x{} failed ({}), moving units",
                        direction, item, target, e
                    );
                    // Units only top up what the bulk move provably left behind.
                    match self.moved_since(source, item, before).await {
                        Ok(moved) => {
                            claimed = moved;
                            while claimed < target {
                                if let Err(e) = self.world.transfer_unit(direction, item).await {
                                    debug!(
                                        "Unit {} of {} stopped after {}: {}",
                                        direction, item, claimed, e
                                    );
                                    break;
                                }
                                claimed += 1;
                            }
                        }
                        Err(e) => warn!(
                            "Failed to re-read window after bulk {}, skipping unit moves: {}",
                            direction, e
                        ),
                    }
                }
            }
        }

        let moved = if target == 0 {
            0
        } else {
            match self.moved_since(source, item, before).await {
                Ok(moved) => moved.min(target),
                Err(e) => {
                    warn!("Failed to re-read window after {}: {}", direction, e);
                    claimed
                }
            }
        };

        let outcome = TransferOutcome {
            item: item.to_string(),
            direction,
            requested,
            moved,
        };
        if outcome.is_complete() {
            debug!("{}", outcome);
        } else {
            info!("{}", outcome);
        }
        outcome
    }

    async fn moved_since(&mut self, source: Region, item: &str, before: u32) -> Result<u32> {
        let window = self.refresh().await?;
        Ok(before.saturating_sub(window.count_of(source, item)))
    }
}

impl fmt::Debug for ContainerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerSession")
            .field("container", &self.container)
            .field("window", &self.window)
            .finish()
    }
}
