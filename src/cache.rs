//! Cost-bounded registry of resource handles
//!
//! One registry lock guards the id index, the handle arena, the MRU list and
//! the cost total. The in-flight load counter sits behind its own lock so load
//! threads can report progress without contending with lookups.
//!
//! Lock order is registry, then a handle's payload lock. Nothing holding a
//! payload lock calls back into the cache.

use crate::error::{corrupted, ResourceError, Result};
use crate::event::{EventBus, ResourceEvent};
use crate::resources::{DeleteFlags, ResourceHandle, ResourcePayload, ResourceStats, ResourceType};
use ahash::AHashMap;
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use slotmap::SlotMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

slotmap::new_key_type! {
    struct HandleKey;
}

/// Outcome of [`ResourceCache::insert`]
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertStatus {
    /// Registered, within budget
    Inserted,
    /// Already registered; moved to the front of the MRU list instead
    Touched,
    /// Registered, but eviction could not bring the cost under budget
    OverBudget { current: u64, max: u64 },
}

impl InsertStatus {
    pub fn is_over_budget(&self) -> bool {
        matches!(self, InsertStatus::OverBudget { .. })
    }
}

/// Outcome of a budget enforcement pass
#[must_use]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BudgetStatus {
    #[default]
    WithinBudget,
    OverBudget { current: u64, max: u64 },
}

/// How far [`Registry::unload_tree`] tears a subtree down
#[derive(Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Drop payloads; refused while the root is loading
    Unload,
    /// Drop payloads and handles; refused while the root is loading
    Delete,
    /// Roll back a failed load, silently
    Reset,
}

struct Registry {
    handles: SlotMap<HandleKey, Arc<ResourceHandle>>,
    index: AHashMap<Uuid, HandleKey>,
    /// Top-level handles only, most recent first
    mru: LruCache<HandleKey, ()>,
    current_cost: u64,
    stats: ResourceStats,
    /// Published once the registry lock is released
    pending: Vec<ResourceEvent>,
}

impl Registry {
    fn get(&self, id: Uuid) -> Option<&Arc<ResourceHandle>> {
        self.index.get(&id).map(|&key| &self.handles[key])
    }

    fn add_cost(&mut self, cost: u64) {
        self.current_cost = self
            .current_cost
            .checked_add(cost)
            .unwrap_or_else(|| corrupted("accounted cost overflowed"));
    }

    fn sub_cost(&mut self, cost: u64) {
        self.current_cost = self
            .current_cost
            .checked_sub(cost)
            .unwrap_or_else(|| corrupted("accounted cost went negative"));
    }

    /// Bring the accounted cost of `handle` in line with its payload
    fn account(&mut self, handle: &ResourceHandle) {
        let cost = handle.cost();
        let previous = handle.set_accounted_cost(cost);
        self.sub_cost(previous);
        self.add_cost(cost);
    }

    /// Parent that owns `handle`, if any
    fn owner_of(&self, handle: &ResourceHandle) -> Option<&Arc<ResourceHandle>> {
        handle
            .parent()
            .and_then(|parent| self.get(parent))
            .filter(|parent| parent.owns(handle))
    }

    /// Whether `handle` or anything it owns is core
    fn holds_core(&self, handle: &ResourceHandle) -> bool {
        handle.is_core()
            || handle.children().into_iter().any(|id| {
                self.get(id)
                    .is_some_and(|child| handle.owns(child) && self.holds_core(child))
            })
    }

    /// Unload `handle`, then its dependency-owned children
    ///
    /// Except for [`Teardown::Reset`] the root moves to `Empty` by
    /// compare-and-swap, so a load that started concurrently wins and nothing
    /// is torn down. Returns whether the teardown happened.
    fn unload_tree(&mut self, handle: &Arc<ResourceHandle>, teardown: Teardown) -> bool {
        let unloaded = match teardown {
            Teardown::Reset => handle.unload(),
            Teardown::Unload | Teardown::Delete => match handle.try_unload() {
                Ok(cost) => cost,
                Err(status) => {
                    debug!(name = %handle.name(), ?status, "resource busy, not unloading");
                    return false;
                }
            },
        };
        self.finish_teardown(handle, unloaded, teardown);
        true
    }

    fn finish_teardown(
        &mut self,
        handle: &Arc<ResourceHandle>,
        unloaded: Option<u64>,
        teardown: Teardown,
    ) {
        let delete = teardown == Teardown::Delete;
        let mut dropped = false;
        if let Some(cost) = unloaded {
            self.sub_cost(cost);
            dropped = true;
        }

        for child_id in handle.children() {
            let Some(child) = self.get(child_id).cloned() else {
                continue;
            };
            if handle.owns(&child) {
                let unloaded = child.unload();
                self.finish_teardown(&child, unloaded, teardown);
            } else if delete {
                child.set_parent(None);
            }
        }

        if delete {
            if let Some(key) = self.index.remove(&handle.id()) {
                self.handles.remove(key);
                self.mru.pop(&key);
                dropped = true;
            }
            if let Some(parent) = handle.parent().and_then(|p| self.get(p)) {
                parent.remove_child(handle.id());
            }
        }

        if dropped && teardown != Teardown::Reset {
            self.pending.push(ResourceEvent::Deleted(handle.id()));
        }
    }

    fn is_evictable(&self, key: HandleKey) -> bool {
        let handle = &self.handles[key];
        handle.is_removable()
            && !handle.is_loading()
            && handle.has_payload()
            && !self.holds_core(handle)
    }

    /// Evict oldest-first until within `max_cost`, never touching `protect`
    fn evict(&mut self, max_cost: u64, protect: Option<HandleKey>) -> BudgetStatus {
        while self.current_cost > max_cost {
            let victim = self
                .mru
                .iter()
                .rev()
                .map(|(&key, _)| key)
                .find(|&key| Some(key) != protect && self.is_evictable(key));

            let Some(key) = victim else {
                warn!(
                    current = self.current_cost,
                    max = max_cost,
                    "resource cache over budget, nothing left to evict"
                );
                return BudgetStatus::OverBudget {
                    current: self.current_cost,
                    max: max_cost,
                };
            };

            let handle = self.handles[key].clone();
            let before = self.current_cost;
            if !self.unload_tree(&handle, Teardown::Unload) {
                continue;
            }
            self.stats.evictions += 1;
            debug!(
                id = %handle.id(),
                name = %handle.name(),
                freed = before - self.current_cost,
                "evicted resource"
            );
        }
        BudgetStatus::WithinBudget
    }
}

/// Registry of every handle plus the MRU ordering and cost budget
pub struct ResourceCache {
    registry: Mutex<Registry>,
    max_cost: AtomicU64,
    in_flight: Mutex<usize>,
    events: Arc<EventBus>,
}

impl ResourceCache {
    pub fn new(max_cost: u64, events: Arc<EventBus>) -> Self {
        Self {
            registry: Mutex::new(Registry {
                handles: SlotMap::with_key(),
                index: AHashMap::new(),
                mru: LruCache::unbounded(),
                current_cost: 0,
                stats: ResourceStats::new(),
                pending: Vec::new(),
            }),
            max_cost: AtomicU64::new(max_cost),
            in_flight: Mutex::new(0),
            events,
        }
    }

    fn release(&self, mut registry: MutexGuard<'_, Registry>) {
        let events = std::mem::take(&mut registry.pending);
        drop(registry);
        for event in events {
            self.events.publish(event);
        }
    }

    /// Register a handle, or touch it if its id is already registered
    ///
    /// A handle that already carries a payload is charged for it, and the
    /// cache evicts from the back of the MRU list to get back under budget.
    /// The new handle itself is never evicted by its own insert.
    pub fn insert(&self, handle: Arc<ResourceHandle>) -> Result<InsertStatus> {
        let id = handle.id();
        if id.is_nil() {
            return Err(ResourceError::Configuration(format!(
                "{} '{}' registered without an id",
                handle.resource_type(),
                handle.name()
            )));
        }

        let mut registry = self.registry.lock();
        if let Some(existing) = registry.get(id) {
            if !Arc::ptr_eq(existing, &handle) {
                corrupted(&format!("id {id} is already registered to another handle"));
            }
            let key = registry.index[&id];
            registry.mru.promote(&key);
            return Ok(InsertStatus::Touched);
        }

        let key = registry.handles.insert(handle.clone());
        registry.index.insert(id, key);
        if !handle.is_child() {
            registry.mru.put(key, ());
        }
        registry.pending.push(ResourceEvent::Added(id));

        let mut status = InsertStatus::Inserted;
        if handle.has_payload() {
            registry.account(&handle);
            if let BudgetStatus::OverBudget { current, max } =
                registry.evict(self.max_cost(), Some(key))
            {
                status = InsertStatus::OverBudget { current, max };
            }
        }

        self.release(registry);
        Ok(status)
    }

    /// Attach a payload to `handle`, charging its cost if registered
    pub(crate) fn attach_payload(
        &self,
        handle: &Arc<ResourceHandle>,
        payload: ResourcePayload,
    ) -> Result<()> {
        let mut registry = self.registry.lock();
        let replaced = handle.set_payload(payload)?;
        if let Some(mut old) = replaced {
            crate::resources::Resource::on_removal(&mut old);
        }
        if registry.get(handle.id()).is_some_and(|h| Arc::ptr_eq(h, handle)) {
            registry.account(handle);
        }
        drop(registry);
        Ok(())
    }

    /// Move a top-level handle to the front of the MRU list
    pub fn touch(&self, handle: &ResourceHandle) {
        if handle.is_child() {
            return;
        }
        let mut registry = self.registry.lock();
        if let Some(&key) = registry.index.get(&handle.id()) {
            registry.mru.promote(&key);
        }
    }

    /// Unload `handle` and its dependency-owned children
    ///
    /// Refuses core handles and anything owning one, non-removable handles
    /// without [`DeleteFlags::FORCE`], handles that are loading and children
    /// owned by a parent. With [`DeleteFlags::DELETE_HANDLE`] the subtree also
    /// leaves the registry.
    pub fn remove(&self, handle: &ResourceHandle, flags: DeleteFlags) -> bool {
        if handle.is_permanent() && !flags.contains(DeleteFlags::FORCE) {
            debug!(name = %handle.name(), "refusing to remove permanent resource");
            return false;
        }

        let mut registry = self.registry.lock();
        let Some(registered) = registry.get(handle.id()).cloned() else {
            return false;
        };
        if registry.holds_core(&registered) {
            debug!(name = %handle.name(), "refusing to remove core resource");
            return false;
        }
        if registry.owner_of(&registered).is_some() {
            debug!(name = %handle.name(), "refusing to remove dependency-owned resource");
            return false;
        }

        let teardown = if flags.contains(DeleteFlags::DELETE_HANDLE) {
            Teardown::Delete
        } else {
            Teardown::Unload
        };
        let removed = registry.unload_tree(&registered, teardown);
        self.release(registry);
        removed
    }

    /// Drop the payloads of a failed load's subtree without notifying
    pub(crate) fn reset_tree(&self, handle: &Arc<ResourceHandle>) {
        let mut registry = self.registry.lock();
        registry.unload_tree(handle, Teardown::Reset);
    }

    /// Unload and delete every handle that is not core and owns nothing core
    pub fn clear(&self) -> Result<()> {
        if self.in_flight() > 0 {
            return Err(ResourceError::Concurrency(
                "cannot clear the cache while loads are in flight".to_string(),
            ));
        }

        let mut registry = self.registry.lock();
        let roots: Vec<_> = registry
            .handles
            .values()
            .filter(|h| registry.owner_of(h).is_none() && !registry.holds_core(h))
            .cloned()
            .collect();
        for handle in roots {
            if registry.get(handle.id()).is_some() {
                registry.unload_tree(&handle, Teardown::Delete);
            }
        }
        self.release(registry);
        Ok(())
    }

    /// Whether no removable top-level handle is left
    pub fn cleared_removable(&self) -> bool {
        let registry = self.registry.lock();
        registry
            .mru
            .iter()
            .all(|(&key, _)| !registry.handles[key].is_removable())
    }

    /// Evict down to the budget
    pub fn enforce_budget(&self) -> BudgetStatus {
        self.enforce_budget_protecting(None)
    }

    pub(crate) fn enforce_budget_protecting(&self, protect: Option<&ResourceHandle>) -> BudgetStatus {
        let mut registry = self.registry.lock();
        let protect = protect.and_then(|h| registry.index.get(&h.id()).copied());
        let status = registry.evict(self.max_cost(), protect);
        self.release(registry);
        status
    }

    pub fn set_max_cost(&self, max_cost: u64) -> BudgetStatus {
        self.max_cost.store(max_cost, Ordering::Release);
        self.enforce_budget()
    }

    pub fn max_cost(&self) -> u64 {
        self.max_cost.load(Ordering::Acquire)
    }

    pub fn current_cost(&self) -> u64 {
        self.registry.lock().current_cost
    }

    /// Cost as a fraction of the budget
    pub fn utilization(&self) -> f32 {
        let max = self.max_cost();
        if max == 0 {
            0.0
        } else {
            self.current_cost() as f32 / max as f32
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<ResourceHandle>> {
        self.registry.lock().get(id).cloned()
    }

    pub fn contains(&self, handle: &Arc<ResourceHandle>) -> bool {
        self.registry
            .lock()
            .get(handle.id())
            .is_some_and(|h| Arc::ptr_eq(h, handle))
    }

    fn record_lookup(&self, registry: &mut Registry, found: bool) {
        if found {
            registry.stats.hits += 1;
        } else {
            registry.stats.misses += 1;
        }
    }

    pub fn get_by_uuid(&self, id: Uuid) -> Option<Arc<ResourceHandle>> {
        let mut registry = self.registry.lock();
        let found = registry.get(id).cloned();
        self.record_lookup(&mut registry, found.is_some());
        found
    }

    /// Case-insensitive lookup by name within one type
    pub fn get_by_name_and_type(&self, name: &str, ty: ResourceType) -> Option<Arc<ResourceHandle>> {
        let mut registry = self.registry.lock();
        let found = registry
            .handles
            .values()
            .find(|h| h.resource_type() == ty && h.name_matches(name))
            .cloned();
        self.record_lookup(&mut registry, found.is_some());
        found
    }

    /// Lookup of a non-child handle by its primary path
    pub fn get_top_level_by_path(&self, path: &Path) -> Option<Arc<ResourceHandle>> {
        let mut registry = self.registry.lock();
        let found = registry
            .handles
            .values()
            .find(|h| !h.is_child() && h.has_path(path))
            .cloned();
        self.record_lookup(&mut registry, found.is_some());
        found
    }

    /// Parent that owns `handle`, if any
    pub fn owner_of(&self, handle: &ResourceHandle) -> Option<Arc<ResourceHandle>> {
        self.registry.lock().owner_of(handle).cloned()
    }

    /// Link `child` under `parent`
    ///
    /// A child handle leaves the MRU list: from now on it is evicted with
    /// its parent. Links that would close a cycle are rejected.
    pub fn add_child(&self, parent: &ResourceHandle, child: &ResourceHandle) -> Result<()> {
        if parent.id() == child.id() {
            return Err(ResourceError::Configuration(format!(
                "'{}' cannot be its own child",
                parent.name()
            )));
        }
        if let Some(existing) = child.parent() {
            if existing != parent.id() {
                return Err(ResourceError::Configuration(format!(
                    "'{}' already has parent {existing}",
                    child.name()
                )));
            }
        }

        let mut registry = self.registry.lock();
        let mut ancestor = parent.parent();
        while let Some(id) = ancestor {
            if id == child.id() {
                return Err(ResourceError::Configuration(format!(
                    "'{}' is an ancestor of '{}'",
                    child.name(),
                    parent.name()
                )));
            }
            ancestor = registry.get(id).and_then(|h| h.parent());
        }
        parent.push_child(child.id())?;
        child.set_parent(Some(parent.id()));
        if child.is_child() {
            if let Some(&key) = registry.index.get(&child.id()) {
                registry.mru.pop(&key);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.registry.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().handles.is_empty()
    }

    pub fn handles(&self) -> Vec<Arc<ResourceHandle>> {
        self.registry.lock().handles.values().cloned().collect()
    }

    /// Ids of top-level handles, most recently used first
    pub fn mru_ids(&self) -> Vec<Uuid> {
        let registry = self.registry.lock();
        registry
            .mru
            .iter()
            .map(|(&key, _)| registry.handles[key].id())
            .collect()
    }

    pub fn stats(&self) -> ResourceStats {
        self.registry.lock().stats.clone()
    }

    pub(crate) fn record_load(&self) {
        self.registry.lock().stats.loads += 1;
    }

    pub(crate) fn record_failure(&self) {
        self.registry.lock().stats.failures += 1;
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    pub fn increment_load_count(&self) {
        let mut count = self.in_flight.lock();
        *count += 1;
        if *count == 1 {
            self.events.publish(ResourceEvent::StartedLoading);
        }
    }

    pub fn decrement_load_count(&self) {
        let mut count = self.in_flight.lock();
        *count = count
            .checked_sub(1)
            .unwrap_or_else(|| corrupted("load count went negative"));
        if *count == 0 {
            self.events.publish(ResourceEvent::DoneLoading);
        }
    }
}
