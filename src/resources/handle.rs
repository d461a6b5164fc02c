use crate::error::{ResourceError, Result};
use crate::resources::flags::{AtomicBehavior, AtomicStatus};
use crate::resources::{BehaviorFlags, LoadStatus, Resource, ResourcePayload, ResourceType};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use smallvec::SmallVec;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

/// Identity, metadata and exclusive owner of at most one payload
///
/// Handles form a dependency tree: `children` is the owning edge list and
/// `parent` the non-owning back-reference. Both store ids that are resolved
/// through the cache registry, never direct references.
///
/// The payload sits behind its own lock so a load thread can attach it while
/// other threads read metadata. Readers that do not take that lock must first
/// observe [`LoadStatus::Constructed`].
pub struct ResourceHandle {
    id: Uuid,
    resource_type: ResourceType,
    name: RwLock<String>,
    behavior: AtomicBehavior,
    status: AtomicStatus,
    path: RwLock<Option<PathBuf>>,
    additional_paths: RwLock<SmallVec<[PathBuf; 2]>>,
    parent: RwLock<Option<Uuid>>,
    children: RwLock<SmallVec<[Uuid; 4]>>,
    payload: RwLock<Option<ResourcePayload>>,
    /// Cost charged to the cache for the current payload
    accounted_cost: AtomicU64,
    snapshot: RwLock<Option<serde_json::Value>>,
    abort_requested: AtomicBool,
    last_error: Mutex<Option<ResourceError>>,
}

impl ResourceHandle {
    /// Create an unregistered handle with a fresh id
    pub fn new(resource_type: ResourceType) -> Self {
        Self::with_id(Uuid::new_v4(), resource_type)
    }

    /// Create an unregistered handle with a known id (snapshot reload)
    pub fn with_id(id: Uuid, resource_type: ResourceType) -> Self {
        Self {
            id,
            resource_type,
            name: RwLock::new(String::new()),
            behavior: AtomicBehavior::new(BehaviorFlags::empty()),
            status: AtomicStatus::new(),
            path: RwLock::new(None),
            additional_paths: RwLock::new(SmallVec::new()),
            parent: RwLock::new(None),
            children: RwLock::new(SmallVec::new()),
            payload: RwLock::new(None),
            accounted_cost: AtomicU64::new(0),
            snapshot: RwLock::new(None),
            abort_requested: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Create an unregistered file-backed handle named after the file stem
    pub fn with_path(path: impl Into<PathBuf>, resource_type: ResourceType) -> Self {
        let path = path.into();
        let handle = Self::new(resource_type).named(name_from_path(&path));
        *handle.path.write() = Some(path);
        handle
    }

    pub fn named(self, name: impl Into<String>) -> Self {
        *self.name.write() = name.into();
        self
    }

    pub fn with_flags(self, flags: BehaviorFlags) -> Self {
        self.behavior.set(flags);
        self
    }

    /// Attach a payload before registration; the cache charges it on insert
    pub fn with_payload(self, payload: ResourcePayload) -> Result<Self> {
        self.set_payload(payload)?;
        Ok(self)
    }

    pub fn with_snapshot(self, snapshot: serde_json::Value) -> Self {
        *self.snapshot.write() = Some(snapshot);
        self
    }

    /// Id a parent assigns to the child it produces under `name`
    ///
    /// Stable across reloads, so reloading a parent re-binds the same children.
    pub fn child_id(parent: Uuid, resource_type: ResourceType, name: &str) -> Uuid {
        Uuid::new_v5(&parent, format!("{resource_type}/{name}").as_bytes())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    /// Case-insensitive name comparison used by lookups
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.read().to_lowercase() == name.to_lowercase()
    }

    pub fn behavior_flags(&self) -> BehaviorFlags {
        self.behavior.get()
    }

    pub fn set_behavior_flags(&self, flags: BehaviorFlags) {
        self.behavior.set(flags);
    }

    pub fn is_child(&self) -> bool {
        self.behavior_flags().contains(BehaviorFlags::CHILD)
    }

    pub fn set_child(&self, child: bool) {
        self.behavior.toggle(BehaviorFlags::CHILD, child);
    }

    pub fn is_runtime_generated(&self) -> bool {
        self.behavior_flags()
            .contains(BehaviorFlags::RUNTIME_GENERATED)
    }

    pub fn set_runtime_generated(&self, generated: bool) {
        self.behavior
            .toggle(BehaviorFlags::RUNTIME_GENERATED, generated);
    }

    /// Runtime-generated handles always rebuild from their snapshot
    pub fn uses_snapshot(&self) -> bool {
        self.behavior_flags()
            .intersects(BehaviorFlags::USES_SNAPSHOT | BehaviorFlags::RUNTIME_GENERATED)
    }

    pub fn set_uses_snapshot(&self, uses: bool) {
        self.behavior.toggle(BehaviorFlags::USES_SNAPSHOT, uses);
    }

    pub fn is_core(&self) -> bool {
        self.behavior_flags().contains(BehaviorFlags::CORE)
    }

    pub fn set_core(&self, core: bool) {
        self.behavior.toggle(BehaviorFlags::CORE, core);
    }

    /// Removable and not core
    pub fn is_removable(&self) -> bool {
        let flags = self.behavior_flags();
        flags.contains(BehaviorFlags::REMOVABLE) && !flags.contains(BehaviorFlags::CORE)
    }

    pub fn is_permanent(&self) -> bool {
        !self.behavior_flags().contains(BehaviorFlags::REMOVABLE)
    }

    pub fn set_removable(&self, removable: bool) {
        self.behavior.toggle(BehaviorFlags::REMOVABLE, removable);
    }

    /// Core handles are never saved either
    pub fn is_unsaved(&self) -> bool {
        self.behavior_flags()
            .intersects(BehaviorFlags::UNSAVED | BehaviorFlags::CORE)
    }

    pub fn set_unsaved(&self, unsaved: bool) {
        self.behavior.toggle(BehaviorFlags::UNSAVED, unsaved);
    }

    pub fn status(&self) -> LoadStatus {
        self.status.load()
    }

    pub fn is_loading(&self) -> bool {
        self.status() == LoadStatus::Loading
    }

    pub fn is_constructed(&self) -> bool {
        self.status() == LoadStatus::Constructed
    }

    /// Payload missing and no load in flight
    pub fn needs_reload(&self) -> bool {
        !self.has_payload() && !self.is_loading()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }

    pub fn set_path(&self, path: impl Into<PathBuf>) {
        *self.path.write() = Some(path.into());
    }

    pub fn has_path(&self, path: &Path) -> bool {
        self.path.read().as_deref() == Some(path)
    }

    pub fn additional_paths(&self) -> Vec<PathBuf> {
        self.additional_paths.read().to_vec()
    }

    pub fn push_additional_path(&self, path: impl Into<PathBuf>) {
        self.additional_paths.write().push(path.into());
    }

    /// Primary path followed by the additional ones
    pub fn all_paths(&self) -> Vec<PathBuf> {
        self.path
            .read()
            .iter()
            .cloned()
            .chain(self.additional_paths.read().iter().cloned())
            .collect()
    }

    pub fn parent(&self) -> Option<Uuid> {
        *self.parent.read()
    }

    pub fn children(&self) -> Vec<Uuid> {
        self.children.read().to_vec()
    }

    pub fn has_child(&self, id: Uuid) -> bool {
        self.children.read().contains(&id)
    }

    /// Whether `child` lives and dies with this handle
    ///
    /// Runtime-generated parents link children manually, and runtime-generated
    /// children manage themselves; neither edge is an ownership edge.
    pub fn owns(&self, child: &ResourceHandle) -> bool {
        child.is_child()
            && child.parent() == Some(self.id)
            && !self.is_runtime_generated()
            && !child.is_runtime_generated()
    }

    /// Read access to the payload, if any
    pub fn payload(&self) -> Option<MappedRwLockReadGuard<'_, ResourcePayload>> {
        RwLockReadGuard::try_map(self.payload.read(), |p| p.as_ref()).ok()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.read().is_some()
    }

    /// Cost of the current payload, zero when empty
    pub fn cost(&self) -> u64 {
        self.payload.read().as_ref().map_or(0, |p| p.cost())
    }

    /// Cached serialized form, used when the payload cannot serialize itself
    pub fn snapshot(&self) -> Option<serde_json::Value> {
        self.snapshot.read().clone()
    }

    pub fn set_snapshot(&self, snapshot: Option<serde_json::Value>) {
        *self.snapshot.write() = snapshot;
    }

    /// Ask an in-flight load to stop at its next phase boundary
    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::Release);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }

    /// Error of the most recent failed load
    pub fn last_error(&self) -> Option<ResourceError> {
        self.last_error.lock().clone()
    }

    /// `Empty -> Loading`; any other starting state is a concurrency error
    pub(crate) fn begin_load(&self) -> Result<()> {
        self.status
            .transition(LoadStatus::Empty, LoadStatus::Loading)
            .map_err(|observed| {
                ResourceError::Concurrency(format!(
                    "cannot load {} '{}' while {observed:?}",
                    self.resource_type,
                    self.name()
                ))
            })?;
        if self.has_payload() {
            self.status.reset();
            return Err(ResourceError::Concurrency(format!(
                "{} '{}' has a payload but was not marked loaded",
                self.resource_type,
                self.name()
            )));
        }
        self.abort_requested.store(false, Ordering::Release);
        *self.last_error.lock() = None;
        Ok(())
    }

    /// Attach a payload, returning the one it replaces
    pub(crate) fn set_payload(&self, payload: ResourcePayload) -> Result<Option<ResourcePayload>> {
        if payload.resource_type() != self.resource_type {
            return Err(ResourceError::Configuration(format!(
                "cannot attach a {} payload to {} handle '{}'",
                payload.resource_type(),
                self.resource_type,
                self.name()
            )));
        }
        Ok(self.payload.write().replace(payload))
    }

    /// Run the pre-removal hook and drop the payload; status returns to `Empty`
    ///
    /// Used to roll back a failed load, so a `Loading` handle is reset too.
    pub(crate) fn unload(&self) -> Option<u64> {
        self.status.reset();
        self.drop_payload()
    }

    /// Like [`unload`](Self::unload), but leaves a loading handle untouched
    ///
    /// Returns the status that blocked the unload.
    pub(crate) fn try_unload(&self) -> std::result::Result<Option<u64>, LoadStatus> {
        self.status.settle()?;
        Ok(self.drop_payload())
    }

    fn drop_payload(&self) -> Option<u64> {
        let removed = self.payload.write().take();
        removed.map(|mut payload| {
            payload.on_removal();
            self.accounted_cost.swap(0, Ordering::AcqRel)
        })
    }

    /// Run the payload's post-construction hook and publish `Constructed`
    pub(crate) fn construct(&self, render: &dyn crate::render::RenderContext) -> Result<()> {
        if self.is_constructed() {
            return Err(ResourceError::Concurrency(format!(
                "{} '{}' is already constructed",
                self.resource_type,
                self.name()
            )));
        }
        {
            let mut slot = self.payload.write();
            let payload = slot
                .as_mut()
                .ok_or(ResourceError::PayloadMissing(self.id))?;
            payload.post_construct(render)?;
        }
        self.status
            .transition(LoadStatus::Loading, LoadStatus::Constructed)
            .map_err(|observed| {
                ResourceError::Concurrency(format!(
                    "{} '{}' finished construction while {observed:?}",
                    self.resource_type,
                    self.name()
                ))
            })
    }

    pub(crate) fn record_error(&self, err: ResourceError) {
        *self.last_error.lock() = Some(err);
    }

    pub(crate) fn set_accounted_cost(&self, cost: u64) -> u64 {
        self.accounted_cost.swap(cost, Ordering::AcqRel)
    }

    pub(crate) fn set_parent(&self, parent: Option<Uuid>) {
        *self.parent.write() = parent;
    }

    /// Record an owning edge; duplicates are a configuration error
    pub(crate) fn push_child(&self, child: Uuid) -> Result<()> {
        let mut children = self.children.write();
        if children.contains(&child) {
            return Err(ResourceError::Configuration(format!(
                "child {child} already added to '{}'",
                self.name()
            )));
        }
        children.push(child);
        Ok(())
    }

    pub(crate) fn remove_child(&self, child: Uuid) -> bool {
        let mut children = self.children.write();
        match children.iter().position(|&c| c == child) {
            Some(pos) => {
                children.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("name", &*self.name.read())
            .field("type", &self.resource_type)
            .field("flags", &self.behavior_flags())
            .field("status", &self.status())
            .field("path", &*self.path.read())
            .field("children", &self.children.read().len())
            .finish()
    }
}

pub(crate) fn name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
