//! Resource context: the object threaded through every cache operation
//!
//! A [`ResourceContext`] bundles the cache with its collaborators (scheduler,
//! decoders, byte source, render context) and exposes the factory, lookup,
//! load, post-construction and snapshot surfaces. Clones share state.

use crate::cache::{BudgetStatus, ResourceCache};
use crate::config::CacheConfig;
use crate::dispatch::{self, DrainReport, PostConstructQueue};
use crate::error::{ResourceError, Result};
use crate::event::{EventBus, ResourceEvent};
use crate::process::{fail_load, LoadProcess};
use crate::render::{HeadlessContext, RenderContext};
use crate::resources::{
    BehaviorFlags, ByteSource, DecoderRegistry, DeleteFlags, FileSystemSource, Resource,
    ResourceDecoder, ResourceHandle, ResourcePayload, ResourceStats, ResourceType,
};
use crate::scheduler::TaskScheduler;
use crate::snapshot::{CacheSnapshot, HandleSnapshot, SnapshotReload};
use crossbeam::channel::Receiver;
use parking_lot::MappedRwLockReadGuard;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub(crate) struct Shared {
    pub(crate) config: CacheConfig,
    pub(crate) cache: ResourceCache,
    pub(crate) events: Arc<EventBus>,
    pub(crate) decoders: DecoderRegistry,
    pub(crate) source: Arc<dyn ByteSource>,
    pub(crate) scheduler: Arc<dyn TaskScheduler>,
    pub(crate) render: Arc<dyn RenderContext>,
    pub(crate) queue: PostConstructQueue,
    pub(crate) shutting_down: AtomicBool,
}

/// Builder for [`ResourceContext`]
pub struct ContextBuilder {
    config: CacheConfig,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    render: Option<Arc<dyn RenderContext>>,
    source: Option<Arc<dyn ByteSource>>,
    decoders: DecoderRegistry,
    core: Vec<(String, ResourcePayload)>,
}

impl ContextBuilder {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            scheduler: None,
            render: None,
            source: None,
            decoders: DecoderRegistry::with_defaults(),
            core: Vec::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_render_context(mut self, render: Arc<dyn RenderContext>) -> Self {
        self.render = Some(render);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ByteSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_decoder(
        mut self,
        resource_type: ResourceType,
        decoder: impl ResourceDecoder + 'static,
    ) -> Self {
        self.decoders.register(resource_type, decoder);
        self
    }

    pub fn with_extension_decoder(
        mut self,
        extension: &str,
        decoder: impl ResourceDecoder + 'static,
    ) -> Self {
        self.decoders.register_extension(extension, decoder);
        self
    }

    /// Register `payload` as a core resource when the context is built
    ///
    /// Core resources are never evicted, removed, cleared or saved.
    pub fn with_core_resource(mut self, name: impl Into<String>, payload: ResourcePayload) -> Self {
        self.core.push((name.into(), payload));
        self
    }

    pub fn build(self) -> Result<ResourceContext> {
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => default_scheduler(&self.config)?,
        };
        let events = Arc::new(EventBus::new());
        let shared = Shared {
            cache: ResourceCache::new(self.config.max_cost, events.clone()),
            events,
            decoders: self.decoders,
            source: self
                .source
                .unwrap_or_else(|| Arc::new(FileSystemSource::new(".")) as Arc<dyn ByteSource>),
            scheduler,
            render: self
                .render
                .unwrap_or_else(|| Arc::new(HeadlessContext) as Arc<dyn RenderContext>),
            queue: PostConstructQueue::new(),
            shutting_down: AtomicBool::new(false),
            config: self.config,
        };
        let ctx = ResourceContext {
            shared: Arc::new(shared),
        };
        for (name, payload) in self.core {
            let handle = ctx.create_procedural(name, payload, BehaviorFlags::CORE)?;
            debug!(id = %handle.id(), name = %handle.name(), "core resource registered");
        }
        Ok(ctx)
    }
}

#[cfg(feature = "parallel")]
fn default_scheduler(config: &CacheConfig) -> Result<Arc<dyn TaskScheduler>> {
    Ok(Arc::new(crate::scheduler::RayonScheduler::new(
        config.worker_threads,
        &config.thread_name,
    )?))
}

#[cfg(not(feature = "parallel"))]
fn default_scheduler(_config: &CacheConfig) -> Result<Arc<dyn TaskScheduler>> {
    Ok(Arc::new(crate::scheduler::InlineScheduler))
}

/// Cache plus collaborators
#[derive(Clone)]
pub struct ResourceContext {
    shared: Arc<Shared>,
}

impl ResourceContext {
    /// Context with the default scheduler, a headless render context and a
    /// file system source rooted at the working directory
    pub fn new(config: CacheConfig) -> Result<Self> {
        ContextBuilder::new(config).build()
    }

    pub fn builder(config: CacheConfig) -> ContextBuilder {
        ContextBuilder::new(config)
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.shared.cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Subscribe to cache notifications
    pub fn subscribe(&self) -> Receiver<ResourceEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> ResourceStats {
        self.shared.cache.stats()
    }

    fn register(&self, handle: ResourceHandle) -> Result<Arc<ResourceHandle>> {
        let handle = Arc::new(handle);
        let _ = self.shared.cache.insert(handle.clone())?;
        Ok(handle)
    }

    /// Start loading `handle`
    ///
    /// Fails with a concurrency error when the handle is already loading or
    /// constructed, is not registered, or the context is shutting down.
    pub fn load(&self, handle: &Arc<ResourceHandle>) -> Result<()> {
        LoadProcess::start(&self.shared, handle)
    }

    /// Attach a payload to a handle that is not yet constructed
    pub fn attach_payload(&self, handle: &Arc<ResourceHandle>, payload: ResourcePayload) -> Result<()> {
        if handle.is_constructed() {
            return Err(ResourceError::Concurrency(format!(
                "'{}' is constructed; unload it before attaching a new payload",
                handle.name()
            )));
        }
        self.shared.cache.attach_payload(handle, payload)
    }

    /// Register a runtime-generated handle around an existing payload
    ///
    /// Post-construction runs right away when the render context is current
    /// on this thread, otherwise the handle waits in the post-construction
    /// queue. A budget overrun is logged; [`ResourceCache::enforce_budget`]
    /// reports it.
    pub fn create_procedural(
        &self,
        name: impl Into<String>,
        payload: ResourcePayload,
        flags: BehaviorFlags,
    ) -> Result<Arc<ResourceHandle>> {
        let handle = self.register(
            ResourceHandle::new(payload.resource_type())
                .named(name)
                .with_flags(flags | BehaviorFlags::RUNTIME_GENERATED),
        )?;

        handle.begin_load()?;
        let top_level = !handle.is_child();
        if top_level {
            self.shared.cache.increment_load_count();
        }
        if let Err(err) = self.shared.cache.attach_payload(&handle, payload) {
            fail_load(&self.shared, &handle, top_level, err.clone());
            return Err(err);
        }

        if self.shared.render.is_current() {
            let _ = dispatch::finish_root(&self.shared, &handle)?;
        } else {
            self.shared.queue.push(handle.clone());
        }
        Ok(handle)
    }

    /// Existing top-level handle for `path`, or a new one that starts loading
    ///
    /// An existing handle of another type is a configuration error; differing
    /// flags are overwritten.
    pub fn guarantee_with_path(
        &self,
        path: impl Into<PathBuf>,
        resource_type: ResourceType,
        flags: BehaviorFlags,
    ) -> Result<Arc<ResourceHandle>> {
        self.guarantee_with_paths(&[path.into()], resource_type, flags)
    }

    /// Multi-file variant of [`Self::guarantee_with_path`], keyed by the first
    /// path. Only shader programs are built from several files.
    pub fn guarantee_with_paths(
        &self,
        paths: &[PathBuf],
        resource_type: ResourceType,
        flags: BehaviorFlags,
    ) -> Result<Arc<ResourceHandle>> {
        let Some((primary, rest)) = paths.split_first() else {
            return Err(ResourceError::Configuration(
                "guarantee needs at least one path".to_string(),
            ));
        };
        if !rest.is_empty() && resource_type != ResourceType::ShaderProgram {
            return Err(ResourceError::Configuration(format!(
                "{resource_type} cannot be built from multiple files"
            )));
        }

        if let Some(existing) = self.shared.cache.get_top_level_by_path(primary) {
            if existing.resource_type() != resource_type {
                return Err(ResourceError::Configuration(format!(
                    "{} is already loaded as a {}, not a {resource_type}",
                    primary.display(),
                    existing.resource_type()
                )));
            }
            let child_bit = existing.behavior_flags() & BehaviorFlags::CHILD;
            if existing.behavior_flags() != flags | child_bit {
                existing.set_behavior_flags(flags | child_bit);
            }
            self.shared.cache.touch(&existing);
            if existing.needs_reload() {
                self.load(&existing)?;
            }
            return Ok(existing);
        }

        let handle = ResourceHandle::create_with_flags(self, primary.clone(), resource_type, flags)?;
        for path in rest {
            handle.push_additional_path(path.clone());
        }
        self.load(&handle)?;
        Ok(handle)
    }

    /// Drain the post-construction queue on the calling thread
    pub fn drain_post_construction(&self) -> Result<DrainReport> {
        dispatch::drain(&self.shared)
    }

    /// Drain until nothing is in flight or `timeout` elapses
    pub fn pump(&self, timeout: Duration) -> Result<DrainReport> {
        dispatch::pump(&self.shared, timeout)
    }

    /// Post-construct one loading root handle right now
    pub fn post_construct(&self, handle: &Arc<ResourceHandle>) -> Result<BudgetStatus> {
        dispatch::post_construct(&self.shared, handle)
    }

    pub fn pending_post_construction(&self) -> usize {
        self.shared.queue.len()
    }

    /// Payload of a constructed handle
    ///
    /// A handle that needs a reload emits [`ResourceEvent::NeedsReload`] and
    /// yields nothing.
    pub fn payload<'a>(
        &self,
        handle: &'a ResourceHandle,
    ) -> Option<MappedRwLockReadGuard<'a, ResourcePayload>> {
        if handle.needs_reload() {
            self.shared
                .events
                .publish(ResourceEvent::NeedsReload(handle.id()));
            return None;
        }
        if !handle.is_constructed() {
            return None;
        }
        self.shared.cache.touch(handle);
        handle.payload()
    }

    pub fn remove(&self, handle: &ResourceHandle, flags: DeleteFlags) -> bool {
        self.shared.cache.remove(handle, flags)
    }

    pub fn clear(&self) -> Result<()> {
        self.shared.cache.clear()
    }

    pub fn get_by_uuid(&self, id: Uuid) -> Option<Arc<ResourceHandle>> {
        self.shared.cache.get_by_uuid(id)
    }

    pub fn get_by_name_and_type(&self, name: &str, ty: ResourceType) -> Option<Arc<ResourceHandle>> {
        self.shared.cache.get_by_name_and_type(name, ty)
    }

    pub fn get_top_level_by_path(&self, path: impl AsRef<Path>) -> Option<Arc<ResourceHandle>> {
        self.shared.cache.get_top_level_by_path(path.as_ref())
    }

    pub fn add_child(&self, parent: &ResourceHandle, child: &ResourceHandle) -> Result<()> {
        self.shared.cache.add_child(parent, child)
    }

    pub fn child_by_id(&self, parent: &ResourceHandle, id: Uuid) -> Option<Arc<ResourceHandle>> {
        if parent.has_child(id) {
            self.shared.cache.get(id)
        } else {
            None
        }
    }

    pub fn child_by_name(
        &self,
        parent: &ResourceHandle,
        name: &str,
        ty: ResourceType,
    ) -> Option<Arc<ResourceHandle>> {
        parent
            .children()
            .into_iter()
            .filter_map(|id| self.shared.cache.get(id))
            .find(|child| child.resource_type() == ty && child.name_matches(name))
    }

    pub fn children_of_type(&self, parent: &ResourceHandle, ty: ResourceType) -> Vec<Arc<ResourceHandle>> {
        parent
            .children()
            .into_iter()
            .filter_map(|id| self.shared.cache.get(id))
            .filter(|child| child.resource_type() == ty)
            .collect()
    }

    /// Give every dependency-owned descendant the path of `handle`
    pub fn set_child_paths(&self, handle: &ResourceHandle) {
        let Some(path) = handle.path() else {
            return;
        };
        for child in handle
            .children()
            .into_iter()
            .filter_map(|id| self.shared.cache.get(id))
        {
            if handle.owns(&child) {
                child.set_path(path.clone());
                self.set_child_paths(&child);
            }
        }
    }

    /// Snapshot of every saveable handle, sorted by name
    ///
    /// Skips unsaved and core handles and dependency-owned children, which
    /// their parent's reload recreates.
    pub fn serialize(&self) -> Result<CacheSnapshot> {
        let cache = &self.shared.cache;
        if cache.in_flight() > 0 {
            return Err(ResourceError::Concurrency(
                "cannot serialize the cache while loads are in flight".to_string(),
            ));
        }

        let mut resources: Vec<_> = cache
            .handles()
            .iter()
            .filter(|h| !h.is_unsaved() && cache.owner_of(h).is_none())
            .map(|h| HandleSnapshot::capture(h))
            .collect();
        resources.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(CacheSnapshot {
            resources,
            max_cost_budget: cache.max_cost(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        self.serialize()?.to_json(self.shared.config.pretty_snapshots)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|e| {
            ResourceError::Io(format!("Failed to write snapshot {}: {e}", path.display()))
        })
    }

    /// Recreate the handles of `snapshot` in dependency order and start
    /// loading every one that can be rebuilt
    ///
    /// The snapshot's budget replaces the current one; the report carries the
    /// outcome of evicting down to it.
    pub fn load_snapshot(&self, mut snapshot: CacheSnapshot) -> Result<SnapshotReload> {
        snapshot.sort_for_reload();
        let budget = self.shared.cache.set_max_cost(snapshot.max_cost_budget);

        let mut handles = Vec::with_capacity(snapshot.resources.len());
        for entry in &snapshot.resources {
            let handle = ResourceHandle::create_from_snapshot(self, entry)?;
            if entry.is_loadable() {
                self.load(&handle)?;
            }
            handles.push(handle);
        }
        info!(count = handles.len(), ?budget, "snapshot reloaded");
        Ok(SnapshotReload { handles, budget })
    }

    pub fn load_json(&self, json: &str) -> Result<SnapshotReload> {
        self.load_snapshot(CacheSnapshot::from_json(json)?)
    }

    pub fn load_from_path(&self, path: impl AsRef<Path>) -> Result<SnapshotReload> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ResourceError::Io(format!("Failed to read snapshot {}: {e}", path.display()))
        })?;
        self.load_json(&json)
    }

    /// Refuse new loads and ask in-flight ones to stop at their next phase
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let loading: Vec<_> = self
            .shared
            .cache
            .handles()
            .into_iter()
            .filter(|h| h.is_loading())
            .collect();
        for handle in &loading {
            handle.request_abort();
        }
        debug!(aborted = loading.len(), "resource context shutting down");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }
}

impl ResourceHandle {
    /// Register a new handle with no path
    pub fn create(ctx: &ResourceContext, resource_type: ResourceType) -> Result<Arc<Self>> {
        ctx.register(ResourceHandle::new(resource_type).with_flags(BehaviorFlags::REMOVABLE))
    }

    /// Register a new removable handle backed by `path`
    pub fn create_with_path(
        ctx: &ResourceContext,
        path: impl Into<PathBuf>,
        resource_type: ResourceType,
    ) -> Result<Arc<Self>> {
        Self::create_with_flags(ctx, path, resource_type, BehaviorFlags::REMOVABLE)
    }

    /// Register a new handle backed by `path` with explicit flags
    pub fn create_with_flags(
        ctx: &ResourceContext,
        path: impl Into<PathBuf>,
        resource_type: ResourceType,
        flags: BehaviorFlags,
    ) -> Result<Arc<Self>> {
        ctx.register(ResourceHandle::with_path(path, resource_type).with_flags(flags))
    }

    /// Register a handle recreated from a snapshot entry
    ///
    /// The id must not be registered already.
    pub fn create_from_snapshot(ctx: &ResourceContext, entry: &HandleSnapshot) -> Result<Arc<Self>> {
        if ctx.cache().get(entry.id).is_some() {
            return Err(ResourceError::Configuration(format!(
                "snapshot entry '{}' ({}) is already registered",
                entry.name, entry.id
            )));
        }
        ctx.register(entry.to_handle())
    }
}
