//! Asynchronous load processes
//!
//! A process moves one handle from `Loading` to "payload attached, queued for
//! post-construction". `on_init` decodes, `on_success` attaches the payload
//! and its children, `fail_load` reverts everything. Abort requests are only
//! honored between phases.

use crate::context::Shared;
use crate::error::{ResourceError, Result};
use crate::event::ResourceEvent;
use crate::resources::{BehaviorFlags, DecodeContext, Decoded, Resource, ResourceHandle};
use crate::scheduler::halt_unwinding;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info};

pub(crate) struct LoadProcess {
    shared: Arc<Shared>,
    handle: Arc<ResourceHandle>,
    top_level: bool,
}

impl LoadProcess {
    /// Claim `handle` for loading and dispatch the process
    ///
    /// Types bound to an exclusive context run `on_init` here, on the calling
    /// thread; an init failure is returned directly. Everything else runs on
    /// the scheduler and reports failure through events.
    pub(crate) fn start(shared: &Arc<Shared>, handle: &Arc<ResourceHandle>) -> Result<()> {
        if shared.shutting_down.load(Ordering::Acquire) {
            return Err(ResourceError::Concurrency(
                "resource context is shutting down".to_string(),
            ));
        }
        if !shared.cache.contains(handle) {
            return Err(ResourceError::Concurrency(format!(
                "{} '{}' is not registered with the cache",
                handle.resource_type(),
                handle.name()
            )));
        }

        handle.begin_load()?;
        let top_level = !handle.is_child();
        if top_level {
            shared.cache.increment_load_count();
        }
        shared.cache.record_load();

        let process = LoadProcess {
            shared: shared.clone(),
            handle: handle.clone(),
            top_level,
        };

        if handle.resource_type().requires_context_thread() {
            debug!(name = %handle.name(), ty = %handle.resource_type(), "running init on calling thread");
            match process.on_init() {
                Ok(decoded) => {
                    shared
                        .scheduler
                        .submit(Box::new(move || process.finish(Ok(decoded))));
                    Ok(())
                }
                Err(err) => {
                    process.fail(err.clone());
                    Err(err)
                }
            }
        } else {
            debug!(name = %handle.name(), ty = %handle.resource_type(), "queued load");
            shared.scheduler.submit(Box::new(move || {
                let decoded = process.on_init();
                process.finish(decoded);
            }));
            Ok(())
        }
    }

    fn aborted(&self) -> bool {
        self.handle.abort_requested() || self.shared.shutting_down.load(Ordering::Acquire)
    }

    fn on_init(&self) -> Result<Decoded> {
        if self.aborted() {
            return Err(ResourceError::Aborted(self.handle.id()));
        }
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("load", name = %self.handle.name()).entered();

        let name = self.handle.name();
        let paths = self.handle.all_paths();
        let snapshot = self.handle.snapshot();
        let ctx = DecodeContext {
            name: &name,
            resource_type: self.handle.resource_type(),
            paths: &paths,
            snapshot: snapshot.as_ref(),
            source: self.shared.source.as_ref(),
        };
        halt_unwinding(|| {
            self.shared
                .decoders
                .decode(&ctx, self.handle.uses_snapshot())
        })
    }

    /// Attach the payload and children, then queue for post-construction
    fn on_success(&self, decoded: Decoded) -> Result<()> {
        if self.aborted() {
            return Err(ResourceError::Aborted(self.handle.id()));
        }
        let cache = &self.shared.cache;
        let handle = &self.handle;
        cache.attach_payload(handle, decoded.payload)?;

        for produced in decoded.children {
            let ty = produced.payload.resource_type();
            let id = ResourceHandle::child_id(handle.id(), ty, &produced.name);
            let child = match cache.get(id) {
                Some(existing) => existing,
                None => {
                    let child = Arc::new(
                        ResourceHandle::with_id(id, ty)
                            .named(produced.name)
                            .with_flags(BehaviorFlags::CHILD | produced.flags),
                    );
                    let _ = cache.insert(child.clone())?;
                    child
                }
            };
            if child.path().is_none() {
                if let Some(path) = handle.path() {
                    child.set_path(path);
                }
            }
            if !handle.has_child(id) {
                cache.add_child(handle, &child)?;
            }
            child.begin_load()?;
            cache.attach_payload(&child, produced.payload)?;
        }

        if self.aborted() {
            return Err(ResourceError::Aborted(handle.id()));
        }
        cache.touch(handle);
        self.shared.queue.push(handle.clone());
        Ok(())
    }

    fn finish(self, decoded: Result<Decoded>) {
        if let Err(err) = decoded.and_then(|decoded| self.on_success(decoded)) {
            self.fail(err);
        }
    }

    fn fail(&self, err: ResourceError) {
        fail_load(&self.shared, &self.handle, self.top_level, err);
    }
}

/// Revert a failed load: clear partial payloads, record the error, notify
/// and release the in-flight slot of a top-level handle
pub(crate) fn fail_load(
    shared: &Shared,
    handle: &Arc<ResourceHandle>,
    top_level: bool,
    err: ResourceError,
) {
    shared.cache.reset_tree(handle);
    shared.cache.record_failure();
    match &err {
        ResourceError::Aborted(_) => {
            info!(id = %handle.id(), name = %handle.name(), "resource load aborted")
        }
        _ => error!(
            id = %handle.id(),
            name = %handle.name(),
            error = %err,
            "resource load failed"
        ),
    }
    handle.record_error(err);
    shared.events.publish(ResourceEvent::NeedsReload(handle.id()));
    if top_level {
        shared.cache.decrement_load_count();
    }
}
