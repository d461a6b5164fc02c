//! Post-construction on the context-owning thread
//!
//! Load threads push finished handles onto a channel; only the thread that
//! owns the render context drains it. A handle is finalized bottom-up: every
//! dependency-owned child first, then the handle itself.

use crate::cache::BudgetStatus;
use crate::context::Shared;
use crate::error::{ResourceError, Result};
use crate::event::ResourceEvent;
use crate::process::fail_load;
use crate::render::RenderContext;
use crate::resources::ResourceHandle;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Multi-producer, single-consumer queue of handles awaiting post-construction
pub(crate) struct PostConstructQueue {
    tx: Sender<Arc<ResourceHandle>>,
    rx: Receiver<Arc<ResourceHandle>>,
}

impl PostConstructQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn push(&self, handle: Arc<ResourceHandle>) {
        // both ends live in the same struct, the channel cannot be disconnected
        let _ = self.tx.send(handle);
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}

/// Result of draining the post-construction queue
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrainReport {
    /// Top-level and root handles finalized, in completion order
    pub constructed: Vec<Uuid>,
    pub failed: Vec<(Uuid, ResourceError)>,
    /// Outcome of the budget pass after the last successful root
    pub budget: BudgetStatus,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.constructed.is_empty() && self.failed.is_empty()
    }

    pub fn is_over_budget(&self) -> bool {
        matches!(self.budget, BudgetStatus::OverBudget { .. })
    }

    fn record(&mut self, id: Uuid, result: Result<BudgetStatus>) {
        match result {
            Ok(budget) => {
                self.constructed.push(id);
                self.budget = budget;
            }
            Err(err) => self.failed.push((id, err)),
        }
    }
}

fn ensure_current(render: &dyn RenderContext) -> Result<()> {
    if !render.is_current() {
        render.make_current()?;
    }
    Ok(())
}

/// Drain everything queued right now
pub(crate) fn drain(shared: &Shared) -> Result<DrainReport> {
    ensure_current(shared.render.as_ref())?;
    #[cfg(feature = "profiling")]
    let _span = tracing::info_span!("drain_post_construction", queued = shared.queue.len()).entered();

    let mut report = DrainReport::default();
    while let Ok(handle) = shared.queue.rx.try_recv() {
        report.record(handle.id(), finish_root(shared, &handle));
    }
    Ok(report)
}

/// Drain until no load is in flight or `timeout` elapses
pub(crate) fn pump(shared: &Shared, timeout: Duration) -> Result<DrainReport> {
    let deadline = Instant::now() + timeout;
    let mut report = drain(shared)?;
    while shared.cache.in_flight() > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match shared.queue.rx.recv_timeout(remaining) {
            Ok(handle) => report.record(handle.id(), finish_root(shared, &handle)),
            Err(RecvTimeoutError::Timeout) => {
                debug!(in_flight = shared.cache.in_flight(), "pump timed out");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(report)
}

/// Post-construct a root handle and settle its bookkeeping
///
/// On success a top-level handle releases its in-flight slot. The cache then
/// evicts back down to budget, sparing `handle`, and the outcome of that pass
/// is returned. On failure the whole tree reverts to empty. A root that is not
/// loading is reported and left untouched.
pub(crate) fn finish_root(
    shared: &Shared,
    handle: &Arc<ResourceHandle>,
) -> Result<BudgetStatus> {
    if !handle.is_loading() {
        return Err(ResourceError::Concurrency(format!(
            "{} '{}' cannot be post-constructed while {:?}",
            handle.resource_type(),
            handle.name(),
            handle.status()
        )));
    }

    let top_level = !handle.is_child();
    match construct_tree(shared, handle) {
        Ok(()) => {
            debug!(id = %handle.id(), name = %handle.name(), "resource constructed");
            if top_level {
                shared.cache.decrement_load_count();
            }
            Ok(shared.cache.enforce_budget_protecting(Some(handle)))
        }
        Err(err) => {
            fail_load(shared, handle, top_level, err.clone());
            Err(err)
        }
    }
}

fn construct_tree(shared: &Shared, handle: &ResourceHandle) -> Result<()> {
    for child_id in handle.children() {
        let Some(child) = shared.cache.get(child_id) else {
            continue;
        };
        if !handle.owns(&child) {
            continue;
        }
        if child.is_constructed() {
            return Err(ResourceError::Concurrency(format!(
                "child '{}' of '{}' was post-constructed twice",
                child.name(),
                handle.name()
            )));
        }
        construct_tree(shared, &child)?;
    }

    handle.construct(shared.render.as_ref())?;
    shared.events.publish(ResourceEvent::Changed(handle.id()));
    Ok(())
}

/// Explicit post-construction of one root, outside the queue
pub(crate) fn post_construct(
    shared: &Shared,
    handle: &Arc<ResourceHandle>,
) -> Result<BudgetStatus> {
    ensure_current(shared.render.as_ref())?;
    if handle.is_constructed() {
        return Err(ResourceError::Concurrency(format!(
            "{} '{}' is already constructed",
            handle.resource_type(),
            handle.name()
        )));
    }
    if shared.cache.owner_of(handle).is_some() {
        return Err(ResourceError::Concurrency(format!(
            "'{}' is post-constructed by its parent",
            handle.name()
        )));
    }
    finish_root(shared, handle)
}
