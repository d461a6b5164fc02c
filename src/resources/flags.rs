//! Behavior, delete and status flags for resource handles

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

bitflags! {
    /// Independent facets controlling how the cache treats a handle
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BehaviorFlags: u32 {
        /// May be evicted or removed to make room. Without it a handle is permanent.
        const REMOVABLE = 1 << 0;
        /// Loaded along with a parent and owned by it
        const CHILD = 1 << 1;
        /// Has no backing file; children are linked manually and are not owned
        const RUNTIME_GENERATED = 1 << 2;
        /// Never evicted, never force-deleted, never saved. Overrides `REMOVABLE`.
        const CORE = 1 << 3;
        /// Skipped when the cache is serialized
        const UNSAVED = 1 << 4;
        /// Reconstructed from the cached snapshot instead of its path
        const USES_SNAPSHOT = 1 << 5;
    }
}

bitflags! {
    /// Options for [`crate::cache::ResourceCache::remove`]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DeleteFlags: u32 {
        /// Drop the handle from the registry, not just its payload
        const DELETE_HANDLE = 1 << 0;
        /// Remove even if the handle is not `REMOVABLE` (core handles still refuse)
        const FORCE = 1 << 1;
    }
}

/// Load state of a handle
///
/// `Empty -> Loading -> Constructed`, with `Loading -> Empty` on failure and
/// `Constructed -> Empty` on unload or eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LoadStatus {
    Empty = 0,
    Loading = 1,
    Constructed = 2,
}

impl LoadStatus {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => LoadStatus::Empty,
            1 => LoadStatus::Loading,
            2 => LoadStatus::Constructed,
            other => crate::error::corrupted(&format!("invalid load status {other}")),
        }
    }
}

/// Status word shared between the load threads and the context thread.
///
/// Transitions are compare-and-swap so two racing loads cannot both leave
/// `Empty`. `Constructed` is published with release ordering; a reader that
/// observes it with acquire ordering also observes the attached payload.
#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LoadStatus::Empty as u8))
    }

    pub(crate) fn load(&self) -> LoadStatus {
        LoadStatus::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`, returning the observed status on failure
    pub(crate) fn transition(&self, from: LoadStatus, to: LoadStatus) -> Result<(), LoadStatus> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(LoadStatus::from_bits)
    }

    /// Any status but `Loading` becomes `Empty`
    pub(crate) fn settle(&self) -> Result<(), LoadStatus> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (bits != LoadStatus::Loading as u8).then_some(LoadStatus::Empty as u8)
            })
            .map(|_| ())
            .map_err(LoadStatus::from_bits)
    }

    pub(crate) fn reset(&self) {
        self.0.store(LoadStatus::Empty as u8, Ordering::Release);
    }
}

/// Behavior flags that can be read without the registry lock
#[derive(Debug)]
pub(crate) struct AtomicBehavior(AtomicU32);

impl AtomicBehavior {
    pub(crate) fn new(flags: BehaviorFlags) -> Self {
        Self(AtomicU32::new(flags.bits()))
    }

    pub(crate) fn get(&self) -> BehaviorFlags {
        BehaviorFlags::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, flags: BehaviorFlags) {
        self.0.store(flags.bits(), Ordering::Release);
    }

    pub(crate) fn toggle(&self, flag: BehaviorFlags, on: bool) {
        if on {
            self.0.fetch_or(flag.bits(), Ordering::AcqRel);
        } else {
            self.0.fetch_and(!flag.bits(), Ordering::AcqRel);
        }
    }
}
