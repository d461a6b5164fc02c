//! Rendering context collaborator
//!
//! The cache never issues GPU calls itself. Post-construction only needs to
//! know whether the context is current on the calling thread and to make it
//! current before running payload hooks.

use crate::error::{ResourceError, Result};
use parking_lot::Mutex;
use std::thread::{self, ThreadId};

/// Context object owned by one thread at a time
pub trait RenderContext: Send + Sync {
    /// Whether the context is current on the calling thread
    fn is_current(&self) -> bool;

    /// Make the context current on the calling thread
    fn make_current(&self) -> Result<()>;
}

/// Context with no thread affinity, always current
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessContext;

impl RenderContext for HeadlessContext {
    #[inline]
    fn is_current(&self) -> bool {
        true
    }

    #[inline]
    fn make_current(&self) -> Result<()> {
        Ok(())
    }
}

/// Context bound to the thread that claimed it
///
/// `make_current` succeeds on the owning thread and on any thread while the
/// context is unclaimed; it fails from every other thread.
#[derive(Debug, Default)]
pub struct ThreadAffineContext {
    owner: Mutex<Option<ThreadId>>,
}

impl ThreadAffineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context already claimed by the calling thread
    pub fn claimed() -> Self {
        Self {
            owner: Mutex::new(Some(thread::current().id())),
        }
    }

    /// Release the context so another thread can claim it
    pub fn release(&self) {
        *self.owner.lock() = None;
    }

    pub fn owner(&self) -> Option<ThreadId> {
        *self.owner.lock()
    }
}

impl RenderContext for ThreadAffineContext {
    fn is_current(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    fn make_current(&self) -> Result<()> {
        let current = thread::current().id();
        let mut owner = self.owner.lock();
        match *owner {
            Some(id) if id != current => Err(ResourceError::Concurrency(format!(
                "render context is owned by {id:?}, cannot make current on {current:?}"
            ))),
            _ => {
                *owner = Some(current);
                Ok(())
            }
        }
    }
}
