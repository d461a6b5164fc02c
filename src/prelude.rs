//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use archetype_assets::prelude::*;
//! ```

pub use crate::cache::{BudgetStatus, InsertStatus};
pub use crate::config::CacheConfig;
pub use crate::context::ResourceContext;
pub use crate::error::{ResourceError, Result};
pub use crate::event::ResourceEvent;
pub use crate::resources::{
    BehaviorFlags, DeleteFlags, LoadStatus, Resource, ResourceHandle, ResourcePayload,
    ResourceType,
};
