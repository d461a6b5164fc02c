// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Archetype Assets - resource cache and asynchronous loading pipeline
//!
//! Cost-bounded LRU registry of resource handles, parent/child ownership,
//! multi-threaded load processes and two-phase post-construction on the
//! render-context thread.

pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod prelude;
mod process;
pub mod render;
pub mod resources;
pub mod scheduler;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use cache::{BudgetStatus, InsertStatus, ResourceCache};
pub use config::CacheConfig;
pub use context::{ContextBuilder, ResourceContext};
pub use dispatch::DrainReport;
pub use error::{ResourceError, Result};
pub use event::{EventBus, ResourceEvent};
pub use render::{HeadlessContext, RenderContext, ThreadAffineContext};
pub use resources::*;
pub use scheduler::{DeferredScheduler, InlineScheduler, TaskScheduler};
#[cfg(feature = "parallel")]
pub use scheduler::RayonScheduler;
pub use snapshot::{CacheSnapshot, HandleSnapshot, SnapshotReload};
