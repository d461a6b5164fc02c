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

//! Error types

use std::fmt;
use uuid::Uuid;

/// Resource cache error type
///
/// Budget pressure is not represented here: an insert that cannot be brought
/// under budget reports [`crate::cache::InsertStatus::OverBudget`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// Payload attached to a handle of the wrong type, bad id at registration,
    /// or an otherwise malformed request
    Configuration(String),

    /// Double load, double post-construction, load of an unregistered handle,
    /// or work attempted on the wrong thread
    Concurrency(String),

    /// Decoder, compiler or upload failure inside a load process
    Backend(String),

    /// Handle not found in the registry
    NotFound(String),

    /// Handle has no payload where one was required
    PayloadMissing(Uuid),

    /// Load was cancelled at a phase boundary
    Aborted(Uuid),

    /// Serialization error
    Serialization(String),

    /// Deserialization error
    Deserialization(String),

    /// IO error (byte sources, snapshot files)
    Io(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            ResourceError::Concurrency(msg) => write!(f, "Concurrency error: {msg}"),
            ResourceError::Backend(msg) => write!(f, "Backend error: {msg}"),
            ResourceError::NotFound(msg) => write!(f, "Resource not found: {msg}"),
            ResourceError::PayloadMissing(id) => write!(f, "Resource {id} has no payload"),
            ResourceError::Aborted(id) => write!(f, "Load of resource {id} was aborted"),
            ResourceError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            ResourceError::Deserialization(msg) => write!(f, "Deserialization error: {msg}"),
            ResourceError::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        ResourceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            ResourceError::Io(err.to_string())
        } else {
            ResourceError::Deserialization(err.to_string())
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ResourceError>;

/// Abort on a violated cache invariant.
///
/// Reserved for states that cannot be reached through the public API unless
/// the registry is already inconsistent (id collisions, negative cost, load
/// counter underflow). Recovering from these would only hide the corruption.
#[cold]
#[track_caller]
pub(crate) fn corrupted(msg: &str) -> ! {
    tracing::error!(target: "archetype_assets::cache", "resource cache corrupted: {msg}");
    panic!("resource cache corrupted: {msg}");
}
