use crate::error::{ResourceError, Result};
use crate::render::RenderContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of resource a handle stores
///
/// Declaration order is dependency order: a resource may only reference kinds
/// declared before it, so snapshots reload in ascending order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ResourceType {
    Image,
    Texture,
    Material,
    Mesh,
    Animation,
    Model,
    ShaderProgram,
    Script,
    Skeleton,
    Audio,
}

impl ResourceType {
    pub const ALL: [ResourceType; 10] = [
        ResourceType::Image,
        ResourceType::Texture,
        ResourceType::Material,
        ResourceType::Mesh,
        ResourceType::Animation,
        ResourceType::Model,
        ResourceType::ShaderProgram,
        ResourceType::Script,
        ResourceType::Skeleton,
        ResourceType::Audio,
    ];

    /// Whether initialization touches exclusive global state and must run on
    /// the calling thread instead of a worker
    pub fn requires_context_thread(self) -> bool {
        matches!(self, ResourceType::ShaderProgram | ResourceType::Script)
    }

    /// Folder name conventionally housing this kind of resource
    pub fn dir_name(self) -> &'static str {
        match self {
            ResourceType::Image => "images",
            ResourceType::Texture => "textures",
            ResourceType::Material => "materials",
            ResourceType::Mesh => "meshes",
            ResourceType::Animation => "animations",
            ResourceType::Model => "models",
            ResourceType::ShaderProgram => "shaders",
            ResourceType::Script => "scripts",
            ResourceType::Skeleton => "skeletons",
            ResourceType::Audio => "audio",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Capability set of a constructed payload
pub trait Resource: Send + Sync + 'static {
    /// Kind of resource; must match the owning handle's type
    fn resource_type(&self) -> ResourceType;

    /// Accounting cost charged against the cache budget
    fn cost(&self) -> u64;

    /// Second construction phase, run on the context-owning thread once all
    /// dependency-owned children are usable
    fn post_construct(&mut self, _render: &dyn RenderContext) -> Result<()> {
        Ok(())
    }

    /// Called right before the payload is dropped by unload or eviction
    fn on_removal(&mut self) {}

    /// Serialized form used to rebuild resources that cannot be re-read from disk
    fn to_snapshot(&self) -> Option<serde_json::Value> {
        None
    }

    /// Binary representation, if this kind supports one
    fn save_binary(&self) -> Result<Vec<u8>> {
        Err(ResourceError::Serialization(format!(
            "{} has no binary representation",
            self.resource_type()
        )))
    }
}

/// Cache statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub loads: u64,
    pub failures: u64,
}

impl ResourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_hit_ratio(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}
