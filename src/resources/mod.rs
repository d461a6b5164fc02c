pub mod asset_types;
pub mod flags;
pub mod handle;
pub mod loader;
pub mod resource;

pub use asset_types::{
    Animation, AnimationChannel, Audio, Bone, Image, Material, MaterialParam, Mesh, Model,
    ResourcePayload, Script, ShaderProgram, ShaderStage, ShaderStageKind, Skeleton, Texture,
};
pub use flags::{BehaviorFlags, DeleteFlags, LoadStatus};
pub use handle::ResourceHandle;
pub use loader::{
    ByteSource, DecodeContext, Decoded, DecodedChild, DecoderRegistry, FileSystemSource,
    MemorySource, ResourceDecoder,
};
pub use resource::{Resource, ResourceStats, ResourceType};
