use crate::error::{ResourceError, Result};
use crate::render::RenderContext;
use crate::resources::{Resource, ResourceType};
use serde::{Deserialize, Serialize};
use speedy::{Endianness, Readable, Writable};
use std::mem::size_of;

/// Decoded image pixels
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }
}

impl Resource for Image {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Image
    }
    fn cost(&self) -> u64 {
        self.pixels.len() as u64
    }
}

/// Texture resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub pixels: Vec<u8>,
    #[serde(skip)]
    pub uploaded: bool,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            pixels,
            uploaded: false,
        }
    }
}

impl Resource for Texture {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Texture
    }
    fn cost(&self) -> u64 {
        self.pixels.len() as u64
    }
    fn post_construct(&mut self, render: &dyn RenderContext) -> Result<()> {
        if !render.is_current() {
            return Err(ResourceError::Backend(
                "texture upload requires a current render context".to_string(),
            ));
        }
        self.uploaded = true;
        Ok(())
    }
    fn on_removal(&mut self) {
        self.uploaded = false;
    }
}

/// Named scalar material parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct MaterialParam {
    pub name: String,
    pub value: f32,
}

/// Material resource; textures are referenced by name
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Material {
    pub params: Vec<MaterialParam>,
    pub textures: Vec<String>,
}

impl Material {
    pub fn param(&self, name: &str) -> Option<f32> {
        self.params.iter().find(|p| p.name == name).map(|p| p.value)
    }
}

impl Resource for Material {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Material
    }
    fn cost(&self) -> u64 {
        (size_of::<Self>()
            + self.params.len() * size_of::<MaterialParam>()
            + self.textures.iter().map(String::len).sum::<usize>()) as u64
    }
}

/// Triangle mesh with xyz positions
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Mesh {
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    #[serde(skip)]
    pub uploaded: bool,
}

impl Mesh {
    pub fn new(vertices: Vec<f32>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            uploaded: false,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }
}

impl Resource for Mesh {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Mesh
    }
    fn cost(&self) -> u64 {
        (self.vertices.len() * size_of::<f32>() + self.indices.len() * size_of::<u32>()) as u64
    }
    fn post_construct(&mut self, _render: &dyn RenderContext) -> Result<()> {
        let count = self.vertex_count();
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(ResourceError::Backend(format!(
                "mesh index {bad} out of range for {count} vertices"
            )));
        }
        self.uploaded = true;
        Ok(())
    }
    fn on_removal(&mut self) {
        self.uploaded = false;
    }
}

/// Keyframed animation channel for one bone
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct AnimationChannel {
    pub bone: String,
    pub keyframes: Vec<f32>,
}

/// Animation clip
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Animation {
    pub duration: f32,
    pub channels: Vec<AnimationChannel>,
}

impl Resource for Animation {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Animation
    }
    fn cost(&self) -> u64 {
        let keys: usize = self.channels.iter().map(|c| c.keyframes.len()).sum();
        (size_of::<Self>() + keys * size_of::<f32>()) as u64
    }
}

/// Model resource. Meshes and materials are dependency-owned child handles,
/// referenced here by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Model {
    pub meshes: Vec<String>,
    pub materials: Vec<String>,
}

impl Resource for Model {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Model
    }
    fn cost(&self) -> u64 {
        size_of::<Self>() as u64
    }
}

/// Programmable pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Readable, Writable)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

impl ShaderStageKind {
    /// Stage implied by a source file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "vert" => Some(ShaderStageKind::Vertex),
            "frag" => Some(ShaderStageKind::Fragment),
            "geom" => Some(ShaderStageKind::Geometry),
            "comp" => Some(ShaderStageKind::Compute),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct ShaderStage {
    pub kind: ShaderStageKind,
    pub source: String,
}

/// Shader program assembled from one compute stage or vertex + fragment
/// (+ geometry) stages
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct ShaderProgram {
    pub stages: Vec<ShaderStage>,
    #[serde(skip)]
    pub linked: bool,
}

impl ShaderProgram {
    pub fn new(stages: Vec<ShaderStage>) -> Self {
        Self {
            stages,
            linked: false,
        }
    }

    pub fn stage(&self, kind: ShaderStageKind) -> Option<&ShaderStage> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// Check the stage combination is linkable
    pub fn validate(&self) -> Result<()> {
        let has = |kind| self.stage(kind).is_some();
        let compute = has(ShaderStageKind::Compute);
        let graphics = has(ShaderStageKind::Vertex) && has(ShaderStageKind::Fragment);
        if compute == graphics {
            return Err(ResourceError::Backend(
                "shader program needs either a compute stage or vertex and fragment stages"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl Resource for ShaderProgram {
    fn resource_type(&self) -> ResourceType {
        ResourceType::ShaderProgram
    }
    fn cost(&self) -> u64 {
        self.stages.iter().map(|s| s.source.len() as u64).sum()
    }
    fn post_construct(&mut self, _render: &dyn RenderContext) -> Result<()> {
        self.validate()?;
        self.linked = true;
        Ok(())
    }
    fn on_removal(&mut self) {
        self.linked = false;
    }
}

/// Embedded script source
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Script {
    pub source: String,
}

impl Resource for Script {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Script
    }
    fn cost(&self) -> u64 {
        self.source.len() as u64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Bone {
    pub name: String,
    /// Index of the parent bone, `-1` for roots
    pub parent: i32,
}

/// Skeleton hierarchy
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
}

impl Resource for Skeleton {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Skeleton
    }
    fn cost(&self) -> u64 {
        (size_of::<Self>() + self.bones.len() * size_of::<Bone>()) as u64
    }
}

/// Audio resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Readable, Writable)]
pub struct Audio {
    pub sample_rate: u32,
    pub channels: u8,
    pub samples: Vec<f32>,
}

impl Audio {
    pub fn new(sample_rate: u32, channels: u8, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / (self.sample_rate as f32 * self.channels as f32)
    }
}

impl Resource for Audio {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Audio
    }
    fn cost(&self) -> u64 {
        (self.samples.len() * size_of::<f32>()) as u64
    }
}

/// Payload owned by a resource handle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Readable, Writable)]
#[serde(tag = "kind", content = "data")]
pub enum ResourcePayload {
    Image(Image),
    Texture(Texture),
    Material(Material),
    Mesh(Mesh),
    Animation(Animation),
    Model(Model),
    ShaderProgram(ShaderProgram),
    Script(Script),
    Skeleton(Skeleton),
    Audio(Audio),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            ResourcePayload::Image($inner) => $body,
            ResourcePayload::Texture($inner) => $body,
            ResourcePayload::Material($inner) => $body,
            ResourcePayload::Mesh($inner) => $body,
            ResourcePayload::Animation($inner) => $body,
            ResourcePayload::Model($inner) => $body,
            ResourcePayload::ShaderProgram($inner) => $body,
            ResourcePayload::Script($inner) => $body,
            ResourcePayload::Skeleton($inner) => $body,
            ResourcePayload::Audio($inner) => $body,
        }
    };
}

macro_rules! payload_accessors {
    ($($variant:ident => $as_ref:ident, $as_mut:ident;)*) => {
        impl ResourcePayload {
            $(
                pub fn $as_ref(&self) -> Option<&$variant> {
                    match self {
                        ResourcePayload::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                pub fn $as_mut(&mut self) -> Option<&mut $variant> {
                    match self {
                        ResourcePayload::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            )*
        }

        $(
            impl From<$variant> for ResourcePayload {
                fn from(inner: $variant) -> Self {
                    ResourcePayload::$variant(inner)
                }
            }
        )*
    };
}

payload_accessors! {
    Image => as_image, as_image_mut;
    Texture => as_texture, as_texture_mut;
    Material => as_material, as_material_mut;
    Mesh => as_mesh, as_mesh_mut;
    Animation => as_animation, as_animation_mut;
    Model => as_model, as_model_mut;
    ShaderProgram => as_shader_program, as_shader_program_mut;
    Script => as_script, as_script_mut;
    Skeleton => as_skeleton, as_skeleton_mut;
    Audio => as_audio, as_audio_mut;
}

impl ResourcePayload {
    /// Rebuild a payload from its embedded snapshot
    pub fn from_snapshot(value: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Rebuild a payload from [`Resource::save_binary`] output, checking the kind
    pub fn load_binary(expected: ResourceType, bytes: &[u8]) -> Result<Self> {
        let payload = Self::read_from_buffer_with_ctx(Endianness::LittleEndian, bytes)
            .map_err(|e| ResourceError::Deserialization(e.to_string()))?;
        if payload.resource_type() != expected {
            return Err(ResourceError::Configuration(format!(
                "binary payload is a {}, expected {expected}",
                payload.resource_type()
            )));
        }
        Ok(payload)
    }
}

impl Resource for ResourcePayload {
    fn resource_type(&self) -> ResourceType {
        dispatch!(self, inner => inner.resource_type())
    }

    fn cost(&self) -> u64 {
        dispatch!(self, inner => inner.cost())
    }

    fn post_construct(&mut self, render: &dyn RenderContext) -> Result<()> {
        dispatch!(self, inner => inner.post_construct(render))
    }

    fn on_removal(&mut self) {
        dispatch!(self, inner => inner.on_removal())
    }

    fn to_snapshot(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }

    fn save_binary(&self) -> Result<Vec<u8>> {
        self.write_to_vec_with_ctx(Endianness::LittleEndian)
            .map_err(|e| ResourceError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{HeadlessContext, ThreadAffineContext};

    #[test]
    fn test_image_cost() {
        let image = ResourcePayload::from(Image::new(4, 4, vec![0u8; 64]));
        assert_eq!(image.resource_type(), ResourceType::Image);
        assert_eq!(image.cost(), 64);
    }

    #[test]
    fn test_audio_resource() {
        let audio = Audio::new(44100, 2, vec![0.0f32; 44100]);
        assert_eq!(audio.cost(), 44100 * 4);
        assert!((audio.duration_seconds() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_texture_requires_current_context() {
        let mut texture = Texture::new(2, 2, vec![0u8; 16]);
        let unclaimed = ThreadAffineContext::new();
        assert!(matches!(
            texture.post_construct(&unclaimed),
            Err(ResourceError::Backend(_))
        ));

        texture.post_construct(&HeadlessContext).unwrap();
        assert!(texture.uploaded);
        texture.on_removal();
        assert!(!texture.uploaded);
    }

    #[test]
    fn test_mesh_rejects_bad_index() {
        let mut mesh = Mesh::new(vec![0.0; 9], vec![0, 1, 3]);
        assert!(mesh.post_construct(&HeadlessContext).is_err());

        let mut mesh = Mesh::new(vec![0.0; 9], vec![0, 1, 2]);
        mesh.post_construct(&HeadlessContext).unwrap();
        assert!(mesh.uploaded);
    }

    #[test]
    fn test_shader_program_validation() {
        let stage = |kind, source: &str| ShaderStage {
            kind,
            source: source.to_string(),
        };

        let graphics = ShaderProgram::new(vec![
            stage(ShaderStageKind::Vertex, "void main() {}"),
            stage(ShaderStageKind::Fragment, "void main() {}"),
        ]);
        assert!(graphics.validate().is_ok());

        let vertex_only = ShaderProgram::new(vec![stage(ShaderStageKind::Vertex, "")]);
        assert!(vertex_only.validate().is_err());

        let mixed = ShaderProgram::new(vec![
            stage(ShaderStageKind::Compute, ""),
            stage(ShaderStageKind::Vertex, ""),
            stage(ShaderStageKind::Fragment, ""),
        ]);
        assert!(mixed.validate().is_err());
    }

    #[test]
    fn test_snapshot_restores_payload() {
        let payload = ResourcePayload::from(Material {
            params: vec![MaterialParam {
                name: "roughness".to_string(),
                value: 0.25,
            }],
            textures: vec!["albedo".to_string()],
        });
        let snapshot = payload.to_snapshot().unwrap();
        assert_eq!(snapshot["kind"], "Material");

        let restored = ResourcePayload::from_snapshot(&snapshot).unwrap();
        assert_eq!(restored.as_material().and_then(|m| m.param("roughness")), Some(0.25));
    }

    #[test]
    fn test_binary_type_check() {
        let payload = ResourcePayload::from(Script {
            source: "print('hi')".to_string(),
        });
        let bytes = payload.save_binary().unwrap();

        assert_eq!(
            ResourcePayload::load_binary(ResourceType::Script, &bytes).unwrap(),
            payload
        );
        assert!(matches!(
            ResourcePayload::load_binary(ResourceType::Mesh, &bytes),
            Err(ResourceError::Configuration(_))
        ));
    }
}
