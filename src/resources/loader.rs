//! Byte sources and per-type decoders consumed by load processes
//!
//! Decoders are narrow collaborators: they turn bytes (or an embedded
//! snapshot) into a payload plus any children the payload depends on. They
//! never touch the cache.

use crate::error::{ResourceError, Result};
use crate::resources::{
    BehaviorFlags, Material, Mesh, Model, Resource, ResourcePayload, ResourceType, Script,
    ShaderProgram, ShaderStage, ShaderStageKind,
};
use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where load processes read bytes from
pub trait ByteSource: Send + Sync {
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    fn exists(&self, path: &Path) -> bool;
}

/// Reads files relative to a root directory
#[derive(Clone, Debug, Default)]
pub struct FileSystemSource {
    root: PathBuf,
}

impl FileSystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl ByteSource for FileSystemSource {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        fs::read(&full).map_err(|e| {
            ResourceError::Io(format!("Failed to load file {}: {e}", full.display()))
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }
}

/// In-memory file table
#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<AHashMap<PathBuf, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), bytes.into());
    }

    pub fn with_file(self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn remove(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.write().remove(path)
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl ByteSource for MemorySource {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| ResourceError::Io(format!("no such file: {}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }
}

/// Everything a decoder may look at
pub struct DecodeContext<'a> {
    pub name: &'a str,
    pub resource_type: ResourceType,
    /// Primary path first, then additional paths
    pub paths: &'a [PathBuf],
    pub snapshot: Option<&'a serde_json::Value>,
    pub source: &'a dyn ByteSource,
}

impl DecodeContext<'_> {
    pub fn primary_path(&self) -> Result<&Path> {
        self.paths.first().map(PathBuf::as_path).ok_or_else(|| {
            ResourceError::Configuration(format!(
                "{} '{}' has no path to load from",
                self.resource_type, self.name
            ))
        })
    }

    pub fn read_primary(&self) -> Result<Vec<u8>> {
        self.source.read(self.primary_path()?)
    }
}

/// Child produced alongside a parent payload
#[derive(Debug)]
pub struct DecodedChild {
    pub name: String,
    pub payload: ResourcePayload,
    /// Extra flags on top of `CHILD`
    pub flags: BehaviorFlags,
}

/// Decoder output
#[derive(Debug)]
pub struct Decoded {
    pub payload: ResourcePayload,
    pub children: Vec<DecodedChild>,
}

impl Decoded {
    pub fn new(payload: impl Into<ResourcePayload>) -> Self {
        Self {
            payload: payload.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, name: impl Into<String>, payload: impl Into<ResourcePayload>) -> Self {
        self.children.push(DecodedChild {
            name: name.into(),
            payload: payload.into(),
            flags: BehaviorFlags::empty(),
        });
        self
    }
}

/// Turns bytes into a payload
pub trait ResourceDecoder: Send + Sync {
    fn decode(&self, ctx: &DecodeContext<'_>) -> Result<Decoded>;
}

/// Rebuilds a payload from the handle's embedded snapshot
pub struct SnapshotDecoder;

impl ResourceDecoder for SnapshotDecoder {
    fn decode(&self, ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let snapshot = ctx.snapshot.ok_or_else(|| {
            ResourceError::Configuration(format!(
                "{} '{}' uses a snapshot but has none",
                ctx.resource_type, ctx.name
            ))
        })?;
        let payload = ResourcePayload::from_snapshot(snapshot)?;
        check_type(ctx, &payload)?;
        Ok(Decoded::new(payload))
    }
}

/// Reads the speedy binary form written by [`Resource::save_binary`]
pub struct BinaryDecoder;

impl ResourceDecoder for BinaryDecoder {
    fn decode(&self, ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let bytes = ctx.read_primary()?;
        Ok(Decoded::new(ResourcePayload::load_binary(
            ctx.resource_type,
            &bytes,
        )?))
    }
}

/// Reads the JSON body of the handle's payload kind
pub struct JsonDecoder;

impl ResourceDecoder for JsonDecoder {
    fn decode(&self, ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let bytes = ctx.read_primary()?;
        let data: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| ResourceError::Backend(format!("JSON parse error: {e}")))?;
        let tagged = serde_json::json!({
            "kind": ctx.resource_type.to_string(),
            "data": data,
        });
        let payload = ResourcePayload::from_snapshot(&tagged)
            .map_err(|e| ResourceError::Backend(format!("'{}': {e}", ctx.name)))?;
        Ok(Decoded::new(payload))
    }
}

/// Builds a shader program from one source file per stage
pub struct ShaderSourceDecoder;

impl ResourceDecoder for ShaderSourceDecoder {
    fn decode(&self, ctx: &DecodeContext<'_>) -> Result<Decoded> {
        if ctx.paths.is_empty() {
            ctx.primary_path()?;
        }
        let mut stages = Vec::with_capacity(ctx.paths.len());
        for path in ctx.paths {
            let kind = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(ShaderStageKind::from_extension)
                .ok_or_else(|| {
                    ResourceError::Backend(format!(
                        "cannot infer shader stage from {}",
                        path.display()
                    ))
                })?;
            if stages.iter().any(|s: &ShaderStage| s.kind == kind) {
                return Err(ResourceError::Backend(format!(
                    "duplicate {kind:?} stage in '{}'",
                    ctx.name
                )));
            }
            stages.push(ShaderStage {
                kind,
                source: utf8(ctx.source.read(path)?, path)?,
            });
        }
        let program = ShaderProgram::new(stages);
        program.validate()?;
        Ok(Decoded::new(program))
    }
}

/// Reads script source text
pub struct ScriptSourceDecoder;

impl ResourceDecoder for ScriptSourceDecoder {
    fn decode(&self, ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let path = ctx.primary_path()?;
        let source = utf8(ctx.source.read(path)?, path)?;
        Ok(Decoded::new(Script { source }))
    }
}

#[derive(Deserialize)]
struct ManifestMesh {
    name: String,
    #[serde(default)]
    vertices: Vec<f32>,
    #[serde(default)]
    indices: Vec<u32>,
}

#[derive(Deserialize)]
struct ManifestMaterial {
    name: String,
    #[serde(flatten)]
    material: Material,
}

#[derive(Deserialize)]
struct ModelManifest {
    #[serde(default)]
    meshes: Vec<ManifestMesh>,
    #[serde(default)]
    materials: Vec<ManifestMaterial>,
}

/// Reads a JSON model manifest whose meshes and materials become
/// dependency-owned children of the model
pub struct ModelManifestDecoder;

impl ResourceDecoder for ModelManifestDecoder {
    fn decode(&self, ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let bytes = ctx.read_primary()?;
        let manifest: ModelManifest = serde_json::from_slice(&bytes)
            .map_err(|e| ResourceError::Backend(format!("model manifest '{}': {e}", ctx.name)))?;

        let model = Model {
            meshes: manifest.meshes.iter().map(|m| m.name.clone()).collect(),
            materials: manifest.materials.iter().map(|m| m.name.clone()).collect(),
        };
        let mut decoded = Decoded::new(model);
        for mesh in manifest.meshes {
            decoded = decoded.with_child(mesh.name, Mesh::new(mesh.vertices, mesh.indices));
        }
        for material in manifest.materials {
            decoded = decoded.with_child(material.name, material.material);
        }
        Ok(decoded)
    }
}

/// Decoder lookup
///
/// Resolution order: the snapshot decoder for handles rebuilt from a
/// snapshot, then the decoder registered for the primary path's extension,
/// then the decoder registered for the resource type.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    by_type: AHashMap<ResourceType, Arc<dyn ResourceDecoder>>,
    by_extension: AHashMap<String, Arc<dyn ResourceDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in decoders
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let json: Arc<dyn ResourceDecoder> = Arc::new(JsonDecoder);
        for ty in [
            ResourceType::Image,
            ResourceType::Texture,
            ResourceType::Material,
            ResourceType::Mesh,
            ResourceType::Animation,
            ResourceType::Skeleton,
            ResourceType::Audio,
        ] {
            registry.by_type.insert(ty, json.clone());
        }
        registry.register(ResourceType::Model, ModelManifestDecoder);
        registry.register(ResourceType::ShaderProgram, ShaderSourceDecoder);
        registry.register(ResourceType::Script, ScriptSourceDecoder);
        registry.register_extension("bin", BinaryDecoder);
        registry
    }

    pub fn register(&mut self, resource_type: ResourceType, decoder: impl ResourceDecoder + 'static) {
        self.by_type.insert(resource_type, Arc::new(decoder));
    }

    pub fn register_extension(&mut self, extension: &str, decoder: impl ResourceDecoder + 'static) {
        self.by_extension
            .insert(extension.to_ascii_lowercase(), Arc::new(decoder));
    }

    pub fn decode(&self, ctx: &DecodeContext<'_>, uses_snapshot: bool) -> Result<Decoded> {
        if uses_snapshot {
            return SnapshotDecoder.decode(ctx);
        }
        let by_extension = ctx
            .paths
            .first()
            .and_then(|p| p.extension())
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension.get(&ext.to_ascii_lowercase()));
        let decoder = by_extension
            .or_else(|| self.by_type.get(&ctx.resource_type))
            .ok_or_else(|| {
                ResourceError::NotFound(format!("no decoder for {}", ctx.resource_type))
            })?;

        let decoded = decoder.decode(ctx)?;
        check_type(ctx, &decoded.payload)?;
        Ok(decoded)
    }
}

fn check_type(ctx: &DecodeContext<'_>, payload: &ResourcePayload) -> Result<()> {
    if payload.resource_type() != ctx.resource_type {
        return Err(ResourceError::Configuration(format!(
            "decoder produced a {} for {} '{}'",
            payload.resource_type(),
            ctx.resource_type,
            ctx.name
        )));
    }
    Ok(())
}

fn utf8(bytes: Vec<u8>, path: &Path) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        ResourceError::Backend(format!("UTF-8 decode error in {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Image;

    fn context<'a>(
        ty: ResourceType,
        paths: &'a [PathBuf],
        source: &'a dyn ByteSource,
    ) -> DecodeContext<'a> {
        DecodeContext {
            name: "test",
            resource_type: ty,
            paths,
            snapshot: None,
            source,
        }
    }

    #[test]
    fn test_file_system_source() {
        let source = FileSystemSource::new(env!("CARGO_MANIFEST_DIR"));
        assert!(source.exists(Path::new("Cargo.toml")));
        assert!(!source.exists(Path::new("nonexistent.txt")));
        assert!(!source.read(Path::new("Cargo.toml")).unwrap().is_empty());
        assert!(matches!(
            source.read(Path::new("nonexistent.txt")),
            Err(ResourceError::Io(_))
        ));
    }

    #[test]
    fn test_json_decoder() {
        let source = MemorySource::new().with_file(
            "img.json",
            r#"{"width": 2, "height": 1, "pixels": [1, 2]}"#,
        );
        let paths = [PathBuf::from("img.json")];
        let decoded = DecoderRegistry::with_defaults()
            .decode(&context(ResourceType::Image, &paths, &source), false)
            .unwrap();
        assert_eq!(decoded.payload.as_image(), Some(&Image::new(2, 1, vec![1, 2])));
        assert!(decoded.children.is_empty());
    }

    #[test]
    fn test_json_decoder_reports_backend_error() {
        let source = MemorySource::new().with_file("bad.json", "{ not json");
        let paths = [PathBuf::from("bad.json")];
        let result = DecoderRegistry::with_defaults()
            .decode(&context(ResourceType::Mesh, &paths, &source), false);
        assert!(matches!(result, Err(ResourceError::Backend(_))));
    }

    #[test]
    fn test_binary_decoder_by_extension() {
        let payload = ResourcePayload::from(Image::new(1, 1, vec![7]));
        let source = MemorySource::new().with_file("img.bin", payload.save_binary().unwrap());
        let paths = [PathBuf::from("img.bin")];
        let decoded = DecoderRegistry::with_defaults()
            .decode(&context(ResourceType::Image, &paths, &source), false)
            .unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_shader_stages_from_extensions() {
        let source = MemorySource::new()
            .with_file("lit.vert", "void main() {}")
            .with_file("lit.frag", "void main() {}");
        let paths = [PathBuf::from("lit.vert"), PathBuf::from("lit.frag")];
        let decoded = DecoderRegistry::with_defaults()
            .decode(&context(ResourceType::ShaderProgram, &paths, &source), false)
            .unwrap();
        let program = decoded.payload.as_shader_program().unwrap();
        assert_eq!(program.stages.len(), 2);
        assert!(program.stage(ShaderStageKind::Fragment).is_some());
    }

    #[test]
    fn test_shader_missing_fragment_fails() {
        let source = MemorySource::new().with_file("lit.vert", "void main() {}");
        let paths = [PathBuf::from("lit.vert")];
        let result = DecoderRegistry::with_defaults()
            .decode(&context(ResourceType::ShaderProgram, &paths, &source), false);
        assert!(matches!(result, Err(ResourceError::Backend(_))));
    }

    #[test]
    fn test_model_manifest_children() {
        let manifest = r#"{
            "meshes": [{"name": "hull", "vertices": [0,0,0, 1,0,0, 0,1,0], "indices": [0,1,2]}],
            "materials": [{"name": "paint", "params": [{"name": "roughness", "value": 0.5}], "textures": []}]
        }"#;
        let source = MemorySource::new().with_file("ship.json", manifest);
        let paths = [PathBuf::from("ship.json")];
        let decoded = DecoderRegistry::with_defaults()
            .decode(&context(ResourceType::Model, &paths, &source), false)
            .unwrap();

        let model = decoded.payload.as_model().unwrap();
        assert_eq!(model.meshes, vec!["hull".to_string()]);
        assert_eq!(decoded.children.len(), 2);
        assert_eq!(decoded.children[0].payload.resource_type(), ResourceType::Mesh);
        assert_eq!(
            decoded.children[1].payload.resource_type(),
            ResourceType::Material
        );
    }

    #[test]
    fn test_snapshot_decoder_checks_type() {
        let snapshot = ResourcePayload::from(Image::new(1, 1, vec![0]))
            .to_snapshot()
            .unwrap();
        let source = MemorySource::new();
        let ctx = DecodeContext {
            name: "procedural",
            resource_type: ResourceType::Mesh,
            paths: &[],
            snapshot: Some(&snapshot),
            source: &source,
        };
        assert!(matches!(
            DecoderRegistry::new().decode(&ctx, true),
            Err(ResourceError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_decoder() {
        let source = MemorySource::new();
        let paths = [PathBuf::from("a.wav")];
        assert!(matches!(
            DecoderRegistry::new().decode(&context(ResourceType::Audio, &paths, &source), false),
            Err(ResourceError::NotFound(_))
        ));
    }
}
